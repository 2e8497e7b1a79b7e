use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Sentinel for "no next frame".
const NIL: usize = usize::MAX;

/// Frame number relative to the start of the managed region.
pub(crate) type FrameIndex = usize;

/// The `next` links of every free list, one slot per managed frame.
///
/// Links are kept beside the frames rather than inside them, so a list walk
/// never dereferences physical memory and junk-filling a frame cannot corrupt
/// a list.
///
/// # Invariants
/// - A frame's slot is only read or written by whoever owns the frame: the
///   holder of the lock of the list it is on, or the thread that popped it.
///   That lock (or the pop) orders the accesses, so relaxed atomics suffice.
pub(crate) struct FrameLinks {
    next: Box<[AtomicUsize]>,
}

impl FrameLinks {
    pub(crate) fn new(frames: usize) -> Self {
        let next: Vec<AtomicUsize> = (0..frames).map(|_| AtomicUsize::new(NIL)).collect();
        Self {
            next: next.into_boxed_slice(),
        }
    }

    #[inline]
    fn next(&self, frame: FrameIndex) -> Option<FrameIndex> {
        match self.next[frame].load(Ordering::Relaxed) {
            NIL => None,
            n => Some(n),
        }
    }

    #[inline]
    fn set_next(&self, frame: FrameIndex, next: Option<FrameIndex>) {
        self.next[frame].store(next.unwrap_or(NIL), Ordering::Relaxed);
    }
}

/// A LIFO list of free frames, threaded through [`FrameLinks`].
///
/// ```text
///  head ─► [f7] ─► [f3] ─► [f12] ─► NIL
/// ```
///
/// # Invariants
/// - A frame is on at most one `FreeList` at a time.
/// - `len` equals the number of frames reachable from `head`.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: Option<FrameIndex>,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push(&mut self, links: &FrameLinks, frame: FrameIndex) {
        links.set_next(frame, self.head);
        self.head = Some(frame);
        self.len += 1;
    }

    pub(crate) fn pop(&mut self, links: &FrameLinks) -> Option<FrameIndex> {
        let frame = self.head?;
        self.head = links.next(frame);
        links.set_next(frame, None);
        self.len -= 1;
        Some(frame)
    }

    /// Move up to `max` frames from the front of `self` onto `dst`.
    ///
    /// Returns how many frames were moved.
    pub(crate) fn drain_into(&mut self, links: &FrameLinks, dst: &mut Self, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            let Some(frame) = self.pop(links) else {
                break;
            };
            dst.push(links, frame);
            moved += 1;
        }
        moved
    }

    /// Move every frame of `other` onto `self`, leaving `other` empty.
    pub(crate) fn append(&mut self, links: &FrameLinks, other: &mut Self) {
        let max = other.len;
        other.drain_into(links, self, max);
    }
}
