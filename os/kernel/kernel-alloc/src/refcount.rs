//! Per-frame reference counts.
//!
//! Counts are partitioned into contiguous stripes, each behind its own
//! [`SpinLock`], so COW sharing on one core does not serialize refcount
//! traffic on another. With a single stripe this degenerates to one global
//! refcount lock.

use crate::free_list::FrameIndex;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use kernel_sync::SpinLock;
use log::error;

pub(crate) struct RefCounts {
    stripes: Box<[SpinLock<Box<[u32]>>]>,
    per_stripe: usize,
}

impl RefCounts {
    /// All counts start at zero (every frame free).
    pub(crate) fn new(frames: usize, stripes: usize) -> Self {
        let stripes = stripes.clamp(1, frames.max(1));
        let per_stripe = frames.div_ceil(stripes).max(1);
        let stripes: Vec<_> = (0..stripes)
            .map(|i| {
                let len = frames.saturating_sub(i * per_stripe).min(per_stripe);
                SpinLock::new(vec![0u32; len].into_boxed_slice())
            })
            .collect();
        Self {
            stripes: stripes.into_boxed_slice(),
            per_stripe,
        }
    }

    #[inline]
    fn locate(&self, frame: FrameIndex) -> (&SpinLock<Box<[u32]>>, usize) {
        (
            &self.stripes[frame / self.per_stripe],
            frame % self.per_stripe,
        )
    }

    pub(crate) fn get(&self, frame: FrameIndex) -> u32 {
        let (stripe, i) = self.locate(frame);
        stripe.with_lock(|counts| counts[i])
    }

    /// A frame just left a free list: its count goes from 0 to 1.
    pub(crate) fn claim(&self, frame: FrameIndex) {
        let (stripe, i) = self.locate(frame);
        let prev = stripe.with_lock(|counts| core::mem::replace(&mut counts[i], 1));
        if prev != 0 {
            error!("frame {frame} was on a free list with refcount {prev}");
            panic!("kalloc: free frame has refcount {prev}");
        }
    }

    /// Add a sharer. Returns the new count.
    pub(crate) fn increment(&self, frame: FrameIndex) -> u32 {
        let (stripe, i) = self.locate(frame);
        let count = stripe.with_lock(|counts| {
            if counts[i] != 0 {
                counts[i] += 1;
            }
            counts[i]
        });
        if count == 0 {
            error!("refcount increment on free frame {frame}");
            panic!("refcnt_inc: frame is not allocated");
        }
        count
    }

    /// Drop a reference. Returns the new count; zero means the caller now
    /// owns the frame and must put it back on a free list.
    pub(crate) fn decrement(&self, frame: FrameIndex) -> u32 {
        let (stripe, i) = self.locate(frame);
        let count = stripe.with_lock(|counts| {
            let before = counts[i];
            counts[i] = before.saturating_sub(1);
            before
        });
        if count == 0 {
            error!("double free of frame {frame}");
            panic!("kfree: frame is not allocated");
        }
        count - 1
    }
}
