//! # Physical Frame Allocator
//!
//! Hands out 4 KiB frames from one fixed physical range, with a reference
//! count per frame so address spaces can share frames copy-on-write.
//!
//! ## Shards
//!
//! Free frames live on one or more [`FreeList`]s, each behind its own
//! [`SpinLock`]. A core allocates from and frees to "its" list, chosen by
//! [`CurrentCpu`]. With a single shard this is the classic globally locked
//! allocator.
//!
//! ```text
//!  core 0            core 1            core 2
//!  ┌──────────┐      ┌──────────┐      ┌──────────┐
//!  │ list 0   │      │ list 1   │      │ list 2   │
//!  └────┬─────┘      └────▲─────┘      └────▲─────┘
//!       │ empty?          │                 │
//!       └──── steal ≤ quota, round robin ───┘
//! ```
//!
//! When its own list runs dry a core makes exactly one stealing pass: it
//! visits the other lists round robin and moves frames into a private batch
//! until the quota is met or every peer was visited. One frame of the batch
//! is returned, the rest lands on the thief's own list. An empty batch means
//! the system is out of frames.
//!
//! While a batch is in flight it sits on no list, and a peer's stealing pass
//! may already have visited the list it ends up on. A concurrent `alloc` can
//! therefore report exhaustion although frames are free; retrying after the
//! other cores made progress succeeds. Exhaustion is exact once allocation
//! is quiescent.
//!
//! ## Reference counts
//!
//! Per-core sharding and per-frame reference counts are combined here into
//! one allocator; the classic globally locked allocator is the
//! single-shard configuration of the same type.
//!
//! Counts are kept independently of the shards ([`RefCounts`]). `alloc` sets
//! a frame's count to 1, [`FrameAllocator::increment_refcount`] adds a
//! sharer, and [`FrameAllocator::free`] drops one reference. Only the caller
//! that takes a frame's count to zero puts it back, onto its own core's list.
//!
//! No two allocator locks are ever held at the same time.

use crate::free_list::{FrameIndex, FrameLinks, FreeList};
use crate::refcount::RefCounts;
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_info::memory::{JUNK_ON_ALLOC, JUNK_ON_FREE, PAGE_SHIFT, PAGE_SIZE};
use kernel_info::param::{NCPU, STEAL_QUOTA};
use kernel_sync::{BootCpu, CurrentCpu, SpinLock};
use kernel_vmem::{PhysAddr, PhysMapper, PhysMapperExt};
use log::{debug, error, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// No free frame on any shard, even after stealing.
    #[error("out of physical frames")]
    OutOfFrames,
}

/// Runtime knobs of a [`FrameAllocator`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameAllocatorConfig {
    /// Number of free lists; one per core for the sharded variant.
    pub shards: usize,
    /// Upper bound on frames moved by one stealing pass.
    pub steal_quota: usize,
    /// Overwrite frames with [`JUNK_ON_ALLOC`] / [`JUNK_ON_FREE`].
    pub junk_fill: bool,
}

impl FrameAllocatorConfig {
    /// One free list per core; at most [`NCPU`].
    #[must_use]
    pub fn sharded(shards: usize) -> Self {
        Self {
            shards,
            ..Self::default()
        }
    }
}

impl Default for FrameAllocatorConfig {
    fn default() -> Self {
        Self {
            shards: 1,
            steal_quota: STEAL_QUOTA,
            junk_fill: cfg!(feature = "junk-fill"),
        }
    }
}

pub struct FrameAllocator<M: PhysMapper, C: CurrentCpu = BootCpu> {
    mapper: M,
    cpu: C,
    /// Address of frame 0.
    start: PhysAddr,
    nframes: usize,
    lists: Box<[SpinLock<FreeList>]>,
    links: FrameLinks,
    refs: RefCounts,
    steal_quota: usize,
    junk_fill: bool,
}

impl<M: PhysMapper> FrameAllocator<M, BootCpu> {
    /// A single globally locked free list over `[start, end)`.
    pub fn global(mapper: M, start: PhysAddr, end: PhysAddr) -> Self {
        Self::new(mapper, BootCpu, start, end, FrameAllocatorConfig::default())
    }
}

impl<M: PhysMapper, C: CurrentCpu> FrameAllocator<M, C> {
    /// Take ownership of the frames in `[start, end)`.
    ///
    /// `start` is rounded up to a page boundary and a trailing partial page
    /// is ignored. Every frame starts out free with a reference count of 0.
    /// Shard `s` receives the `s`-th contiguous chunk of the range.
    ///
    /// `mapper` must be able to reach every frame of the range; with junk
    /// filling enabled each frame is written once here.
    ///
    /// # Panics
    /// If `config.shards` exceeds [`NCPU`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(
        mapper: M,
        cpu: C,
        start: PhysAddr,
        end: PhysAddr,
        config: FrameAllocatorConfig,
    ) -> Self {
        let start = start.page_round_up();
        let nframes = if end > start {
            ((end - start) >> PAGE_SHIFT) as usize
        } else {
            0
        };
        let shards = config.shards.max(1);
        if shards > NCPU {
            error!("frame allocator: {shards} shards requested, at most {NCPU} cores");
            panic!("kinit: more shards than cores");
        }

        let links = FrameLinks::new(nframes);
        let mut lists: Vec<SpinLock<FreeList>> =
            (0..shards).map(|_| SpinLock::new(FreeList::new())).collect();

        let per_shard = nframes.div_ceil(shards).max(1);
        let addr_of = |frame: FrameIndex| start + ((frame as u64) << PAGE_SHIFT);

        // Push highest first so each shard hands out its lowest frame first.
        for frame in (0..nframes).rev() {
            if config.junk_fill {
                unsafe { mapper.frame_mut(addr_of(frame)) }.fill(JUNK_ON_FREE);
            }
            lists[frame / per_shard].get_mut().push(&links, frame);
        }

        debug!(
            "frame allocator: {nframes} frames at {start}, {shards} shard(s), steal quota {}",
            config.steal_quota
        );

        Self {
            mapper,
            cpu,
            start,
            nframes,
            lists: lists.into_boxed_slice(),
            links,
            refs: RefCounts::new(nframes, shards),
            steal_quota: config.steal_quota.max(1),
            junk_fill: config.junk_fill,
        }
    }

    /// Allocate one frame with a reference count of 1.
    ///
    /// # Errors
    /// [`AllocError::OutOfFrames`] if neither the caller's shard nor a
    /// stealing pass over the other shards yields a frame. With several
    /// shards and concurrent stealing this can be transient: frames moving
    /// between lists during the pass are missed.
    pub fn alloc(&self) -> Result<PhysAddr, AllocError> {
        let me = self.current_shard();
        let frame = match self.lists[me].with_lock(|list| list.pop(&self.links)) {
            Some(frame) => frame,
            None => self.steal(me).ok_or_else(|| {
                warn!("frame allocator exhausted (shard {me})");
                AllocError::OutOfFrames
            })?,
        };

        // Off every list now; nobody else can reach this frame.
        self.refs.claim(frame);
        let pa = self.frame_addr(frame);
        if self.junk_fill {
            unsafe { self.mapper.frame_mut(pa) }.fill(JUNK_ON_ALLOC);
        }
        Ok(pa)
    }

    /// Drop one reference to the frame at `pa`.
    ///
    /// The frame returns to the calling core's free list when its count
    /// reaches zero.
    ///
    /// # Panics
    /// If `pa` is not page aligned, lies outside the managed range, or the
    /// frame is already free.
    pub fn free(&self, pa: PhysAddr) {
        let frame = self.index_of(pa, "kfree");
        if self.refs.decrement(frame) > 0 {
            return;
        }

        if self.junk_fill {
            unsafe { self.mapper.frame_mut(pa) }.fill(JUNK_ON_FREE);
        }
        let me = self.current_shard();
        self.lists[me].with_lock(|list| list.push(&self.links, frame));
    }

    /// Register one more sharer of the allocated frame at `pa`.
    ///
    /// # Panics
    /// Same conditions as [`free`](Self::free).
    pub fn increment_refcount(&self, pa: PhysAddr) {
        let frame = self.index_of(pa, "refcnt_inc");
        self.refs.increment(frame);
    }

    /// Current reference count of the frame at `pa`; 0 means free.
    ///
    /// # Panics
    /// If `pa` is unaligned or outside the managed range.
    #[must_use]
    pub fn refcount(&self, pa: PhysAddr) -> u32 {
        self.refs.get(self.index_of(pa, "refcount"))
    }

    /// Frames currently free on all shards.
    ///
    /// Each shard is sampled under its own lock, one after another, so the
    /// sum is only exact while nobody allocates or frees.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        (0..self.lists.len()).map(|s| self.free_frames_on(s)).sum()
    }

    /// [`free_frames`](Self::free_frames) in bytes.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_frames() as u64 * PAGE_SIZE
    }

    /// Frames currently free on one shard.
    #[must_use]
    pub fn free_frames_on(&self, shard: usize) -> usize {
        self.lists[shard].with_lock(|list| list.len())
    }

    #[inline]
    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.nframes
    }

    #[inline]
    #[must_use]
    pub fn shards(&self) -> usize {
        self.lists.len()
    }

    /// Whether `pa` lies within a managed frame.
    #[must_use]
    pub fn contains(&self, pa: PhysAddr) -> bool {
        pa >= self.start && ((pa - self.start) >> PAGE_SHIFT) < self.nframes as u64
    }

    /// The mapper used to touch frame contents.
    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[inline]
    fn current_shard(&self) -> usize {
        self.cpu.cpu_id() % self.lists.len()
    }

    #[inline]
    fn frame_addr(&self, frame: FrameIndex) -> PhysAddr {
        self.start + ((frame as u64) << PAGE_SHIFT)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn index_of(&self, pa: PhysAddr, op: &str) -> FrameIndex {
        if !pa.is_page_aligned() || !self.contains(pa) {
            error!("{op}: {pa} is not a managed frame address");
            panic!("{op}: bad frame address {pa}");
        }
        ((pa - self.start) >> PAGE_SHIFT) as usize
    }

    /// One bounded pass over the other shards.
    ///
    /// Victim locks are taken one at a time and never together with the
    /// thief's own lock.
    fn steal(&self, me: usize) -> Option<FrameIndex> {
        let n = self.lists.len();
        let mut batch = FreeList::new();
        for i in 1..n {
            let want = self.steal_quota - batch.len();
            if want == 0 {
                break;
            }
            let victim = (me + i) % n;
            self.lists[victim].with_lock(|list| list.drain_into(&self.links, &mut batch, want));
        }

        let frame = batch.pop(&self.links)?;
        debug!("shard {me} stole {} frame(s)", batch.len() + 1);
        if !batch.is_empty() {
            self.lists[me].with_lock(|list| list.append(&self.links, &mut batch));
        }
        Some(frame)
    }
}
