//! # Buffer cache
//!
//! A fixed pool of buffers, each caching one disk block, hashed into
//! [`NBUCKET`] buckets by block number.
//!
//! ```text
//!              alloc_lock (misses and evictions only)
//!                       │
//!   bucket 0   ─► [ 0:13 ][ 0:26 ][  —   ]
//!   bucket 1   ─► [ 0:1  ][ 1:14 ]
//!     ...
//!   bucket 12  ─► [ 0:12 ][  —   ]
//!                    │
//!                    └─ slot ─► SleepLock<[u8; BSIZE]> + valid
//! ```
//!
//! Lookups of resident blocks only lock the home bucket. A miss takes the
//! global `alloc_lock`, looks again (another core may have loaded the block
//! meanwhile), then scans all buckets for the unreferenced buffer with the
//! oldest release stamp and moves it to the home bucket.
//!
//! Lock order: `alloc_lock` before any bucket lock. A bucket lock is never
//! held while waiting for `alloc_lock`, and no spin lock is held while
//! waiting for a buffer's sleep lock or talking to the device.

use crate::buf::Buf;
use crate::bucket::{BlockId, Bucket, Entry};
use crate::clock::TickSource;
use crate::device::{Block, BlockDevice, DeviceError};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem::ManuallyDrop;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use kernel_info::param::{BSIZE, NBUCKET, NBUF};
use kernel_sync::{SleepLock, SpinLock, SpinLockGuard};
use log::{error, trace};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BioError {
    #[error("block device failed: {0}")]
    Device(#[from] DeviceError),
}

/// Counters since the cache was built.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found the block resident.
    pub hits: u64,
    /// Lookups that had to take over a buffer.
    pub misses: u64,
    /// Misses that displaced a previously cached block.
    pub evictions: u64,
}

/// The payload half of a buffer.
struct Slot {
    /// Contents reflect the device. Written by the sleep-lock holder, or by
    /// the evicting core while nobody references the buffer.
    valid: AtomicBool,
    data: SleepLock<Block>,
}

/// Everything a [`Buf`] needs to give itself back.
pub(crate) struct BufferPool {
    alloc_lock: SpinLock<()>,
    buckets: [SpinLock<Bucket>; NBUCKET],
    slots: Box<[Slot]>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Best eviction candidate seen so far, with its bucket still locked.
struct Victim<'a> {
    bucket: usize,
    guard: SpinLockGuard<'a, Bucket>,
    pos: usize,
    ticks: u64,
}

impl BufferPool {
    fn new(nbuf: usize) -> Self {
        let slots: Vec<Slot> = (0..nbuf)
            .map(|_| Slot {
                valid: AtomicBool::new(false),
                data: SleepLock::new([0; BSIZE]),
            })
            .collect();

        let mut buckets: [SpinLock<Bucket>; NBUCKET] =
            core::array::from_fn(|_| SpinLock::new(Bucket::default()));
        for slot in 0..nbuf {
            buckets[slot % NBUCKET].get_mut().insert(Entry::unused(slot));
        }

        Self {
            alloc_lock: SpinLock::new(()),
            buckets,
            slots: slots.into_boxed_slice(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn is_valid(&self, slot: usize) -> bool {
        self.slots[slot].valid.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_valid(&self, slot: usize) {
        self.slots[slot].valid.store(true, Ordering::Release);
    }

    /// Drop one reference to the buffer in `slot`, currently caching `id`.
    pub(crate) fn unref(&self, id: BlockId, slot: usize, clock: &dyn TickSource) {
        let mut bucket = self.buckets[id.bucket()].lock();
        let Some(e) = bucket.find_slot_mut(slot) else {
            error!("brelse: buffer {slot} ({id:?}) missing from its bucket");
            panic!("brelse: buffer not in its bucket");
        };
        debug_assert!(e.refcnt > 0);
        e.refcnt -= 1;
        if e.refcnt == 0 {
            e.ticks = clock.ticks();
        }
    }

    /// Find the oldest unreferenced buffer in the whole pool, holding at most
    /// two bucket locks at any time. Must be called with `alloc_lock` held.
    fn find_victim(&self) -> Option<Victim<'_>> {
        let mut best: Option<Victim<'_>> = None;
        for (i, bucket) in self.buckets.iter().enumerate() {
            let guard = bucket.lock();
            let Some((pos, ticks)) = guard.lru_victim() else {
                continue;
            };
            if best.as_ref().is_none_or(|b| ticks < b.ticks) {
                // Unlocks the previous candidate's bucket out of acquisition
                // order; `alloc_lock` is held for the whole scan.
                best = Some(Victim {
                    bucket: i,
                    guard,
                    pos,
                    ticks,
                });
            }
        }
        best
    }

    /// Take over the oldest unreferenced buffer for `id` and return its
    /// slot, with one reference held. Must be called with `alloc_lock` held
    /// and `id` known not to be resident.
    fn recycle(&self, id: BlockId) -> usize {
        let Some(mut victim) = self.find_victim() else {
            error!("bget: every buffer is in use, cannot cache {id:?}");
            panic!("bget: no buffers");
        };

        let home = id.bucket();
        let entry = victim.guard.get_mut(victim.pos);
        let slot = entry.slot;
        let old = entry.key.replace(id);
        entry.refcnt = 1;
        self.slots[slot].valid.store(false, Ordering::Release);

        if victim.bucket != home {
            let entry = victim.guard.remove(victim.pos);
            drop(victim);
            self.buckets[home].lock().insert(entry);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = old {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!("bcache: {old:?} evicted for {id:?} (slot {slot})");
        } else {
            trace!("bcache: {id:?} takes unused slot {slot}");
        }
        slot
    }

    /// Reference the buffer for `id`, loading it into the pool if needed.
    fn get(&self, id: BlockId) -> usize {
        let home = &self.buckets[id.bucket()];
        if let Some(slot) = home.with_lock(|b| b.acquire(id)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("bcache: hit {id:?}");
            return slot;
        }

        let _alloc = self.alloc_lock.lock();
        if let Some(slot) = home.with_lock(|b| b.acquire(id)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("bcache: hit {id:?} after racing miss");
            return slot;
        }
        self.recycle(id)
    }

    fn pin(&self, id: BlockId, slot: usize) {
        let mut bucket = self.buckets[id.bucket()].lock();
        let Some(e) = bucket.find_slot_mut(slot) else {
            error!("bpin: buffer {slot} ({id:?}) missing from its bucket");
            panic!("bpin: buffer not in its bucket");
        };
        e.refcnt += 1;
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// The block buffer cache.
///
/// Built once at boot and shared by reference afterwards, e.g. from a
/// [`SyncOnceCell`](kernel_sync::SyncOnceCell).
pub struct BufferCache<D: BlockDevice, T: TickSource> {
    pool: BufferPool,
    device: D,
    clock: T,
}

impl<D: BlockDevice, T: TickSource> BufferCache<D, T> {
    /// A cache of [`NBUF`] buffers in front of `device`.
    pub fn new(device: D, clock: T) -> Self {
        Self::with_buffers(device, clock, NBUF)
    }

    /// A cache of `nbuf` buffers in front of `device`.
    ///
    /// # Panics
    /// Unless `1 <= nbuf <= NBUF`.
    pub fn with_buffers(device: D, clock: T, nbuf: usize) -> Self {
        assert!(
            (1..=NBUF).contains(&nbuf),
            "binit: pool size {nbuf} outside 1..={NBUF}"
        );
        Self {
            pool: BufferPool::new(nbuf),
            device,
            clock,
        }
    }

    /// Number of buffers in the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.slots.len()
    }

    /// `bget`: a locked buffer for `dev`/`blockno` without touching the
    /// device.
    ///
    /// The contents are only meaningful if [`Buf::is_valid`]; a caller about
    /// to overwrite the whole block can skip the read this way and
    /// [`write`](Self::write) it directly.
    ///
    /// # Panics
    /// If the block is not resident and every buffer is referenced.
    pub fn get(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let id = BlockId::new(dev, blockno);
        let slot = self.pool.get(id);
        // No spin lock is held any more; waiting here may take a while.
        let data = self.pool.slots[slot].data.lock();
        Buf {
            pool: &self.pool,
            clock: &self.clock,
            id,
            slot,
            data: ManuallyDrop::new(data),
        }
    }

    /// `bread`: a locked buffer holding the current contents of the block.
    ///
    /// # Errors
    /// [`BioError::Device`] if the block had to be read and the device
    /// failed. The buffer is released again and stays invalid.
    ///
    /// # Panics
    /// If the block is not resident and every buffer is referenced.
    pub fn read(&self, dev: u32, blockno: u32) -> Result<Buf<'_>, BioError> {
        let mut buf = self.get(dev, blockno);
        if !buf.is_valid() {
            self.device.read(dev, blockno, &mut buf)?;
            buf.mark_valid();
        }
        Ok(buf)
    }

    /// `bwrite`: write the buffer's contents through to the device.
    ///
    /// Afterwards the buffer matches the device, so it counts as valid even
    /// if it came from [`get`](Self::get) and was never read.
    ///
    /// # Errors
    /// [`BioError::Device`] if the device failed; validity is unchanged.
    pub fn write(&self, buf: &Buf<'_>) -> Result<(), BioError> {
        debug_assert!(buf.holds_lock(), "bwrite: sleep lock not held");
        self.device.write(buf.dev(), buf.blockno(), buf)?;
        buf.mark_valid();
        Ok(())
    }

    /// `brelse`; same as dropping the buffer.
    #[inline]
    pub fn release(&self, buf: Buf<'_>) {
        drop(buf);
    }

    /// Keep the block resident after `buf` is released, until a matching
    /// [`unpin`](Self::unpin).
    pub fn pin(&self, buf: &Buf<'_>) {
        self.pool.pin(buf.id, buf.slot);
    }

    /// Drop a reference taken by [`pin`](Self::pin).
    ///
    /// # Panics
    /// If the block is not resident or not referenced.
    pub fn unpin(&self, dev: u32, blockno: u32) {
        let id = BlockId::new(dev, blockno);
        let unpinned = self.pool.buckets[id.bucket()].with_lock(|b| match b.find_mut(id) {
            Some(e) if e.refcnt > 0 => {
                e.refcnt -= 1;
                if e.refcnt == 0 {
                    e.ticks = self.clock.ticks();
                }
                true
            }
            _ => false,
        });
        if !unpinned {
            error!("bunpin: {id:?} is not pinned");
            panic!("bunpin: block not pinned");
        }
    }

    /// Whether a buffer currently holds `dev`/`blockno`.
    #[must_use]
    pub fn is_cached(&self, dev: u32, blockno: u32) -> bool {
        let id = BlockId::new(dev, blockno);
        self.pool.buckets[id.bucket()].with_lock(|b| b.find_mut(id).is_some())
    }

    /// Every block that currently has a buffer, in bucket order.
    #[must_use]
    pub fn resident_blocks(&self) -> Vec<BlockId> {
        // Allocate up front; no allocation under a spin lock.
        let mut out = Vec::with_capacity(self.capacity());
        for bucket in &self.pool.buckets {
            bucket.with_lock(|b| out.extend(b.keys()));
        }
        out
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.pool.stats()
    }

    #[inline]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The source of release stamps.
    #[inline]
    pub const fn clock(&self) -> &T {
        &self.clock
    }
}
