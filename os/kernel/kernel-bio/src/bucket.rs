//! One hash partition of the buffer pool.

use arrayvec::ArrayVec;
use core::fmt;
use kernel_info::param::{NBUCKET, NBUF};

/// Identity of a cached block.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}

impl BlockId {
    #[inline]
    #[must_use]
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }

    /// Home bucket; keyed on the block number only.
    #[inline]
    #[must_use]
    pub const fn bucket(self) -> usize {
        self.blockno as usize % NBUCKET
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// Cache metadata of one buffer; the payload lives in the pool's slot
/// `slot`, which never changes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    pub slot: usize,
    /// `None` until the buffer first holds a block.
    pub key: Option<BlockId>,
    pub refcnt: u32,
    /// Tick at which `refcnt` last dropped to zero.
    pub ticks: u64,
}

impl Entry {
    pub const fn unused(slot: usize) -> Self {
        Self {
            slot,
            key: None,
            refcnt: 0,
            ticks: 0,
        }
    }
}

/// The buffers whose current block hashes here.
///
/// Entries are never reordered on use; recency is only the `ticks` stamp.
#[derive(Debug, Default)]
pub(crate) struct Bucket {
    entries: ArrayVec<Entry, NBUF>,
}

impl Bucket {
    pub fn find_mut(&mut self, id: BlockId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.key == Some(id))
    }

    pub fn find_slot_mut(&mut self, slot: usize) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.slot == slot)
    }

    /// Take a reference on the resident buffer for `id`, if any.
    pub fn acquire(&mut self, id: BlockId) -> Option<usize> {
        let e = self.find_mut(id)?;
        e.refcnt += 1;
        Some(e.slot)
    }

    /// Position and stamp of the unreferenced entry with the smallest
    /// stamp; the earliest such entry wins a tie.
    pub fn lru_victim(&self) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;
        for (pos, e) in self.entries.iter().enumerate() {
            if e.refcnt == 0 && best.is_none_or(|(_, t)| e.ticks < t) {
                best = Some((pos, e.ticks));
            }
        }
        best
    }

    pub fn get_mut(&mut self, pos: usize) -> &mut Entry {
        &mut self.entries[pos]
    }

    pub fn remove(&mut self, pos: usize) -> Entry {
        self.entries.remove(pos)
    }

    /// Buckets partition a pool of at most `NBUF` buffers, so this never
    /// exceeds the capacity.
    pub fn insert(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn keys(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.entries.iter().filter_map(|e| e.key)
    }
}
