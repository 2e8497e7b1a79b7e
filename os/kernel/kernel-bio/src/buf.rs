use crate::bucket::BlockId;
use crate::cache::BufferPool;
use crate::clock::TickSource;
use crate::device::Block;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use kernel_sync::SleepLockGuard;

/// A locked, referenced buffer.
///
/// Owning a `Buf` means holding the buffer's sleep lock, so its contents can
/// be read and written freely. Dropping it is `brelse`: the sleep lock is
/// released first, then the reference, stamping the buffer's recency when
/// it was the last one.
pub struct Buf<'a> {
    pub(crate) pool: &'a BufferPool,
    pub(crate) clock: &'a dyn TickSource,
    pub(crate) id: BlockId,
    pub(crate) slot: usize,
    pub(crate) data: ManuallyDrop<SleepLockGuard<'a, Block>>,
}

impl Buf<'_> {
    #[inline]
    #[must_use]
    pub const fn dev(&self) -> u32 {
        self.id.dev
    }

    #[inline]
    #[must_use]
    pub const fn blockno(&self) -> u32 {
        self.id.blockno
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Whether the contents were loaded from (or written to) the device.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.pool.is_valid(self.slot)
    }

    #[inline]
    pub(crate) fn mark_valid(&self) {
        self.pool.set_valid(self.slot);
    }

    #[inline]
    pub(crate) fn holds_lock(&self) -> bool {
        self.data.lock().is_locked()
    }
}

impl Deref for Buf<'_> {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.data
    }
}

impl DerefMut for Buf<'_> {
    fn deref_mut(&mut self) -> &mut Block {
        &mut self.data
    }
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        debug_assert!(self.holds_lock(), "brelse: sleep lock not held");
        // SAFETY: `data` is never touched again.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.pool.unref(self.id, self.slot, self.clock);
    }
}

impl core::fmt::Debug for Buf<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buf")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}
