//! The page-table operations the memory-management core relies on.

use crate::PageEntryBits;
use crate::addresses::{PhysAddr, VirtAddr};

/// Leaf-level view of one address space.
///
/// The walking, table allocation and TLB maintenance live with the
/// architecture code; this trait is only the slice of it that the
/// copy-on-write machinery needs. Each call is atomic with respect to the
/// caller's own locking of the address space.
///
/// Addresses passed in are page aligned by the caller.
pub trait PageTable {
    /// Leaf entry for the page containing `va`, if one exists.
    fn lookup(&self, va: VirtAddr) -> Option<PageEntryBits>;

    /// Mutable access to the leaf entry for `va`, for in-place permission
    /// changes (the caller is responsible for TLB invalidation).
    fn lookup_mut(&mut self, va: VirtAddr) -> Option<&mut PageEntryBits>;

    /// Map `[va, va + size)` to `[pa, pa + size)` with `flags` (whose frame
    /// address bits are ignored).
    ///
    /// # Errors
    /// [`PageTableError::AlreadyMapped`] if any page in the range is present,
    /// [`PageTableError::OutOfMemory`] if an intermediate table can't be built.
    fn map(
        &mut self,
        va: VirtAddr,
        size: u64,
        pa: PhysAddr,
        flags: PageEntryBits,
    ) -> Result<(), PageTableError>;

    /// Remove `npages` consecutive leaf entries starting at `va`.
    ///
    /// Frames are **not** released; whoever unmaps owns dropping the
    /// reference the mapping held.
    ///
    /// # Errors
    /// [`PageTableError::NotMapped`] if any page in the range is absent.
    fn unmap(&mut self, va: VirtAddr, npages: u64) -> Result<(), PageTableError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageTableError {
    #[error("no mapping at {0}")]
    NotMapped(VirtAddr),
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtAddr),
    #[error("out of memory for page tables")]
    OutOfMemory,
    #[error("invalid virtual address {0}")]
    InvalidAddress(VirtAddr),
}
