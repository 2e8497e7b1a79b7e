//! Copy-on-write fork support.
//!
//! Bridges the [`FrameAllocator`] and an address space's [`PageTable`]:
//!
//! ```text
//!   Private ──share_for_fork──► Shared-Pending ──resolve_fault──► Private
//!   RW=1 COW=0                  RW=0 COW=1 (both sides)           new frame
//! ```
//!
//! The side that faults first gets a private copy; the other side keeps the
//! original frame, still Shared-Pending, until it faults too or exits.
//!
//! # Example
//! ```ignore
//! let cow = CowResolver::new(&frames);
//! assert!(!is_pending(&child, va));
//! cow.share_for_fork(&mut parent, &mut child, va)?;
//! // ... later, on a store fault in the child:
//! match cow.resolve_fault(&mut child, fault_va) {
//!     Ok(_) => { /* retry the store */ }
//!     Err(CowError::NotCopyOnWrite(_)) => { /* genuine protection fault */ }
//!     Err(_) => { /* kill the process */ }
//! }
//! ```
//!
//! Callers serialize operations on one address space themselves and flush
//! the TLB after entries changed.

use crate::frame_alloc::{AllocError, FrameAllocator};
use kernel_info::memory::PAGE_SIZE;
use kernel_sync::CurrentCpu;
use kernel_vmem::{PageTable, PageTableError, PhysAddr, PhysMapper, PhysMapperExt, VirtAddr};
use log::{debug, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CowError {
    /// The fault is not ours to fix; the caller treats it as a genuine
    /// protection violation.
    #[error("{0} is not a pending copy-on-write page")]
    NotCopyOnWrite(VirtAddr),
    #[error("no frame for the private copy: {0}")]
    OutOfMemory(#[from] AllocError),
    #[error("page table update failed: {0}")]
    Map(#[from] PageTableError),
    /// A kernel copy targeted a page user space may not write.
    #[error("{0} is not writable user memory")]
    NotWritable(VirtAddr),
}

/// Whether a store to `va` would hit a Shared-Pending user page.
///
/// Asked by the trap handler on a store fault and by kernel copies into
/// user memory.
pub fn is_pending<P: PageTable + ?Sized>(table: &P, va: VirtAddr) -> bool {
    table
        .lookup(va.page_round_down())
        .is_some_and(|e| e.present() && e.user_access() && e.copy_on_write())
}

/// Minimal copy-on-write manager over one frame allocator.
pub struct CowResolver<'f, M: PhysMapper, C: CurrentCpu> {
    frames: &'f FrameAllocator<M, C>,
}

impl<'f, M: PhysMapper, C: CurrentCpu> CowResolver<'f, M, C> {
    pub const fn new(frames: &'f FrameAllocator<M, C>) -> Self {
        Self { frames }
    }

    /// Give the page containing `va` a private, writable frame.
    ///
    /// The old frame loses the reference this mapping held and is freed if
    /// that was the last one. The copy is made even when this mapping turns
    /// out to be the last sharer.
    ///
    /// Returns the new frame.
    ///
    /// # Errors
    /// - [`CowError::NotCopyOnWrite`] if the page is absent or not
    ///   Shared-Pending; nothing was changed.
    /// - [`CowError::OutOfMemory`] if no frame is available; the entry stays
    ///   Shared-Pending.
    /// - [`CowError::Map`] if the page table rejects the update. If `unmap`
    ///   failed nothing changed. If the final `map` failed the page is left
    ///   unmapped and its reference to the old frame is already dropped; the
    ///   address space is unusable and the caller must terminate the process.
    pub fn resolve_fault<P: PageTable + ?Sized>(
        &self,
        table: &mut P,
        va: VirtAddr,
    ) -> Result<PhysAddr, CowError> {
        let page = va.page_round_down();
        let entry = table
            .lookup(page)
            .filter(|e| e.present() && e.copy_on_write())
            .ok_or(CowError::NotCopyOnWrite(va))?;
        let old = entry.physical_address();

        let new = self.frames.alloc().inspect_err(|_| {
            warn!("cow: no frame to privatize {page}");
        })?;

        // Our mapping still holds a reference to `old`, so it can't be freed
        // or written while we read it.
        unsafe { self.frames.mapper().copy_frame(old, new) };

        if let Err(e) = table.unmap(page, 1) {
            self.frames.free(new);
            return Err(e.into());
        }
        self.frames.free(old);

        if let Err(e) = table.map(page, PAGE_SIZE, new, entry.flags().into_private()) {
            warn!("cow: remapping {page} failed: {e}");
            self.frames.free(new);
            return Err(e.into());
        }

        debug!("cow: {page} {old} -> {new}");
        Ok(new)
    }

    /// Share the page at `va` of `parent` with `child`.
    ///
    /// A writable entry turns Shared-Pending in both tables; a read-only one
    /// is mapped as is. Either way the frame gains a reference for the child.
    ///
    /// # Errors
    /// [`CowError::Map`] if `parent` has no page at `va` or `child` can't
    /// map it; `parent` is left untouched in that case.
    pub fn share_for_fork<P, Q>(
        &self,
        parent: &mut P,
        child: &mut Q,
        va: VirtAddr,
    ) -> Result<(), CowError>
    where
        P: PageTable + ?Sized,
        Q: PageTable + ?Sized,
    {
        let page = va.page_round_down();
        let entry = parent
            .lookup(page)
            .filter(|e| e.present())
            .ok_or(PageTableError::NotMapped(page))?;
        let shared = entry.into_copy_on_write();
        let pa = shared.physical_address();

        child.map(page, PAGE_SIZE, pa, shared.flags())?;
        self.frames.increment_refcount(pa);
        if let Some(e) = parent.lookup_mut(page) {
            *e = shared;
        }
        Ok(())
    }

    /// Copy `bytes` into user memory at `va`, privatizing Shared-Pending
    /// pages on the way instead of scribbling over a shared frame.
    ///
    /// # Errors
    /// [`CowError::NotWritable`] at the first page that is absent or not
    /// user-writable; anything [`resolve_fault`](Self::resolve_fault)
    /// returns. Bytes before the failing page have been written.
    #[allow(clippy::cast_possible_truncation)]
    pub fn copy_out<P: PageTable + ?Sized>(
        &self,
        table: &mut P,
        va: VirtAddr,
        bytes: &[u8],
    ) -> Result<(), CowError> {
        let mut va = va;
        let mut src = bytes;
        while !src.is_empty() {
            let page = va.page_round_down();
            if is_pending(table, page) {
                self.resolve_fault(table, page)?;
            }
            let entry = table
                .lookup(page)
                .filter(|e| e.present() && e.user_access() && e.writable())
                .ok_or(CowError::NotWritable(va))?;

            let offset = va.page_offset() as usize;
            let n = src.len().min(PAGE_SIZE as usize - offset);
            // Writable and not pending: this address space is the only sharer.
            let frame = unsafe { self.frames.mapper().frame_mut(entry.physical_address()) };
            frame[offset..offset + n].copy_from_slice(&src[..n]);

            src = &src[n..];
            va = va + n as u64;
        }
        Ok(())
    }

    /// Unmap `npages` pages starting at `va` and drop their frame references,
    /// as on process exit. Holes are skipped.
    ///
    /// Returns the number of pages that were mapped.
    ///
    /// # Errors
    /// [`CowError::Map`] if the page table refuses to unmap a present page.
    pub fn release_range<P: PageTable + ?Sized>(
        &self,
        table: &mut P,
        va: VirtAddr,
        npages: u64,
    ) -> Result<usize, CowError> {
        let base = va.page_round_down();
        let mut released = 0;
        for i in 0..npages {
            let page = base + i * PAGE_SIZE;
            let Some(entry) = table.lookup(page).filter(|e| e.present()) else {
                continue;
            };
            table.unmap(page, 1)?;
            self.frames.free(entry.physical_address());
            released += 1;
        }
        Ok(released)
    }
}
