//! # Virtual Memory Support
//!
//! The address and page-table vocabulary shared by the physical allocator and
//! the copy-on-write fault path.
//!
//! ## What you get
//! - Tiny [`PhysAddr`]/[`VirtAddr`] newtypes (u64) to avoid mixing address kinds.
//! - [`PageEntryBits`], an x86-64 leaf entry with an OS-defined
//!   copy-on-write bit.
//! - The [`PageTable`] trait: lookup/map/unmap on a single address space,
//!   implemented by the architecture code.
//! - The [`PhysMapper`] trait: how the kernel touches the bytes of a
//!   physical frame.
//!
//! ## Copy-on-write entry states
//!
//! ```text
//!   Private ──fork──► Shared-Pending ──write fault──► Private (new frame)
//!   RW=1 COW=0        RW=0 COW=1                      RW=1 COW=0
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod addresses;
mod page_entry_bits;
mod page_table;

pub use crate::addresses::{PhysAddr, VirtAddr, align_down, align_up};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{PageTable, PageTableError};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// The contents of one physical page frame.
pub type Frame = [u8; info::PAGE_SIZE as usize];

/// Converts physical addresses to *temporarily* usable pointers in the
/// current virtual address space (e.g., via identity map or a higher-half
/// direct map, HHDM).
///
/// Typical patterns:
/// - **Kernel**: uses HHDM; adds a constant offset before returning a pointer.
/// - **Tests**: back "physical memory" with a heap allocation and offset into it.
pub trait PhysMapper {
    /// Where the bytes at `pa` are visible right now.
    ///
    /// Computing the pointer is harmless; dereferencing it is subject to the
    /// rules of [`phys_to_mut`](Self::phys_to_mut).
    fn phys_to_ptr<T>(&self, pa: PhysAddr) -> *mut T;

    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped as writable in the current address space and stay
    ///   mapped for `'a`.
    /// - `T` must match the bytes at `pa`, and the caller must guarantee no
    ///   other live reference aliases them for `'a`.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr::<T>(pa) }
    }
}

/// Frame-granular access on top of any [`PhysMapper`].
pub trait PhysMapperExt: PhysMapper {
    /// # Safety
    /// `pa` must be a page-aligned frame the caller exclusively owns for
    /// `'a`; see [`PhysMapper::phys_to_mut`].
    #[inline]
    unsafe fn frame_mut<'a>(&self, pa: PhysAddr) -> &'a mut Frame {
        debug_assert!(pa.is_page_aligned());
        unsafe { self.phys_to_mut::<Frame>(pa) }
    }

    /// Copy the whole frame at `src` over the frame at `dst`.
    ///
    /// `src` is only read, so other readers of a shared frame may run
    /// concurrently.
    ///
    /// # Safety
    /// Both frames must be mapped, `dst` must be exclusively owned by the
    /// caller, nobody may write `src` meanwhile, and `src != dst`.
    #[inline]
    unsafe fn copy_frame(&self, src: PhysAddr, dst: PhysAddr) {
        debug_assert!(src.is_page_aligned() && dst.is_page_aligned());
        debug_assert_ne!(src, dst);
        let from = self.phys_to_ptr::<Frame>(src).cast_const();
        let to = self.phys_to_ptr::<Frame>(dst);
        unsafe { core::ptr::copy_nonoverlapping(from, to, 1) };
    }
}

impl<T: PhysMapper + ?Sized> PhysMapperExt for T {}
