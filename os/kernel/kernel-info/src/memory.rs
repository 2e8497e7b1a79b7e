//! # Memory Layout

/// Size of one physical page frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// First physical address of RAM; the kernel image is loaded here.
pub const KERNBASE: u64 = 0x8000_0000;

/// One past the last physical address the page allocator manages.
pub const PHYSTOP: u64 = KERNBASE + 128 * 1024 * 1024;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything mapped at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Byte written over a frame when its last reference is dropped,
/// so that dangling readers see garbage instead of stale data.
pub const JUNK_ON_FREE: u8 = 0x01;

/// Byte written over a frame when it is handed out.
pub const JUNK_ON_ALLOC: u8 = 0x05;

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(KERNBASE.is_multiple_of(PAGE_SIZE));
    assert!(PHYSTOP.is_multiple_of(PAGE_SIZE));
    assert!(PHYSTOP > KERNBASE);
    assert!(JUNK_ON_FREE != JUNK_ON_ALLOC);
};
