//! # Kernel Configuration
//!
//! This crate is the single source of truth for the compile-time parameters
//! shared by the memory-management crates: the physical memory layout the page
//! allocator manages, and the sizing of the block buffer cache.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Page geometry**: [`PAGE_SIZE`](memory::PAGE_SIZE) and [`PAGE_SHIFT`](memory::PAGE_SHIFT)
//! * **Managed RAM**: the physical window `[KERNBASE, PHYSTOP)` handed to the
//!   frame allocator at boot
//! * **Direct map**: [`HHDM_BASE`](memory::HHDM_BASE), where the kernel sees physical memory
//! * **Junk patterns**: the bytes written into frames on allocation and free
//!
//! ### Parameters ([`param`])
//! * **Buffer cache**: block size, pool capacity and bucket count
//! * **Allocator**: maximum number of cores and the per-steal frame quota
//!
//! ```text
//! Physical Memory Layout:
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Devices / firmware          │
//! KERNBASE    ├─────────────────────────────────┤ 0x8000_0000
//!             │   Kernel image, then free RAM   │
//!             │   (managed by the allocator)    │
//! PHYSTOP     └─────────────────────────────────┘ KERNBASE + 128 MiB
//! ```
//!
//! All values are `const` and validated by `const` assertions, so an invalid
//! configuration fails the build instead of the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod param;
