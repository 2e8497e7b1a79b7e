//! # Physical Memory and Copy-on-Write
//!
//! The physical page allocator of the kernel and the copy-on-write fork
//! machinery built on its reference counts.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Copy-on-Write Resolver (cow)           │
//! │    • share pages on fork, privatize on write fault  │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │ alloc / free / refcount  │ lookup / map / unmap
//! ┌──────────▼──────────────────┐  ┌────▼───────────────┐
//! │  Frame Allocator            │  │  PageTable         │
//! │  (frame_alloc)              │  │  (kernel-vmem)     │
//! │  • per-core free lists      │  └────────────────────┘
//! │  • bounded work stealing    │
//! │  • per-frame refcounts      │
//! └──────────┬──────────────────┘
//!            │ touch frame bytes
//! ┌──────────▼──────────────────┐
//! │  PhysMapper (phys_mapper)   │
//! └─────────────────────────────┘
//! ```
//!
//! ## Frame allocator
//!
//! [`FrameAllocator`] owns a fixed physical range. It is built once at boot
//! (typically into a [`SyncOnceCell`](kernel_sync::SyncOnceCell)) and used
//! through `&self` from every core afterwards.
//!
//! - [`FrameAllocator::global`] builds the single-list variant.
//! - [`FrameAllocator::new`] with [`FrameAllocatorConfig::sharded`] builds one
//!   free list per core; an empty core steals a bounded batch from its peers.
//!
//! Both variants track a reference count per frame, so a frame shared by
//! several address spaces goes back to a free list only once the last of them
//! lets go.
//!
//! Running out of frames is an ordinary [`AllocError`]. Freeing an address
//! the allocator does not own, or a frame that is already free, panics.
//!
//! ## Copy-on-write
//!
//! [`CowResolver`] moves page-table entries between Private and
//! Shared-Pending (see [`PageEntryBits`](kernel_vmem::PageEntryBits)).
//!
//! ## Example
//! ```rust
//! use kernel_alloc::{FrameAllocator, FrameAllocatorConfig};
//! use kernel_vmem::{PhysAddr, PhysMapper};
//!
//! #[repr(C, align(4096))]
//! struct Ram([u8; 4 * 4096]);
//!
//! struct Heap(*mut Ram);
//! impl PhysMapper for Heap {
//!     fn phys_to_ptr<T>(&self, pa: PhysAddr) -> *mut T {
//!         unsafe { self.0.cast::<u8>().add(pa.as_u64() as usize).cast() }
//!     }
//! }
//!
//! let ram = Box::into_raw(Box::new(Ram([0; 4 * 4096])));
//! let frames = FrameAllocator::global(Heap(ram), PhysAddr::new(0), PhysAddr::new(4 * 4096));
//! assert_eq!(frames.free_frames(), 4);
//!
//! let pa = frames.alloc().unwrap();
//! assert_eq!(frames.refcount(pa), 1);
//! frames.free(pa);
//! assert_eq!(frames.free_frames(), 4);
//! # drop(frames);
//! # drop(unsafe { Box::from_raw(ram) });
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod cow;
pub mod frame_alloc;
mod free_list;
pub mod phys_mapper;
mod refcount;

pub use crate::cow::{CowError, CowResolver, is_pending};
pub use crate::frame_alloc::{AllocError, FrameAllocator, FrameAllocatorConfig};
pub use crate::phys_mapper::HhdmPhysMapper;
