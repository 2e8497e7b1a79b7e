//! # Block Buffer Cache
//!
//! Keeps recently used disk blocks in memory and serializes access to them.
//!
//! * Every block has at most one buffer, so all users of a block see the
//!   same bytes.
//! * A buffer is used by one holder at a time: [`BufferCache::read`] and
//!   [`BufferCache::get`] return a [`Buf`] holding the buffer's
//!   [`SleepLock`](kernel_sync::SleepLock). Only `read` loads the block.
//! * Writes go straight through to the device ([`BufferCache::write`]).
//! * When a block is not cached, the unreferenced buffer released longest
//!   ago is reused.
//!
//! ## Usage
//! ```rust
//! use core::sync::atomic::AtomicU64;
//! use kernel_bio::{Block, BlockDevice, BufferCache, DeviceError};
//!
//! struct Zeroes;
//! impl BlockDevice for Zeroes {
//!     fn read(&self, _: u32, _: u32, data: &mut Block) -> Result<(), DeviceError> {
//!         data.fill(0);
//!         Ok(())
//!     }
//!     fn write(&self, _: u32, _: u32, _: &Block) -> Result<(), DeviceError> {
//!         Ok(())
//!     }
//! }
//!
//! let ticks = AtomicU64::new(0);
//! let cache = BufferCache::new(Zeroes, &ticks);
//!
//! let mut b = cache.read(1, 42).unwrap();
//! b[0] = 0xFF;
//! cache.write(&b).unwrap();
//! cache.release(b);
//!
//! assert!(cache.is_cached(1, 42));
//! assert_eq!(cache.read(1, 42).unwrap()[0], 0xFF);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod buf;
mod bucket;
mod cache;
mod clock;
mod device;

pub use crate::buf::Buf;
pub use crate::bucket::BlockId;
pub use crate::cache::{BioError, BufferCache, CacheStats};
pub use crate::clock::TickSource;
pub use crate::device::{Block, BlockDevice, DeviceError};
pub use kernel_info::param::{BSIZE, NBUCKET, NBUF};
