//! # Kernel synchronization primitives
//!
//! Two kinds of locks, and the rules for mixing them:
//!
//! * [`SpinLock`] guards **short** critical sections. It busy-waits and keeps
//!   local interrupts off for as long as the guard lives. Never block,
//!   allocate, or take a [`SleepLock`] while holding one.
//! * [`SleepLock`] may be held across slow operations such as device I/O.
//!   Its holder may block; waiters give up the CPU instead of burning it.
//!
//! [`SyncOnceCell`] holds the boot-time singletons built on top of these, and
//! [`CurrentCpu`] tells per-core data structures which core they run on.

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![allow(unsafe_code)]

pub mod cpu;
pub mod irq;
mod sleep_lock;
mod spin_lock;
mod sync_once_cell;

pub use cpu::{BootCpu, CurrentCpu};
pub use irq::IrqGuard;
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
