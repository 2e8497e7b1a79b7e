use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// Long-held lock.
///
/// Unlike a [`SpinLock`](crate::SpinLock), the holder of a `SleepLock` may
/// block (e.g. wait for a disk transfer) while keeping ownership, and it
/// does not suppress interrupts. Contending callers give up the CPU between
/// attempts instead of spinning with interrupts off.
///
/// Blocking on one `SleepLock` never holds up unrelated locks, so they are
/// meant to be scoped finely, e.g. one per cached disk block.
pub struct SleepLock<T> {
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Acquire the lock, yielding the CPU while someone else holds it.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                yield_cpu();
            }
        }
        SleepLockGuard { lock: self }
    }

    /// Try once; returns immediately.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SleepLockGuard { lock: self })
        }
    }

    /// Whether the lock is currently held.
    ///
    /// Only meaningful for assertions; the answer may be stale on return.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// Proof of holding a [`SleepLock`].
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

impl<'a, T> SleepLockGuard<'a, T> {
    /// The lock this guard holds.
    #[inline]
    pub const fn lock(&self) -> &'a SleepLock<T> {
        self.lock
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Give the CPU away while waiting for a sleep lock.
#[inline]
fn yield_cpu() {
    #[cfg(any(test, feature = "std"))]
    std::thread::yield_now();
    #[cfg(not(any(test, feature = "std")))]
    core::hint::spin_loop();
}
