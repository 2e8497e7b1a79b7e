use core::sync::atomic::{AtomicU64, Ordering};

/// Monotonic tick counter, driven by the timer interrupt.
///
/// The cache stamps a buffer with the current tick when its last user lets
/// go; eviction picks the smallest stamp.
pub trait TickSource: Sync {
    fn ticks(&self) -> u64;
}

impl TickSource for AtomicU64 {
    #[inline]
    fn ticks(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }
}

impl<T: TickSource + ?Sized> TickSource for &T {
    #[inline]
    fn ticks(&self) -> u64 {
        (**self).ticks()
    }
}
