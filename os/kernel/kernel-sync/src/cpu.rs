//! Core identity for per-core data structures.

/// Source of the index of the core the caller currently runs on.
///
/// Per-core structures (e.g. sharded free lists) ask this on every
/// operation. The answer only needs to be stable for the duration of the
/// caller's critical section; a thread migrating right after asking is fine,
/// it merely works on another core's shard.
///
/// Any `Fn() -> usize` works, which makes it easy to plug in a per-CPU block
/// reader in the kernel or a thread-local in tests:
///
/// ```
/// use kernel_sync::CurrentCpu;
///
/// fn always_two() -> usize {
///     2
/// }
///
/// assert_eq!(always_two.cpu_id(), 2);
/// ```
pub trait CurrentCpu: Sync {
    /// Index of the calling core, `0..NCPU`.
    fn cpu_id(&self) -> usize;
}

impl<F> CurrentCpu for F
where
    F: Fn() -> usize + Sync,
{
    #[inline]
    fn cpu_id(&self) -> usize {
        self()
    }
}

/// Single-core systems and early boot: everything runs on core 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct BootCpu;

impl CurrentCpu for BootCpu {
    #[inline]
    fn cpu_id(&self) -> usize {
        0
    }
}
