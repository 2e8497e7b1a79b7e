//! Local interrupt suppression.
//!
//! On bare-metal `x86_64` this toggles `IF` with `cli`/`sti`. Hosted builds
//! (unit tests, tooling) have no interrupts to mask, so the guard degrades to
//! a no-op there while keeping the same nesting behavior.

/// Returns whether local interrupts are currently enabled.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::interrupts_enabled()
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt state. If interrupts were
/// enabled, it disables them. On drop, it enables them **only** if they were
/// previously enabled, preserving the original state.
///
/// Nested guards therefore compose as long as the outermost one is dropped
/// last: inner guards see interrupts already off and never turn them back on,
/// so inner guards may be released in any order.
///
/// # Platform / Privilege
///
/// On bare-metal `x86_64` this requires a privileged context permitting
/// `cli/sti`.
///
/// # Examples
///
/// ```
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new(); // interrupts disabled here if previously enabled
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = arch::interrupts_enabled();
        if enabled {
            arch::disable();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    /// Restores interrupts only if they were previously enabled.
    fn drop(&mut self) {
        if self.were_enabled {
            arch::enable();
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    /// Bit 9 (`IF`) of `RFLAGS`.
    #[inline]
    pub fn interrupts_enabled() -> bool {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
        r & (1 << 9) != 0
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    #[inline]
    pub const fn disable() {}

    #[inline]
    pub const fn enable() {}

    #[inline]
    pub const fn interrupts_enabled() -> bool {
        false
    }
}
