use crate::addresses::PhysAddr;
use bitfield_struct::bitfield;

/// A single 64-bit leaf page table entry in its raw bitfield form.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty |
/// | 7         | `PAT`             | Page attribute table index |
/// | 8         | `G`               | Global |
/// | 9         | `COW` (OS)        | Copy-on-write pending |
/// | 10–11     | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Reserved for OS use |
/// | 59–62     | `PKU` / OS use    | Protection key or OS use |
/// | 63        | `NX`              | Execute disable |
///
/// ### Copy-on-write
///
/// Bit 9 is ignored by the MMU; the kernel uses it to tag an entry whose
/// frame is shared after `fork`. Such an entry is never writable: the first
/// write faults, and the fault handler replaces the entry with a private copy.
///
/// Invariant: `copy_on_write` set implies `writable` clear and the mapped
/// frame's reference count is (or was, at fork time) greater than one.
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{PageEntryBits, PhysAddr};
/// let e = PageEntryBits::new_user_rw().with_physical_address(PhysAddr::new(0x8000_3000));
/// let shared = e.into_copy_on_write();
/// assert!(shared.copy_on_write() && !shared.writable());
/// assert_eq!(shared.physical_address(), PhysAddr::new(0x8000_3000));
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write.
    pub dirty: bool,

    /// PAT index bit for 4 KiB leaves (bit 7).
    pub pat: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// Copy-on-write pending (OS bit 9).
    pub copy_on_write: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (PKU, bits 59..=62) if supported; otherwise OS use.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysAddr) {
        // store bits [51:12]
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysAddr) -> Self {
        self.set_physical_address(phys);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysAddr {
        PhysAddr::new(self.phys_addr_bits_51_12() << 12)
    }

    /// Permission and attribute bits only, with the frame address cleared.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> Self {
        self.with_phys_addr_bits_51_12(0)
    }

    #[inline]
    #[must_use]
    pub const fn new_user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_no_execute(true)
    }

    #[inline]
    #[must_use]
    pub const fn new_user_ro() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(false)
            .with_user_access(true)
            .with_no_execute(true)
    }

    /// Private → Shared-Pending: withhold write permission and tag the entry.
    ///
    /// Entries that were read-only to begin with are returned unchanged; they
    /// can be shared without ever being copied.
    #[inline]
    #[must_use]
    pub const fn into_copy_on_write(self) -> Self {
        if self.writable() {
            self.with_writable(false).with_copy_on_write(true)
        } else {
            self
        }
    }

    /// Shared-Pending → Private: restore write permission and clear the tag.
    #[inline]
    #[must_use]
    pub const fn into_private(self) -> Self {
        self.with_copy_on_write(false).with_writable(true)
    }
}
