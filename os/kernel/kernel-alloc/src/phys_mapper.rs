//! # HHDM-based `PhysMapper`
//!
//! The kernel sees all of physical memory at `HHDM_BASE + pa`, so touching a
//! frame (junk filling, copying a COW page) is a constant offset away.
//!
//! Tests and other hosted users plug in their own [`PhysMapper`] backed by
//! ordinary heap memory instead.

use kernel_info::memory::HHDM_BASE;
use kernel_vmem::{PhysAddr, PhysMapper};

/// [`PhysMapper`] for kernels with a higher-half direct map.
///
/// The direct map must be present and writable for every physical address
/// that is dereferenced through it; the frame allocator only ever passes
/// addresses of frames it manages.
#[derive(Debug, Default, Clone, Copy)]
pub struct HhdmPhysMapper;

impl HhdmPhysMapper {
    /// Virtual address at which the direct map exposes `pa`.
    #[inline]
    #[must_use]
    pub const fn virt_of(pa: PhysAddr) -> u64 {
        HHDM_BASE + pa.as_u64()
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_ptr<T>(&self, pa: PhysAddr) -> *mut T {
        Self::virt_of(pa) as *mut T
    }
}
