//! The disk driver as the buffer cache sees it.

use kernel_info::param::BSIZE;

/// The payload of one disk block.
pub type Block = [u8; BSIZE];

/// A synchronous block device (e.g. the virtio disk driver).
///
/// Both calls return only once the transfer is complete. The caller holds
/// the buffer's sleep lock throughout, so implementations may block.
pub trait BlockDevice: Sync {
    /// Fill `data` with block `blockno` of device `dev`.
    ///
    /// # Errors
    /// Whatever the driver reports; the cache does not retry.
    fn read(&self, dev: u32, blockno: u32, data: &mut Block) -> Result<(), DeviceError>;

    /// Write `data` to block `blockno` of device `dev`.
    ///
    /// # Errors
    /// Whatever the driver reports; the cache does not retry.
    fn write(&self, dev: u32, blockno: u32, data: &Block) -> Result<(), DeviceError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    #[inline]
    fn read(&self, dev: u32, blockno: u32, data: &mut Block) -> Result<(), DeviceError> {
        (**self).read(dev, blockno, data)
    }

    #[inline]
    fn write(&self, dev: u32, blockno: u32, data: &Block) -> Result<(), DeviceError> {
        (**self).write(dev, blockno, data)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("I/O error on device {dev}, block {blockno}")]
    Io { dev: u32, blockno: u32 },
    #[error("no such device: {0}")]
    NoDevice(u32),
}
