#![allow(dead_code)]

use kernel_bio::{BSIZE, Block, BlockDevice, DeviceError};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// An in-memory disk. Unwritten blocks read as zeroes.
pub struct MemDisk {
    devices: u32,
    blocks: Mutex<HashMap<(u32, u32), Box<Block>>>,
    failing: Mutex<HashSet<(u32, u32)>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemDisk {
    /// Devices `0..devices` exist.
    pub fn new(devices: u32) -> Self {
        Self {
            devices,
            blocks: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make transfers of this block fail until [`heal`](Self::heal).
    pub fn break_block(&self, dev: u32, blockno: u32) {
        self.failing.lock().unwrap().insert((dev, blockno));
    }

    pub fn heal(&self, dev: u32, blockno: u32) {
        self.failing.lock().unwrap().remove(&(dev, blockno));
    }

    /// What the platter holds, bypassing the cache.
    pub fn peek(&self, dev: u32, blockno: u32) -> Block {
        self.blocks
            .lock()
            .unwrap()
            .get(&(dev, blockno))
            .map_or([0; BSIZE], |b| **b)
    }

    pub fn poke(&self, dev: u32, blockno: u32, byte: u8) {
        self.blocks
            .lock()
            .unwrap()
            .insert((dev, blockno), Box::new([byte; BSIZE]));
    }

    fn check(&self, dev: u32, blockno: u32) -> Result<(), DeviceError> {
        if dev >= self.devices {
            return Err(DeviceError::NoDevice(dev));
        }
        if self.failing.lock().unwrap().contains(&(dev, blockno)) {
            return Err(DeviceError::Io { dev, blockno });
        }
        Ok(())
    }
}

impl BlockDevice for MemDisk {
    fn read(&self, dev: u32, blockno: u32, data: &mut Block) -> Result<(), DeviceError> {
        self.check(dev, blockno)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        *data = self.peek(dev, blockno);
        Ok(())
    }

    fn write(&self, dev: u32, blockno: u32, data: &Block) -> Result<(), DeviceError> {
        self.check(dev, blockno)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blocks
            .lock()
            .unwrap()
            .insert((dev, blockno), Box::new(*data));
        Ok(())
    }
}

/// A clock the test advances by hand.
#[derive(Default)]
pub struct Ticks(pub AtomicU64);

impl Ticks {
    /// Starts at 1 so that every release is newer than a never-used buffer.
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl kernel_bio::TickSource for Ticks {
    fn ticks(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
