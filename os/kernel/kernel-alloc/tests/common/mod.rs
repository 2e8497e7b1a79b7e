#![allow(dead_code)]

use kernel_alloc::{FrameAllocator, FrameAllocatorConfig};
use kernel_info::memory::{KERNBASE, PAGE_SIZE};
use kernel_vmem::{PageEntryBits, PageTable, PageTableError, PhysAddr, PhysMapper, VirtAddr};
use std::cell::{Cell, UnsafeCell};
use std::collections::BTreeMap;

pub const PAGE: usize = PAGE_SIZE as usize;

#[repr(C, align(4096))]
struct Page([u8; PAGE]);

/// "Physical memory" for hosted tests: `npages` heap pages that answer to
/// the physical addresses `[base, base + npages * PAGE_SIZE)`.
pub struct HeapMemory {
    base: u64,
    pages: Box<[UnsafeCell<Page>]>,
}

// Frames are handed out exclusively by the allocator under test.
unsafe impl Sync for HeapMemory {}

impl HeapMemory {
    pub fn new(npages: usize) -> Self {
        let pages: Vec<_> = (0..npages).map(|_| UnsafeCell::new(Page([0; PAGE]))).collect();
        Self {
            base: KERNBASE,
            pages: pages.into_boxed_slice(),
        }
    }

    pub fn start(&self) -> PhysAddr {
        PhysAddr::new(self.base)
    }

    pub fn end(&self) -> PhysAddr {
        PhysAddr::new(self.base + (self.pages.len() * PAGE) as u64)
    }

    /// Copy of the frame's bytes.
    pub fn snapshot(&self, pa: PhysAddr) -> Vec<u8> {
        let ptr = self.phys_to_ptr::<[u8; PAGE]>(pa);
        unsafe { (*ptr).to_vec() }
    }

    /// Whether every byte of the frame equals `byte`.
    pub fn filled_with(&self, pa: PhysAddr, byte: u8) -> bool {
        self.snapshot(pa).iter().all(|&b| b == byte)
    }

    pub fn fill(&self, pa: PhysAddr, byte: u8) {
        let ptr = self.phys_to_ptr::<[u8; PAGE]>(pa);
        unsafe { (*ptr).fill(byte) };
    }
}

impl PhysMapper for HeapMemory {
    fn phys_to_ptr<T>(&self, pa: PhysAddr) -> *mut T {
        let offset = usize::try_from(pa.as_u64() - self.base).unwrap();
        let page = &self.pages[offset / PAGE];
        page.get().cast::<u8>().wrapping_add(offset % PAGE).cast()
    }
}

thread_local! {
    static CPU: Cell<usize> = const { Cell::new(0) };
}

/// Pretend the calling thread runs on core `id`.
pub fn set_cpu(id: usize) {
    CPU.with(|c| c.set(id));
}

pub fn this_cpu() -> usize {
    CPU.with(Cell::get)
}

pub type Frames = FrameAllocator<HeapMemory, fn() -> usize>;

/// An allocator over `npages` fresh heap pages, junk filling on.
pub fn frames(npages: usize, shards: usize, steal_quota: usize) -> Frames {
    let mem = HeapMemory::new(npages);
    let (start, end) = (mem.start(), mem.end());
    let config = FrameAllocatorConfig {
        shards,
        steal_quota,
        junk_fill: true,
    };
    FrameAllocator::new(mem, this_cpu as fn() -> usize, start, end, config)
}

/// Leaf entries keyed by page address.
#[derive(Default)]
pub struct SoftPageTable {
    entries: BTreeMap<VirtAddr, PageEntryBits>,
    out_of_tables: bool,
}

impl SoftPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// From now on `map` fails as if no intermediate table could be built.
    pub fn run_out_of_tables(&mut self) {
        self.out_of_tables = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl PageTable for SoftPageTable {
    fn lookup(&self, va: VirtAddr) -> Option<PageEntryBits> {
        self.entries.get(&va.page_round_down()).copied()
    }

    fn lookup_mut(&mut self, va: VirtAddr) -> Option<&mut PageEntryBits> {
        self.entries.get_mut(&va.page_round_down())
    }

    fn map(
        &mut self,
        va: VirtAddr,
        size: u64,
        pa: PhysAddr,
        flags: PageEntryBits,
    ) -> Result<(), PageTableError> {
        if self.out_of_tables {
            return Err(PageTableError::OutOfMemory);
        }
        let pages = size.div_ceil(PAGE_SIZE);
        for i in 0..pages {
            let page = va + i * PAGE_SIZE;
            if self.entries.contains_key(&page) {
                return Err(PageTableError::AlreadyMapped(page));
            }
        }
        for i in 0..pages {
            let entry = flags
                .flags()
                .with_present(true)
                .with_physical_address(pa + i * PAGE_SIZE);
            self.entries.insert(va + i * PAGE_SIZE, entry);
        }
        Ok(())
    }

    fn unmap(&mut self, va: VirtAddr, npages: u64) -> Result<(), PageTableError> {
        for i in 0..npages {
            let page = va + i * PAGE_SIZE;
            if !self.entries.contains_key(&page) {
                return Err(PageTableError::NotMapped(page));
            }
        }
        for i in 0..npages {
            self.entries.remove(&(va + i * PAGE_SIZE));
        }
        Ok(())
    }
}

/// Allocate a frame, fill it with `byte` and map it user-writable at `va`.
pub fn map_fresh(frames: &Frames, table: &mut SoftPageTable, va: VirtAddr, byte: u8) -> PhysAddr {
    let pa = frames.alloc().unwrap();
    frames.mapper().fill(pa, byte);
    table
        .map(va, PAGE_SIZE, pa, PageEntryBits::new_user_rw())
        .unwrap();
    pa
}
