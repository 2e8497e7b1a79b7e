mod common;

use common::{Frames, SoftPageTable, frames, map_fresh, set_cpu};
use kernel_alloc::{AllocError, CowError, CowResolver, is_pending};
use kernel_info::memory::PAGE_SIZE;
use kernel_vmem::{PageEntryBits, PageTable, PageTableError, VirtAddr};
use std::sync::{Arc, Barrier};
use std::thread;

const VA: VirtAddr = VirtAddr::new(0x40_0000);

fn forked(f: &Frames, byte: u8) -> (SoftPageTable, SoftPageTable) {
    let mut parent = SoftPageTable::new();
    let mut child = SoftPageTable::new();
    map_fresh(f, &mut parent, VA, byte);
    CowResolver::new(f)
        .share_for_fork(&mut parent, &mut child, VA)
        .unwrap();
    (parent, child)
}

#[test]
fn fork_shares_the_frame_read_only() {
    let f = frames(8, 1, 64);
    let (parent, child) = forked(&f, 0x11);

    let p = parent.lookup(VA).unwrap();
    let c = child.lookup(VA).unwrap();
    assert_eq!(p.physical_address(), c.physical_address());
    for e in [p, c] {
        assert!(e.present() && e.user_access());
        assert!(e.copy_on_write());
        assert!(!e.writable());
    }
    assert_eq!(f.refcount(p.physical_address()), 2);
    assert!(is_pending(&parent, VA));
    assert!(is_pending(&child, VA + 0x123));
}

#[test]
fn faulting_sides_each_get_a_private_copy() {
    let f = frames(8, 1, 64);
    let cow = CowResolver::new(&f);
    let (mut parent, mut child) = forked(&f, 0x11);
    let shared = parent.lookup(VA).unwrap().physical_address();
    assert_eq!(f.free_frames(), 7);

    // child writes first
    let child_frame = cow.resolve_fault(&mut child, VA + 8).unwrap();
    assert_ne!(child_frame, shared);
    let c = child.lookup(VA).unwrap();
    assert_eq!(c.physical_address(), child_frame);
    assert!(c.writable() && !c.copy_on_write() && c.user_access());
    assert!(f.mapper().filled_with(child_frame, 0x11));
    assert_eq!(f.refcount(child_frame), 1);

    // the parent still holds the original, untouched
    assert_eq!(f.refcount(shared), 1);
    assert!(is_pending(&parent, VA));
    assert!(!is_pending(&child, VA));
    assert!(f.mapper().filled_with(shared, 0x11));
    assert_eq!(f.free_frames(), 6);

    // the parent's fault copies too, releasing the original
    let parent_frame = cow.resolve_fault(&mut parent, VA).unwrap();
    assert_ne!(parent_frame, shared);
    assert_eq!(f.refcount(shared), 0);
    assert_eq!(f.free_frames(), 6);
    assert!(f.mapper().filled_with(parent_frame, 0x11));
}

#[test]
fn private_or_missing_pages_are_not_cow_faults() {
    let f = frames(4, 1, 64);
    let cow = CowResolver::new(&f);
    let mut table = SoftPageTable::new();
    map_fresh(&f, &mut table, VA, 0);

    assert_eq!(
        cow.resolve_fault(&mut table, VA),
        Err(CowError::NotCopyOnWrite(VA))
    );
    let hole = VA + 4 * PAGE_SIZE;
    assert_eq!(
        cow.resolve_fault(&mut table, hole),
        Err(CowError::NotCopyOnWrite(hole))
    );
    assert!(table.lookup(VA).unwrap().writable());
    assert_eq!(f.free_frames(), 3);
}

#[test]
fn out_of_memory_leaves_the_entry_pending() {
    let f = frames(2, 1, 64);
    let cow = CowResolver::new(&f);
    let (_parent, mut child) = forked(&f, 0x22);
    let shared = child.lookup(VA).unwrap().physical_address();
    let _last = f.alloc().unwrap();

    assert_eq!(
        cow.resolve_fault(&mut child, VA),
        Err(CowError::OutOfMemory(AllocError::OutOfFrames))
    );
    assert!(is_pending(&child, VA));
    assert_eq!(child.lookup(VA).unwrap().physical_address(), shared);
    assert_eq!(f.refcount(shared), 2);
}

#[test]
fn failed_remap_loses_the_page_but_leaks_nothing() {
    let f = frames(4, 1, 64);
    let cow = CowResolver::new(&f);
    let (parent, mut child) = forked(&f, 0x33);
    let shared = child.lookup(VA).unwrap().physical_address();
    assert_eq!(f.free_frames(), 3);

    child.run_out_of_tables();
    assert_eq!(
        cow.resolve_fault(&mut child, VA),
        Err(CowError::Map(PageTableError::OutOfMemory))
    );

    // the child's mapping and its reference are gone; the copy went back
    assert!(child.lookup(VA).is_none());
    assert!(!is_pending(&child, VA));
    assert_eq!(f.refcount(shared), 1);
    assert_eq!(f.free_frames(), 3);

    // the parent is unaffected and still owns the original
    assert!(is_pending(&parent, VA));
    assert!(f.mapper().filled_with(shared, 0x33));
}

#[test]
fn read_only_pages_are_shared_without_cow() {
    let f = frames(4, 1, 64);
    let cow = CowResolver::new(&f);
    let mut parent = SoftPageTable::new();
    let mut child = SoftPageTable::new();
    let pa = f.alloc().unwrap();
    parent
        .map(VA, PAGE_SIZE, pa, PageEntryBits::new_user_ro())
        .unwrap();

    cow.share_for_fork(&mut parent, &mut child, VA).unwrap();
    assert!(!is_pending(&child, VA));
    assert!(!child.lookup(VA).unwrap().writable());
    assert_eq!(f.refcount(pa), 2);
    assert_eq!(
        cow.copy_out(&mut child, VA, b"x"),
        Err(CowError::NotWritable(VA))
    );
}

#[test]
fn sharing_an_unmapped_page_fails_cleanly() {
    let f = frames(4, 1, 64);
    let cow = CowResolver::new(&f);
    let mut parent = SoftPageTable::new();
    let mut child = SoftPageTable::new();

    assert_eq!(
        cow.share_for_fork(&mut parent, &mut child, VA),
        Err(CowError::Map(PageTableError::NotMapped(VA)))
    );
    assert_eq!(child.len(), 0);
}

#[test]
fn sharing_into_an_occupied_child_slot_leaves_the_parent_private() {
    let f = frames(4, 1, 64);
    let cow = CowResolver::new(&f);
    let mut parent = SoftPageTable::new();
    let mut child = SoftPageTable::new();
    let pa = map_fresh(&f, &mut parent, VA, 1);
    map_fresh(&f, &mut child, VA, 2);

    assert_eq!(
        cow.share_for_fork(&mut parent, &mut child, VA),
        Err(CowError::Map(PageTableError::AlreadyMapped(VA)))
    );
    assert!(parent.lookup(VA).unwrap().writable());
    assert_eq!(f.refcount(pa), 1);
}

#[test]
fn copy_out_privatizes_pending_pages_only_in_the_target() {
    let f = frames(8, 1, 64);
    let cow = CowResolver::new(&f);
    let mut parent = SoftPageTable::new();
    let mut child = SoftPageTable::new();
    let first = map_fresh(&f, &mut parent, VA, 0xAA);
    let second = map_fresh(&f, &mut parent, VA + PAGE_SIZE, 0xBB);
    cow.share_for_fork(&mut parent, &mut child, VA).unwrap();
    cow.share_for_fork(&mut parent, &mut child, VA + PAGE_SIZE)
        .unwrap();

    // straddles the page boundary
    let dst = VA + (PAGE_SIZE - 4);
    cow.copy_out(&mut child, dst, b"kernel!!").unwrap();

    assert!(!is_pending(&child, VA));
    assert!(!is_pending(&child, VA + PAGE_SIZE));
    assert!(is_pending(&parent, VA));
    assert!(f.mapper().filled_with(first, 0xAA));
    assert!(f.mapper().filled_with(second, 0xBB));

    let lo = f
        .mapper()
        .snapshot(child.lookup(VA).unwrap().physical_address());
    let hi = f
        .mapper()
        .snapshot(child.lookup(VA + PAGE_SIZE).unwrap().physical_address());
    assert_eq!(&lo[lo.len() - 4..], b"kern");
    assert_eq!(&hi[..4], b"el!!");
    assert!(lo[..lo.len() - 4].iter().all(|&b| b == 0xAA));
    assert!(hi[4..].iter().all(|&b| b == 0xBB));
}

#[test]
fn copy_out_into_a_hole_fails() {
    let f = frames(4, 1, 64);
    let cow = CowResolver::new(&f);
    let mut table = SoftPageTable::new();
    map_fresh(&f, &mut table, VA, 0);

    let past = VA + PAGE_SIZE;
    assert_eq!(
        cow.copy_out(&mut table, VA + (PAGE_SIZE - 1), b"ab"),
        Err(CowError::NotWritable(past))
    );
}

#[test]
fn release_range_frees_frames_and_skips_holes() {
    let f = frames(8, 1, 64);
    let cow = CowResolver::new(&f);
    let mut table = SoftPageTable::new();
    map_fresh(&f, &mut table, VA, 0);
    map_fresh(&f, &mut table, VA + 2 * PAGE_SIZE, 0);
    assert_eq!(f.free_frames(), 6);

    assert_eq!(cow.release_range(&mut table, VA, 3), Ok(2));
    assert_eq!(table.len(), 0);
    assert_eq!(f.free_frames(), 8);
}

#[test]
fn exiting_sharer_leaves_the_frame_to_the_other() {
    let f = frames(4, 1, 64);
    let cow = CowResolver::new(&f);
    let (mut parent, mut child) = forked(&f, 0x5A);
    let shared = parent.lookup(VA).unwrap().physical_address();

    cow.release_range(&mut parent, VA, 1).unwrap();
    assert_eq!(f.refcount(shared), 1);
    assert!(f.mapper().filled_with(shared, 0x5A));

    // the survivor still copies on its first write
    let private = cow.resolve_fault(&mut child, VA).unwrap();
    assert_ne!(private, shared);
    assert_eq!(f.refcount(shared), 0);
    assert_eq!(f.free_frames(), 3);
}

#[test]
fn concurrent_faults_on_one_shared_frame() {
    let f = Arc::new(frames(8, 2, 64));
    let (parent, child) = forked(&f, 0x77);
    let shared = parent.lookup(VA).unwrap().physical_address();
    let before = f.free_frames();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [parent, child]
        .into_iter()
        .enumerate()
        .map(|(cpu, mut table)| {
            let f = Arc::clone(&f);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                set_cpu(cpu);
                let cow = CowResolver::new(&*f);
                barrier.wait();
                let private = cow.resolve_fault(&mut table, VA).unwrap();
                assert!(f.mapper().filled_with(private, 0x77));
                f.mapper().fill(private, cpu as u8);
                (table, private)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let (a, b) = (results[0].1, results[1].1);
    assert_ne!(a, b);
    assert_ne!(a, shared);
    assert_ne!(b, shared);
    // two fresh frames in, the shared one out
    assert_eq!(f.free_frames(), before - 1);
    assert_eq!(f.refcount(shared), 0);

    let cow = CowResolver::new(&*f);
    for (mut table, _) in results {
        cow.release_range(&mut table, VA, 1).unwrap();
    }
    assert_eq!(f.free_frames(), f.total_frames());
}
