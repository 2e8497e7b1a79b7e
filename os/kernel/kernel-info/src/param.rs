//! # Subsystem Parameters

/// Size of a disk block (and of a buffer's payload) in bytes.
pub const BSIZE: usize = 1024;

/// Maximum number of blocks any single file-system operation writes.
pub const MAXOPBLOCKS: usize = 10;

/// Number of buffers in the block cache pool.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of hash buckets the buffer pool is partitioned into.
///
/// A prime keeps consecutive block numbers spread across buckets.
pub const NBUCKET: usize = 13;

/// Maximum number of cores, and thus of per-core free lists.
pub const NCPU: usize = 8;

/// Upper bound on the frames moved by a single steal pass.
pub const STEAL_QUOTA: usize = 64;

const _: () = {
    assert!(NBUF >= NBUCKET);
    assert!(NCPU > 0);
    assert!(STEAL_QUOTA > 0);
};
