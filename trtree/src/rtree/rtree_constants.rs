//! Constants for the R-tree.

/// Default maximum number of entries or children per node (M)
pub const DEFAULT_MAX_ENTRIES: usize = 64;

/// Default minimum number of entries or children per non-root node (m)
pub const DEFAULT_MIN_ENTRIES: usize = 32;

/// Smallest fanout that still allows a split into two valid halves
pub const MIN_FANOUT: usize = 4;

/// Default number of row ids returned by one scan call
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 2048;

/// Magic number for snapshot identification
pub const MAGIC: u32 = 0x5452_5452; // "TRTR"

/// Snapshot format version
pub const VERSION: u32 = 1;
