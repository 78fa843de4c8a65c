//! In-memory R-tree over axis-aligned boxes.
//!
//! The tree owns every node in an arena addressed by [`NodeId`]; freed slots
//! are recycled through a free list, the same allocation model a paged tree
//! uses for its pages. Supported operations:
//! - incremental insert with quadratic split
//! - delete with condense-and-reinsert
//! - depth-first overlap search, eager or through resumable cursors
//! - Hilbert-packed bulk construction, merge and vacuum
//! - invariant verification and snapshot encoding

pub mod rtree_constants;
pub mod rtree_types;
pub mod integrity;
pub mod snapshot;
mod rtree_impl;

pub use integrity::IntegrityReport;
pub use rtree_constants::{DEFAULT_MAX_ENTRIES, DEFAULT_MIN_ENTRIES, DEFAULT_SCAN_BATCH_SIZE};
pub use rtree_impl::RTree;
pub use rtree_types::{
    ChildRef, FragmentationMetrics, LeafEntry, Node, NodeId, RTreeConfig, RTreeStats,
    RebuildStats, RowId, SpatialError, SpatialResult,
};
pub use snapshot::{decode_snapshot, encode_snapshot};
