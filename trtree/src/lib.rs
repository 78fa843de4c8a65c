//! # trtree - R-tree index over spatiotemporal boxes
//!
//! This crate provides an in-memory R-tree that maps axis-aligned boxes to
//! opaque row identifiers, together with the index surface a host database
//! engine drives: batched insert and delete, bulk construction, resumable
//! scans, merge, vacuum, verification and snapshots.
//!
//! ## Features
//!
//! - **Any Dimension**: `BoundingBox<D>` with [`Rect`] (x, y) and [`STBox`]
//!   (x, y, z, t) aliases
//! - **Quadratic Split**: Guttman's insert with minimum fill enforcement
//! - **Condense on Delete**: underfull nodes are dissolved and reinserted
//! - **Bulk Construction**: Hilbert-ordered bottom-up packing
//! - **Resumable Scans**: cursors that return matches in batches
//! - **Thread Safe**: many concurrent readers, one writer
//! - **Snapshots**: checksummed blobs for a host-owned serializer
//!
//! ## R-Tree API
//!
//! ```rust
//! use trtree::{RTree, RTreeConfig, Rect};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tree = RTree::new(RTreeConfig::default())?;
//! tree.insert(Rect::xy(0.0, 0.0, 1.0, 1.0), 1)?;
//! tree.insert(Rect::xy(5.0, 5.0, 6.0, 6.0), 2)?;
//! tree.insert(Rect::xy(0.5, 0.5, 2.0, 2.0), 3)?;
//!
//! let mut found: Vec<_> = tree.search(&Rect::xy(0.0, 0.0, 1.0, 1.0))?.collect();
//! found.sort();
//! assert_eq!(found, vec![1, 3]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Index API
//!
//! ```rust
//! use trtree::{IndexConstraintType, IndexOptions, RTreeIndex, STBox};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let index: RTreeIndex<4> =
//!     RTreeIndex::new("trips", IndexConstraintType::Unique, &IndexOptions::new(), None)?;
//! index.insert(&[(STBox::xyt(0.0, 0.0, 1.0, 1.0, 0.0, 60.0), 7)])?;
//!
//! let mut scan = index.initialize_scan(&STBox::xyt(0.0, 0.0, 10.0, 10.0, 30.0, 90.0))?;
//! let mut rows = Vec::new();
//! while index.scan(&mut scan, &mut rows)? > 0 {}
//! assert_eq!(rows, vec![7]);
//! # Ok(())
//! # }
//! ```

// Core R-Tree modules
pub mod bounding_box;
pub mod hilbert;
pub mod rtree;

// Query and host modules
pub mod cursor;
pub mod index;
pub mod options;

// Re-export R-Tree types
pub use bounding_box::{BoundingBox, Rect, STBox};
pub use rtree::{
    decode_snapshot, encode_snapshot, FragmentationMetrics, IntegrityReport, LeafEntry, RTree,
    RTreeConfig, RTreeStats, RebuildStats, RowId, SpatialError, SpatialResult,
};

// Re-export cursor types
pub use cursor::{CursorState, ScanCursor, SearchIter};

// Re-export index types
pub use index::{IndexConstraintType, IndexScanState, IndexStorageInfo, RTreeIndex, TYPE_NAME};
pub use options::{IndexOptions, RTreeOptions};
