use std::collections::HashSet;
use std::fmt::{self, Display};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bounding_box::BoundingBox;
use crate::cursor::ScanCursor;
use crate::options::{IndexOptions, RTreeOptions};
use crate::rtree::{
    decode_snapshot, encode_snapshot, FragmentationMetrics, RTree, RTreeStats, RebuildStats,
    RowId, SpatialError, SpatialResult,
};

/// Index type name under which hosts register the index.
pub const TYPE_NAME: &str = "TRTREE";

/// Uniqueness constraint enforced on row ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexConstraintType {
    #[default]
    None,
    Unique,
    Primary,
}

impl IndexConstraintType {
    pub fn is_unique(&self) -> bool {
        !matches!(self, IndexConstraintType::None)
    }
}

impl Display for IndexConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexConstraintType::None => write!(f, "NONE"),
            IndexConstraintType::Unique => write!(f, "UNIQUE"),
            IndexConstraintType::Primary => write!(f, "PRIMARY KEY"),
        }
    }
}

/// Opaque persisted state of an index, produced by
/// [`RTreeIndex::storage_info`] and consumed by [`RTreeIndex::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStorageInfo {
    pub name: String,
    pub blob: Vec<u8>,
}

/// Scan state handed to the host between [`RTreeIndex::scan`] calls.
#[derive(Debug, Clone)]
pub struct IndexScanState<const D: usize> {
    cursor: ScanCursor<D>,
}

impl<const D: usize> IndexScanState<D> {
    pub fn cursor(&self) -> &ScanCursor<D> {
        &self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_exhausted()
    }
}

/// An R-tree index bound to a host table.
/// Uses Pimpl pattern for cheap cloning and encapsulation.
///
/// All state sits behind a single reader/writer lock: searches and scans
/// share it, mutations hold it exclusively.
#[derive(Clone)]
pub struct RTreeIndex<const D: usize> {
    inner: Arc<RTreeIndexInner<D>>,
}

/// Private implementation details of RTreeIndex.
struct RTreeIndexInner<const D: usize> {
    name: String,
    constraint: IndexConstraintType,
    options: RTreeOptions,
    state: RwLock<IndexState<D>>,
}

struct IndexState<const D: usize> {
    tree: RTree<D>,
    /// Indexed row ids; only maintained for unique indexes
    row_ids: HashSet<RowId>,
    /// Set when verification failed; cleared by a bulk construction
    corrupted: bool,
    dropped: bool,
}

impl<const D: usize> IndexState<D> {
    fn check_readable(&self) -> SpatialResult<()> {
        if self.dropped {
            Err(SpatialError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> SpatialResult<()> {
        self.check_readable()?;
        if self.corrupted {
            return Err(SpatialError::CorruptedIndex(
                "index failed verification and is read-only until rebuilt".into(),
            ));
        }
        Ok(())
    }
}

impl<const D: usize> RTreeIndex<D> {
    /// Creates an index, restoring its tree from `storage_info` when one with
    /// a non-empty blob is given. A restored index keeps the fanout it was
    /// stored with, whatever `options` says.
    pub fn new(
        name: &str,
        constraint: IndexConstraintType,
        options: &IndexOptions,
        storage_info: Option<&IndexStorageInfo>,
    ) -> SpatialResult<Self> {
        let mut options = RTreeOptions::from_index_options(options)?;

        let tree = match storage_info {
            Some(info) if !info.blob.is_empty() => {
                log::debug!("Restoring R-tree index '{}' from {} bytes", name, info.blob.len());
                let tree: RTree<D> = decode_snapshot(&info.blob)?;
                // the stored fanout outlives whatever the options say
                let config = tree.config();
                if options.config().ok() != Some(config) {
                    log::debug!(
                        "Index '{}' keeps its stored fanout M={}, m={}",
                        name,
                        config.max_entries,
                        config.min_entries
                    );
                }
                options = options
                    .max_entries(config.max_entries)
                    .min_entries(config.min_entries);
                tree
            }
            _ => {
                log::debug!("Creating R-tree index '{}'", name);
                RTree::new(options.config()?)?
            }
        };

        let mut row_ids = HashSet::new();
        if constraint.is_unique() {
            for entry in tree.entries()? {
                if !row_ids.insert(entry.row_id) {
                    return Err(SpatialError::ConstraintViolation(
                        constraint_message(name, constraint, entry.row_id),
                    ));
                }
            }
        }

        Ok(Self {
            inner: Arc::new(RTreeIndexInner {
                name: name.to_string(),
                constraint,
                options,
                state: RwLock::new(IndexState {
                    tree,
                    row_ids,
                    corrupted: false,
                    dropped: false,
                }),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn constraint_type(&self) -> IndexConstraintType {
        self.inner.constraint
    }

    pub fn options(&self) -> &RTreeOptions {
        &self.inner.options
    }

    /// Number of indexed entries; 0 once the index has been dropped.
    pub fn len(&self) -> usize {
        self.inner.state.read().tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexes a batch of `(box, row id)` pairs.
    ///
    /// The batch is applied entirely or not at all: a malformed box fails it
    /// with `InvalidArgument`, a duplicate row id in a unique index with
    /// `ConstraintViolation`.
    pub fn insert(&self, batch: &[(BoundingBox<D>, RowId)]) -> SpatialResult<()> {
        let mut state = self.inner.state.write();
        state.check_writable()?;

        for (bbox, _) in batch {
            bbox.validate()?;
        }

        if self.inner.constraint.is_unique() {
            let mut seen = HashSet::with_capacity(batch.len());
            for &(_, row_id) in batch {
                if state.row_ids.contains(&row_id) || !seen.insert(row_id) {
                    return Err(SpatialError::ConstraintViolation(
                        self.constraint_violation_message(row_id),
                    ));
                }
            }
            state.row_ids.extend(seen);
        }

        for &(bbox, row_id) in batch {
            state.tree.insert(bbox, row_id)?;
        }
        log::trace!("Inserted {} entries into '{}'", batch.len(), self.inner.name);
        Ok(())
    }

    /// Same as [`RTreeIndex::insert`]; hosts call it when rows are appended.
    pub fn append(&self, batch: &[(BoundingBox<D>, RowId)]) -> SpatialResult<()> {
        self.insert(batch)
    }

    /// Removes a batch of `(box, row id)` pairs and returns how many were
    /// removed.
    ///
    /// Absent pairs are skipped unless the index was created with
    /// `strict_delete`, in which case the batch fails with `NotFound` and
    /// nothing is removed.
    pub fn delete(&self, batch: &[(BoundingBox<D>, RowId)]) -> SpatialResult<usize> {
        let mut state = self.inner.state.write();
        state.check_writable()?;

        let mut removed = Vec::with_capacity(batch.len());
        for &(bbox, row_id) in batch {
            if state.tree.delete(&bbox, row_id)? {
                removed.push((bbox, row_id));
            } else if self.inner.options.is_strict_delete() {
                // put back what this batch already took out
                for &(bbox, row_id) in &removed {
                    state.tree.insert(bbox, row_id)?;
                }
                return Err(SpatialError::NotFound(format!(
                    "row {} with box {} is not in index '{}'",
                    row_id, bbox, self.inner.name
                )));
            }
        }

        if self.inner.constraint.is_unique() {
            for (_, row_id) in &removed {
                state.row_ids.remove(row_id);
            }
        }
        log::trace!("Deleted {} entries from '{}'", removed.len(), self.inner.name);
        Ok(removed.len())
    }

    /// Replaces the whole index with a tree packed from `boxes` and
    /// `row_ids`.
    ///
    /// The new tree is built without holding the lock and swapped in under
    /// the write lock. A successful rebuild clears the read-only flag left by
    /// a failed verification.
    pub fn bulk_construct(&self, boxes: &[BoundingBox<D>], row_ids: &[RowId]) -> SpatialResult<()> {
        self.inner.state.read().check_readable()?;

        let mut unique = HashSet::new();
        if self.inner.constraint.is_unique() {
            for &row_id in row_ids {
                if !unique.insert(row_id) {
                    return Err(SpatialError::ConstraintViolation(
                        self.constraint_violation_message(row_id),
                    ));
                }
            }
        }

        let tree = RTree::bulk_construct(self.inner.options.config()?, boxes, row_ids)?;

        let mut state = self.inner.state.write();
        state.check_readable()?;
        state.tree.replace(tree);
        state.row_ids = unique;
        state.corrupted = false;
        log::debug!(
            "Bulk constructed index '{}' with {} entries",
            self.inner.name,
            state.tree.len()
        );
        Ok(())
    }

    /// Row ids of every entry whose box overlaps `query`.
    pub fn search(&self, query: &BoundingBox<D>) -> SpatialResult<Vec<RowId>> {
        let state = self.inner.state.read();
        state.check_readable()?;
        let row_ids = state.tree.search(query)?.collect();
        Ok(row_ids)
    }

    /// Opens a scan over the entries overlapping `query`.
    pub fn initialize_scan(&self, query: &BoundingBox<D>) -> SpatialResult<IndexScanState<D>> {
        let state = self.inner.state.read();
        state.check_readable()?;
        Ok(IndexScanState {
            cursor: state.tree.initialize_scan(query)?,
        })
    }

    /// Opens a scan over a query box serialized by the host.
    pub fn initialize_scan_from_blob(&self, bytes: &[u8]) -> SpatialResult<IndexScanState<D>> {
        let (query, _): (BoundingBox<D>, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::legacy()).map_err(|e| {
                SpatialError::InvalidArgument(format!("unreadable query box: {}", e))
            })?;
        self.initialize_scan(&query)
    }

    /// Appends the next batch of matches to `out` and returns its size;
    /// 0 means the scan is complete.
    pub fn scan(&self, scan_state: &mut IndexScanState<D>, out: &mut Vec<RowId>) -> SpatialResult<usize> {
        let state = self.inner.state.read();
        state.check_readable()?;
        state
            .tree
            .advance(&mut scan_state.cursor, out, self.inner.options.get_scan_batch_size())
    }

    /// Absorbs every entry of `other` into this index.
    ///
    /// Returns `false` without doing anything when `other` is this very
    /// index. `other` is left unchanged.
    pub fn merge_indexes(&self, other: &RTreeIndex<D>) -> SpatialResult<bool> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Ok(false);
        }

        let theirs = {
            let other_state = other.inner.state.read();
            other_state.check_readable()?;
            other_state.tree.clone()
        };

        let mut state = self.inner.state.write();
        state.check_writable()?;

        let mut added = HashSet::new();
        if self.inner.constraint.is_unique() {
            for entry in theirs.entries()? {
                if state.row_ids.contains(&entry.row_id) || !added.insert(entry.row_id) {
                    return Err(SpatialError::ConstraintViolation(
                        self.constraint_violation_message(entry.row_id),
                    ));
                }
            }
        }

        let merged = state.tree.merge(&theirs)?;
        state.tree.replace(merged);
        state.row_ids.extend(added);
        log::debug!(
            "Merged {} entries from '{}' into '{}'",
            theirs.len(),
            other.inner.name,
            self.inner.name
        );
        Ok(true)
    }

    /// Repacks the tree, reclaiming slack left by deletes.
    pub fn vacuum(&self) -> SpatialResult<RebuildStats> {
        let mut state = self.inner.state.write();
        state.check_writable()?;
        let stats = state.tree.vacuum()?;
        log::debug!(
            "Vacuumed index '{}': {} entries, {} -> {} nodes",
            self.inner.name,
            stats.entries_reindexed,
            stats.nodes_before,
            stats.nodes_after
        );
        Ok(stats)
    }

    /// Bytes held by the index in memory.
    pub fn in_memory_size(&self) -> usize {
        let state = self.inner.state.read();
        std::mem::size_of::<RTreeIndexInner<D>>()
            + self.inner.name.capacity()
            + state.tree.in_memory_size()
            + state.row_ids.capacity() * std::mem::size_of::<RowId>()
    }

    pub fn stats(&self) -> RTreeStats {
        self.inner.state.read().tree.stats()
    }

    pub fn fragmentation(&self) -> FragmentationMetrics {
        self.inner.state.read().tree.fragmentation()
    }

    /// Verifies every tree invariant.
    ///
    /// Returns a one-line verdict when `only_verify` is set and a full tree
    /// dump otherwise. A failed verification flags the index read-only and is
    /// reported as `CorruptedIndex`.
    pub fn verify_and_to_string(&self, only_verify: bool) -> SpatialResult<String> {
        let mut state = self.inner.state.write();
        state.check_readable()?;

        let report = state.tree.verify();
        if !report.is_valid {
            state.corrupted = true;
            log::warn!("Index '{}' failed verification: {}", self.inner.name, report);
            return Err(SpatialError::CorruptedIndex(report.to_string()));
        }

        if only_verify {
            Ok(format!("{} index '{}': {}", TYPE_NAME, self.inner.name, report))
        } else {
            Ok(state.tree.dump())
        }
    }

    /// Checks that every allocated node is reachable and every free slot is
    /// empty.
    pub fn verify_allocations(&self) -> SpatialResult<()> {
        let mut state = self.inner.state.write();
        state.check_readable()?;

        let report = state.tree.verify_allocations();
        if !report.is_valid {
            state.corrupted = true;
            log::warn!("Index '{}' has broken allocations: {}", self.inner.name, report);
            return Err(SpatialError::CorruptedIndex(report.to_string()));
        }
        Ok(())
    }

    /// Drops the index: releases the tree, after which every operation fails
    /// with `Closed`.
    pub fn commit_drop(&self) -> SpatialResult<()> {
        let mut state = self.inner.state.write();
        state.check_readable()?;
        state.tree.clear();
        state.row_ids = HashSet::new();
        state.dropped = true;
        log::debug!("Dropped index '{}'", self.inner.name);
        Ok(())
    }

    /// Message reported when `row_id` breaks the uniqueness constraint.
    pub fn constraint_violation_message(&self, row_id: RowId) -> String {
        constraint_message(&self.inner.name, self.inner.constraint, row_id)
    }

    /// Snapshot of the index for a host-owned serializer.
    pub fn storage_info(&self) -> SpatialResult<IndexStorageInfo> {
        let state = self.inner.state.read();
        state.check_readable()?;
        Ok(IndexStorageInfo {
            name: self.inner.name.clone(),
            blob: encode_snapshot(&state.tree)?,
        })
    }
}

fn constraint_message(name: &str, constraint: IndexConstraintType, row_id: RowId) -> String {
    format!(
        "duplicate row id {} violates the {} constraint of index '{}'",
        row_id, constraint, name
    )
}
