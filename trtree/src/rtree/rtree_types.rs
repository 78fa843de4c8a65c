//! Core types for the R-tree.
//!
//! This module defines the fundamental types used throughout the tree:
//! - Error and result types
//! - Node types (Leaf and Internal)
//! - Fanout configuration
//! - Statistics structures

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bounding_box::BoundingBox;

use super::rtree_constants::{DEFAULT_MAX_ENTRIES, DEFAULT_MIN_ENTRIES, MIN_FANOUT};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in spatial indexing operations
#[derive(Debug, Error)]
pub enum SpatialError {
    /// Malformed input, such as a box with `min > max` or mismatched lengths
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An insert would break the index's uniqueness constraint
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A structural invariant of the tree does not hold
    #[error("Corrupted index: {0}")]
    CorruptedIndex(String),

    /// A delete named an entry that is not in the index
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Index is closed")]
    Closed,
}

/// Result type for spatial operations
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Opaque identifier of a row in host-owned table storage
pub type RowId = i64;

/// Slot of a node in the tree's arena
pub type NodeId = usize;

// ============================================================================
// Configuration
// ============================================================================

/// Fanout bounds `[m, M]` of every non-root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RTreeConfig {
    /// Maximum entries or children per node (M)
    pub max_entries: usize,
    /// Minimum entries or children per non-root node (m)
    pub min_entries: usize,
}

impl RTreeConfig {
    pub fn new(max_entries: usize, min_entries: usize) -> SpatialResult<Self> {
        let config = Self {
            max_entries,
            min_entries,
        };
        config.validate()?;
        Ok(config)
    }

    /// A quadratic split of `M + 1` items must be able to leave at least
    /// `m` items on each side, so `2 <= m <= M / 2` is required.
    pub fn validate(&self) -> SpatialResult<()> {
        if self.max_entries < MIN_FANOUT {
            return Err(SpatialError::InvalidArgument(format!(
                "max entries must be at least {}, got {}",
                MIN_FANOUT, self.max_entries
            )));
        }
        if self.min_entries < 2 || self.min_entries > self.max_entries / 2 {
            return Err(SpatialError::InvalidArgument(format!(
                "min entries must be within [2, {}], got {}",
                self.max_entries / 2,
                self.min_entries
            )));
        }
        Ok(())
    }
}

impl Default for RTreeConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            min_entries: DEFAULT_MIN_ENTRIES,
        }
    }
}

// ============================================================================
// Node Types
// ============================================================================

/// An entry in a leaf node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry<const D: usize> {
    pub mbr: BoundingBox<D>,
    pub row_id: RowId,
}

/// A child reference in an internal node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChildRef<const D: usize> {
    pub mbr: BoundingBox<D>,
    pub node: NodeId,
}

/// Node types in the R-tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node<const D: usize> {
    /// Leaf node containing actual entries
    Leaf { entries: Vec<LeafEntry<D>> },
    /// Internal node containing child references
    Internal {
        children: Vec<ChildRef<D>>,
        level: u32, // Height from leaf level (leaves are 0)
    },
}

impl<const D: usize> Node<D> {
    /// Get the bounding box enclosing all children/entries
    pub fn compute_mbr(&self) -> Option<BoundingBox<D>> {
        match self {
            Node::Leaf { entries } => BoundingBox::compute_mbr(entries.iter().map(|e| &e.mbr)),
            Node::Internal { children, .. } => {
                BoundingBox::compute_mbr(children.iter().map(|c| &c.mbr))
            }
        }
    }

    pub fn level(&self) -> u32 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Internal { level, .. } => *level,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Internal { children, .. } => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Heap bytes held by this node's item vector.
    pub(crate) fn heap_size(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.capacity() * std::mem::size_of::<LeafEntry<D>>(),
            Node::Internal { children, .. } => {
                children.capacity() * std::mem::size_of::<ChildRef<D>>()
            }
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Statistics about the tree's shape
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RTreeStats {
    pub total_entries: u64,
    pub node_count: u64,
    pub leaf_count: u64,
    pub free_slots: u64,
    pub tree_height: u32,
}

/// Statistics about a rebuild (vacuum) operation
#[derive(Debug, Clone)]
pub struct RebuildStats {
    /// Total entries reindexed
    pub entries_reindexed: u64,
    /// Number of live nodes before rebuild
    pub nodes_before: u64,
    /// Number of live nodes after rebuild
    pub nodes_after: u64,
    /// Tree height before rebuild
    pub height_before: u32,
    /// Tree height after rebuild
    pub height_after: u32,
    /// Leaf fill factor improvement in percentage points
    pub fill_factor_improvement: f64,
}

/// Metrics for deciding whether a vacuum is worthwhile
#[derive(Debug, Clone)]
pub struct FragmentationMetrics {
    /// Share of leaf capacity in use (0-100)
    pub leaf_fill_percent: f64,
    /// Share of arena slots that are free (0-100)
    pub free_slot_percent: f64,
    /// Actual levels vs levels of a fully packed tree
    pub tree_balance_ratio: f64,
    /// Is fragmentation above recommended rebuild threshold?
    pub should_rebuild: bool,
    /// Fragmentation severity: "None", "Low", "Medium", "High"
    pub severity: String,
}

impl FragmentationMetrics {
    /// Calculate fragmentation metrics from current tree state
    ///
    /// Fragmentation is considered high when:
    /// - Leaves are on average less than 60% full
    /// - More than 30% of arena slots are free
    /// - The tree has more levels than a packed tree would need
    pub fn calculate(stats: &RTreeStats, config: &RTreeConfig) -> Self {
        let capacity = stats.leaf_count.saturating_mul(config.max_entries as u64);
        let leaf_fill_percent = if capacity > 0 {
            stats.total_entries as f64 / capacity as f64 * 100.0
        } else {
            100.0
        };

        let slots = stats.node_count + stats.free_slots;
        let free_slot_percent = if slots > 0 {
            stats.free_slots as f64 / slots as f64 * 100.0
        } else {
            0.0
        };

        let optimal_levels = packed_levels(stats.total_entries, config.max_entries as u64);
        let tree_balance_ratio = if stats.total_entries > 0 {
            (stats.tree_height + 1) as f64 / optimal_levels.max(1) as f64
        } else {
            1.0
        };

        let severity_score = ((60.0 - leaf_fill_percent).max(0.0) / 60.0) * 0.5
            + (free_slot_percent / 30.0) * 0.3
            + ((tree_balance_ratio - 1.0).max(0.0) / 0.5) * 0.2;

        let (severity, should_rebuild) = match severity_score {
            s if s < 0.2 => ("None".to_string(), false),
            s if s < 0.4 => ("Low".to_string(), false),
            s if s < 0.6 => ("Medium".to_string(), false),
            _ => ("High".to_string(), true),
        };

        Self {
            leaf_fill_percent: leaf_fill_percent.min(100.0),
            free_slot_percent,
            tree_balance_ratio,
            should_rebuild,
            severity,
        }
    }
}

/// Number of node levels needed to hold `entries` at full fanout.
pub(crate) fn packed_levels(entries: u64, fanout: u64) -> u32 {
    if entries == 0 || fanout < 2 {
        return 0;
    }
    let mut levels = 1;
    let mut capacity = fanout;
    while capacity < entries {
        capacity = capacity.saturating_mul(fanout);
        levels += 1;
    }
    levels
}
