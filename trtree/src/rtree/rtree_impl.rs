//! RTree implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::bounding_box::BoundingBox;
use crate::hilbert::{bits_per_axis, hilbert_key};

use super::rtree_types::{
    ChildRef, FragmentationMetrics, LeafEntry, Node, NodeId, RTreeConfig, RTreeStats,
    RebuildStats, RowId, SpatialError, SpatialResult,
};

/// An R-tree mapping boxes to row ids.
///
/// The tree exclusively owns its nodes. It is not synchronized itself:
/// mutations take `&mut self`, searches take `&self`, and callers that share
/// a tree between threads wrap it in a lock (see [`RTreeIndex`]).
///
/// [`RTreeIndex`]: crate::RTreeIndex
#[derive(Debug, Clone)]
pub struct RTree<const D: usize> {
    pub(crate) config: RTreeConfig,
    pub(crate) nodes: Vec<Option<Node<D>>>,
    pub(crate) free_slots: Vec<NodeId>,
    pub(crate) root: Option<NodeId>,
    pub(crate) len: usize,
    /// Renewed by every mutation; cursors opened on another epoch are stale
    pub(crate) epoch: u64,
}

/// Source of modification epochs, shared by every tree in the process so
/// that a cursor can never match the epoch of a tree it was not opened on.
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_epoch() -> u64 {
    NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

/// Something waiting to be placed into a node at a given level
enum Item<const D: usize> {
    Entry(LeafEntry<D>),
    Child(ChildRef<D>),
}

impl<const D: usize> Item<D> {
    fn mbr(&self) -> BoundingBox<D> {
        match self {
            Item::Entry(entry) => entry.mbr,
            Item::Child(child) => child.mbr,
        }
    }
}

impl<const D: usize> RTree<D> {
    /// Creates an empty tree with the given fanout bounds.
    pub fn new(config: RTreeConfig) -> SpatialResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            nodes: Vec::new(),
            free_slots: Vec::new(),
            root: None,
            len: 0,
            epoch: next_epoch(),
        })
    }

    /// Builds a tree bottom-up from parallel slices of boxes and row ids.
    ///
    /// Fails with `InvalidArgument` when the slice lengths differ or any box
    /// is malformed.
    pub fn bulk_construct(
        config: RTreeConfig,
        boxes: &[BoundingBox<D>],
        row_ids: &[RowId],
    ) -> SpatialResult<Self> {
        if boxes.len() != row_ids.len() {
            return Err(SpatialError::InvalidArgument(format!(
                "bulk construct got {} boxes but {} row ids",
                boxes.len(),
                row_ids.len()
            )));
        }
        Self::bulk_load(config, boxes.iter().copied().zip(row_ids.iter().copied()))
    }

    /// Bulk loads entries using Hilbert packing.
    ///
    /// # Algorithm
    /// 1. Sort entries by the Hilbert key of their center within the global MBR
    /// 2. Cut the sorted run into `ceil(n / M)` leaves of near-equal size
    /// 3. Pack the resulting leaf MBRs the same way, level by level, until a
    ///    single root remains
    ///
    /// Equal-size packing keeps every non-root node at or above `m` entries
    /// because `n / ceil(n / M) > M / 2` whenever more than one node is built.
    ///
    /// # Performance
    /// - Time: O(N log N) due to sorting
    /// - Space: O(N) for temporary storage
    pub fn bulk_load<I>(config: RTreeConfig, entries: I) -> SpatialResult<Self>
    where
        I: IntoIterator<Item = (BoundingBox<D>, RowId)>,
    {
        let mut tree = Self::new(config)?;

        let mut entries = entries
            .into_iter()
            .map(|(mbr, row_id)| {
                mbr.validate()?;
                Ok(LeafEntry { mbr, row_id })
            })
            .collect::<SpatialResult<Vec<_>>>()?;

        let Some(bounds) = BoundingBox::compute_mbr(entries.iter().map(|e| &e.mbr)) else {
            return Ok(tree);
        };

        let bits = bits_per_axis(D);
        entries.sort_by_cached_key(|e| hilbert_key(&e.mbr, &bounds, bits));
        tree.len = entries.len();

        let mut level_refs = Vec::new();
        for chunk in balanced_chunks(entries, config.max_entries) {
            let mbr = mbr_of(chunk.iter().map(|e| &e.mbr))?;
            let node = tree.allocate_node(Node::Leaf { entries: chunk });
            level_refs.push(ChildRef { mbr, node });
        }

        let mut level = 0;
        while level_refs.len() > 1 {
            level += 1;
            let mut parents = Vec::new();
            for chunk in balanced_chunks(level_refs, config.max_entries) {
                let mbr = mbr_of(chunk.iter().map(|c| &c.mbr))?;
                let node = tree.allocate_node(Node::Internal {
                    children: chunk,
                    level,
                });
                parents.push(ChildRef { mbr, node });
            }
            level_refs = parents;
        }

        tree.root = level_refs.first().map(|r| r.node);
        log::debug!(
            "Bulk constructed R-tree with {} entries, height {}",
            tree.len,
            tree.height()
        );
        Ok(tree)
    }

    /// Fanout bounds of this tree
    pub fn config(&self) -> RTreeConfig {
        self.config
    }

    /// Number of leaf entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Root-to-leaf edge count; 0 for an empty tree or a single leaf.
    pub fn height(&self) -> u32 {
        self.root
            .and_then(|root| self.node(root).ok())
            .map(|node| node.level())
            .unwrap_or(0)
    }

    /// Current modification epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Inserts an entry.
    ///
    /// Descends by least enlargement, appends at the reached leaf, then
    /// tightens MBRs and splits overflowing nodes on the way back up.
    pub fn insert(&mut self, mbr: BoundingBox<D>, row_id: RowId) -> SpatialResult<()> {
        mbr.validate()?;
        self.insert_item(Item::Entry(LeafEntry { mbr, row_id }), 0)?;
        self.len += 1;
        self.epoch = next_epoch();
        Ok(())
    }

    /// Removes the entry matching both `mbr` and `row_id` exactly.
    ///
    /// Returns `Ok(false)` and leaves the tree untouched when no such entry
    /// exists.
    pub fn delete(&mut self, mbr: &BoundingBox<D>, row_id: RowId) -> SpatialResult<bool> {
        let Some(root) = self.root else {
            return Ok(false);
        };

        let mut path = Vec::new();
        let Some((leaf, pos)) = self.find_entry(root, mbr, row_id, &mut path)? else {
            return Ok(false);
        };

        match self.node_mut(leaf)? {
            Node::Leaf { entries } => {
                entries.remove(pos);
            }
            Node::Internal { .. } => {
                return Err(SpatialError::CorruptedIndex(format!(
                    "node {} was expected to be a leaf",
                    leaf
                )));
            }
        }
        self.len -= 1;
        self.epoch = next_epoch();

        self.condense_tree(path, leaf)?;
        Ok(true)
    }

    /// True if an entry matching both `mbr` and `row_id` is stored.
    pub fn contains_entry(&self, mbr: &BoundingBox<D>, row_id: RowId) -> SpatialResult<bool> {
        match self.root {
            Some(root) => Ok(self.find_entry(root, mbr, row_id, &mut Vec::new())?.is_some()),
            None => Ok(false),
        }
    }

    /// Collects every leaf entry, in tree order.
    pub fn entries(&self) -> SpatialResult<Vec<LeafEntry<D>>> {
        let mut entries = Vec::with_capacity(self.len);
        if let Some(root) = self.root {
            self.collect_entries_recursive(root, &mut entries)?;
        }
        Ok(entries)
    }

    fn collect_entries_recursive(
        &self,
        node_id: NodeId,
        entries: &mut Vec<LeafEntry<D>>,
    ) -> SpatialResult<()> {
        match self.node(node_id)? {
            Node::Leaf { entries: leaf_entries } => entries.extend_from_slice(leaf_entries),
            Node::Internal { children, .. } => {
                for child in children {
                    self.collect_entries_recursive(child.node, entries)?;
                }
            }
        }
        Ok(())
    }

    /// Builds a new tree holding the entries of both trees.
    ///
    /// Neither input is modified; the result uses this tree's fanout.
    pub fn merge(&self, other: &Self) -> SpatialResult<Self> {
        let mut entries = self.entries()?;
        entries.extend(other.entries()?);
        log::debug!(
            "Merging R-trees with {} and {} entries",
            self.len,
            other.len
        );
        Self::bulk_load(self.config, entries.into_iter().map(|e| (e.mbr, e.row_id)))
    }

    /// Replaces this tree with `other` under a fresh epoch, so that cursors
    /// opened on either tree are detected as stale.
    pub fn replace(&mut self, mut other: Self) {
        other.epoch = next_epoch();
        *self = other;
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free_slots.clear();
        self.root = None;
        self.len = 0;
        self.epoch = next_epoch();
    }

    /// Repacks the tree bottom-up and compacts the node arena.
    pub fn vacuum(&mut self) -> SpatialResult<RebuildStats> {
        let before = self.stats();
        let fill_before = self.fragmentation().leaf_fill_percent;

        let entries = self.entries()?;
        let rebuilt = Self::bulk_load(self.config, entries.into_iter().map(|e| (e.mbr, e.row_id)))?;
        self.replace(rebuilt);

        let after = self.stats();
        let fill_after = self.fragmentation().leaf_fill_percent;
        log::debug!(
            "Vacuumed R-tree: {} -> {} nodes, height {} -> {}",
            before.node_count,
            after.node_count,
            before.tree_height,
            after.tree_height
        );

        Ok(RebuildStats {
            entries_reindexed: after.total_entries,
            nodes_before: before.node_count,
            nodes_after: after.node_count,
            height_before: before.tree_height,
            height_after: after.tree_height,
            fill_factor_improvement: fill_after - fill_before,
        })
    }

    /// Get comprehensive statistics
    pub fn stats(&self) -> RTreeStats {
        let live = self.nodes.iter().flatten();
        let (mut node_count, mut leaf_count) = (0u64, 0u64);
        for node in live {
            node_count += 1;
            if node.is_leaf() {
                leaf_count += 1;
            }
        }
        RTreeStats {
            total_entries: self.len as u64,
            node_count,
            leaf_count,
            free_slots: self.free_slots.len() as u64,
            tree_height: self.height(),
        }
    }

    /// Analyzes fill factor and arena slack of the current tree.
    pub fn fragmentation(&self) -> FragmentationMetrics {
        FragmentationMetrics::calculate(&self.stats(), &self.config)
    }

    /// Bytes held by the tree, including node arena and item vectors.
    pub fn in_memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.nodes.capacity() * std::mem::size_of::<Option<Node<D>>>()
            + self.free_slots.capacity() * std::mem::size_of::<NodeId>()
            + self.nodes.iter().flatten().map(Node::heap_size).sum::<usize>()
    }

    // ------------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------------

    pub(crate) fn node(&self, id: NodeId) -> SpatialResult<&Node<D>> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| SpatialError::CorruptedIndex(format!("node {} does not exist", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> SpatialResult<&mut Node<D>> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| SpatialError::CorruptedIndex(format!("node {} does not exist", id)))
    }

    fn children_mut(&mut self, id: NodeId) -> SpatialResult<&mut Vec<ChildRef<D>>> {
        match self.node_mut(id)? {
            Node::Internal { children, .. } => Ok(children),
            Node::Leaf { .. } => Err(SpatialError::CorruptedIndex(format!(
                "node {} was expected to be internal",
                id
            ))),
        }
    }

    pub(crate) fn node_mbr(&self, id: NodeId) -> SpatialResult<BoundingBox<D>> {
        self.node(id)?
            .compute_mbr()
            .ok_or_else(|| SpatialError::CorruptedIndex(format!("node {} is empty", id)))
    }

    /// Places a node in a free slot, reusing freed slots first.
    fn allocate_node(&mut self, node: Node<D>) -> NodeId {
        if let Some(id) = self.free_slots.pop() {
            self.nodes[id] = Some(node);
            return id;
        }
        self.nodes.push(Some(node));
        self.nodes.len() - 1
    }

    /// Takes a node out of the arena and remembers its slot for reuse.
    fn free_node(&mut self, id: NodeId) -> SpatialResult<Node<D>> {
        let node = self
            .nodes
            .get_mut(id)
            .and_then(Option::take)
            .ok_or_else(|| SpatialError::CorruptedIndex(format!("node {} freed twice", id)))?;
        self.free_slots.push(id);
        Ok(node)
    }

    // ------------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------------

    /// Places `item` into a node at `target_level`, splitting as needed.
    fn insert_item(&mut self, item: Item<D>, target_level: u32) -> SpatialResult<()> {
        let root = match self.root {
            Some(root) => root,
            None => {
                let root = self.allocate_node(Node::Leaf {
                    entries: Vec::new(),
                });
                self.root = Some(root);
                root
            }
        };

        let mbr = item.mbr();
        let mut path: Vec<(NodeId, usize)> = Vec::new();
        let mut current = root;
        loop {
            let node = self.node(current)?;
            if node.level() == target_level {
                break;
            }
            match node {
                Node::Internal { children, .. } => {
                    let idx = choose_subtree(children, &mbr).ok_or_else(|| {
                        SpatialError::CorruptedIndex(format!("internal node {} is empty", current))
                    })?;
                    path.push((current, idx));
                    current = children[idx].node;
                }
                Node::Leaf { .. } => {
                    return Err(SpatialError::CorruptedIndex(format!(
                        "no node at level {} below root",
                        target_level
                    )));
                }
            }
        }

        match (self.node_mut(current)?, item) {
            (Node::Leaf { entries }, Item::Entry(entry)) => entries.push(entry),
            (Node::Internal { children, .. }, Item::Child(child)) => children.push(child),
            _ => {
                return Err(SpatialError::CorruptedIndex(format!(
                    "node {} cannot hold an item of level {}",
                    current, target_level
                )));
            }
        }

        self.adjust_tree(path, current)
    }

    /// Walks `path` bottom-up from `current`, refreshing child MBRs and
    /// pushing splits into parents. Splitting the root grows the tree.
    fn adjust_tree(&mut self, path: Vec<(NodeId, usize)>, mut current: NodeId) -> SpatialResult<()> {
        let max_entries = self.config.max_entries;
        let mut sibling = self.split_if_overflowing(current)?;

        for (parent, idx) in path.into_iter().rev() {
            let child_mbr = self.node_mbr(current)?;
            let children = self.children_mut(parent)?;
            children[idx].mbr = child_mbr;
            if let Some(new_child) = sibling.take() {
                children.push(new_child);
            }
            if children.len() > max_entries {
                sibling = self.split_if_overflowing(parent)?;
            }
            current = parent;
        }

        if let Some(new_child) = sibling {
            let old_root = current;
            let old_mbr = self.node_mbr(old_root)?;
            let level = self.node(old_root)?.level() + 1;
            let new_root = self.allocate_node(Node::Internal {
                children: vec![
                    ChildRef {
                        mbr: old_mbr,
                        node: old_root,
                    },
                    new_child,
                ],
                level,
            });
            self.root = Some(new_root);
            log::trace!("R-tree root split, height is now {}", level);
        }
        Ok(())
    }

    /// Splits node `id` in two when it holds more than M items, returning a
    /// reference to the newly created sibling.
    fn split_if_overflowing(&mut self, id: NodeId) -> SpatialResult<Option<ChildRef<D>>> {
        let max_entries = self.config.max_entries;
        let min_entries = self.config.min_entries;

        let sibling = match self.node_mut(id)? {
            Node::Leaf { entries } if entries.len() > max_entries => {
                let mbrs: Vec<_> = entries.iter().map(|e| e.mbr).collect();
                let (_, moved) = quadratic_split(&mbrs, min_entries);
                let split_off = take_indices(entries, &moved);
                Node::Leaf { entries: split_off }
            }
            Node::Internal { children, level } if children.len() > max_entries => {
                let mbrs: Vec<_> = children.iter().map(|c| c.mbr).collect();
                let (_, moved) = quadratic_split(&mbrs, min_entries);
                let split_off = take_indices(children, &moved);
                Node::Internal {
                    children: split_off,
                    level: *level,
                }
            }
            _ => return Ok(None),
        };

        log::trace!("Split R-tree node {} at level {}", id, sibling.level());
        let mbr = sibling
            .compute_mbr()
            .ok_or_else(|| SpatialError::CorruptedIndex("split produced an empty node".into()))?;
        let node = self.allocate_node(sibling);
        Ok(Some(ChildRef { mbr, node }))
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    /// Depth-first search for an exact entry, descending into every child
    /// whose MBR overlaps `mbr`. On success `path` holds the
    /// `(node, child index)` steps from the root down to the leaf's parent.
    fn find_entry(
        &self,
        node_id: NodeId,
        mbr: &BoundingBox<D>,
        row_id: RowId,
        path: &mut Vec<(NodeId, usize)>,
    ) -> SpatialResult<Option<(NodeId, usize)>> {
        match self.node(node_id)? {
            Node::Leaf { entries } => Ok(entries
                .iter()
                .position(|e| e.row_id == row_id && e.mbr == *mbr)
                .map(|pos| (node_id, pos))),
            Node::Internal { children, .. } => {
                for (idx, child) in children.iter().enumerate() {
                    if !child.mbr.overlaps(mbr) {
                        continue;
                    }
                    path.push((node_id, idx));
                    if let Some(found) = self.find_entry(child.node, mbr, row_id, path)? {
                        return Ok(Some(found));
                    }
                    path.pop();
                }
                Ok(None)
            }
        }
    }

    /// Removes underfull nodes along `path`, reinserts what they held and
    /// collapses a root left with a single child.
    fn condense_tree(&mut self, path: Vec<(NodeId, usize)>, mut current: NodeId) -> SpatialResult<()> {
        let min_entries = self.config.min_entries;
        let mut orphans = Vec::new();

        for (parent, idx) in path.into_iter().rev() {
            if self.node(current)?.len() < min_entries {
                self.children_mut(parent)?.remove(idx);
                orphans.push(self.free_node(current)?);
            } else {
                let mbr = self.node_mbr(current)?;
                self.children_mut(parent)?[idx].mbr = mbr;
            }
            current = parent;
        }

        if !orphans.is_empty() {
            log::trace!("Condensing R-tree: reinserting {} orphaned nodes", orphans.len());
        }
        for orphan in orphans {
            match orphan {
                Node::Leaf { entries } => {
                    for entry in entries {
                        self.insert_item(Item::Entry(entry), 0)?;
                    }
                }
                Node::Internal { children, level } => {
                    for child in children {
                        self.insert_item(Item::Child(child), level)?;
                    }
                }
            }
        }

        self.collapse_root()
    }

    fn collapse_root(&mut self) -> SpatialResult<()> {
        while let Some(root) = self.root {
            let replacement = match self.node(root)? {
                Node::Internal { children, .. } if children.len() == 1 => Some(children[0].node),
                node if node.is_empty() => None,
                _ => return Ok(()),
            };
            self.free_node(root)?;
            self.root = replacement;
        }
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn mbr_of<'a, const D: usize, I>(boxes: I) -> SpatialResult<BoundingBox<D>>
where
    I: IntoIterator<Item = &'a BoundingBox<D>>,
{
    BoundingBox::compute_mbr(boxes)
        .ok_or_else(|| SpatialError::CorruptedIndex("cannot bound an empty node".into()))
}

/// Index of the child needing least enlargement to cover `mbr`; ties go to
/// the smaller resulting area, then to the first child.
fn choose_subtree<const D: usize>(children: &[ChildRef<D>], mbr: &BoundingBox<D>) -> Option<usize> {
    let mut best: Option<(usize, f64, f64)> = None;
    for (idx, child) in children.iter().enumerate() {
        let grown = child.mbr.union(mbr).area();
        let enlargement = grown - child.mbr.area();
        let better = match best {
            None => true,
            Some((_, best_enlargement, best_area)) => {
                enlargement < best_enlargement
                    || (enlargement == best_enlargement && grown < best_area)
            }
        };
        if better {
            best = Some((idx, enlargement, grown));
        }
    }
    best.map(|(idx, _, _)| idx)
}

/// Quadratic split of `mbrs` into two groups of item indices, each holding
/// at least `min_fill` items.
pub(crate) fn quadratic_split<const D: usize>(
    mbrs: &[BoundingBox<D>],
    min_fill: usize,
) -> (Vec<usize>, Vec<usize>) {
    let (seed1, seed2) = pick_seeds(mbrs);
    let mut group1 = vec![seed1];
    let mut group2 = vec![seed2];
    let mut bbox1 = mbrs[seed1];
    let mut bbox2 = mbrs[seed2];

    let mut remaining: Vec<usize> = (0..mbrs.len())
        .filter(|&i| i != seed1 && i != seed2)
        .collect();

    while !remaining.is_empty() {
        if group1.len() + remaining.len() <= min_fill {
            group1.append(&mut remaining);
            break;
        }
        if group2.len() + remaining.len() <= min_fill {
            group2.append(&mut remaining);
            break;
        }

        let pos = pick_next(mbrs, &remaining, &bbox1, &bbox2);
        let idx = remaining.remove(pos);
        let candidate = &mbrs[idx];

        let d1 = bbox1.enlargement(candidate);
        let d2 = bbox2.enlargement(candidate);
        let to_first = if d1 != d2 {
            d1 < d2
        } else {
            let a1 = bbox1.union(candidate).area();
            let a2 = bbox2.union(candidate).area();
            if a1 != a2 {
                a1 < a2
            } else {
                group1.len() <= group2.len()
            }
        };

        if to_first {
            bbox1.expand(candidate);
            group1.push(idx);
        } else {
            bbox2.expand(candidate);
            group2.push(idx);
        }
    }

    (group1, group2)
}

/// The pair wasting the most area when covered by a single box.
fn pick_seeds<const D: usize>(mbrs: &[BoundingBox<D>]) -> (usize, usize) {
    let mut best_waste = f64::NEG_INFINITY;
    let mut seeds = (0, 1);
    for i in 0..mbrs.len() {
        for j in (i + 1)..mbrs.len() {
            let waste = mbrs[i].union(&mbrs[j]).area() - mbrs[i].area() - mbrs[j].area();
            if waste > best_waste {
                best_waste = waste;
                seeds = (i, j);
            }
        }
    }
    seeds
}

/// Position in `remaining` of the item with the strongest group preference.
fn pick_next<const D: usize>(
    mbrs: &[BoundingBox<D>],
    remaining: &[usize],
    bbox1: &BoundingBox<D>,
    bbox2: &BoundingBox<D>,
) -> usize {
    let mut best_pos = 0;
    let mut best_diff = f64::NEG_INFINITY;
    for (pos, &idx) in remaining.iter().enumerate() {
        let diff = (bbox1.enlargement(&mbrs[idx]) - bbox2.enlargement(&mbrs[idx])).abs();
        if diff > best_diff {
            best_diff = diff;
            best_pos = pos;
        }
    }
    best_pos
}

/// Moves the items at `indices` out of `items`, preserving relative order.
fn take_indices<T>(items: &mut Vec<T>, indices: &[usize]) -> Vec<T> {
    let mut marked = vec![false; items.len()];
    for &idx in indices {
        marked[idx] = true;
    }
    let mut taken = Vec::with_capacity(indices.len());
    let mut kept = Vec::with_capacity(items.len() - indices.len());
    for (item, take) in items.drain(..).zip(marked) {
        if take {
            taken.push(item);
        } else {
            kept.push(item);
        }
    }
    *items = kept;
    taken
}

/// Cuts `items` into `ceil(n / max)` consecutive runs whose sizes differ by
/// at most one.
fn balanced_chunks<T>(items: Vec<T>, max: usize) -> Vec<Vec<T>> {
    let n = items.len();
    let groups = n.div_ceil(max).max(1);
    let base = n / groups;
    let extra = n % groups;
    let mut iter = items.into_iter();
    (0..groups)
        .map(|g| {
            let size = base + usize::from(g < extra);
            iter.by_ref().take(size).collect()
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::Rect;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn small_config() -> RTreeConfig {
        RTreeConfig::new(4, 2).unwrap()
    }

    fn unit_box(i: i64) -> Rect {
        let x = (i % 50) as f64;
        let y = (i / 50) as f64;
        Rect::xy(x, y, x + 0.5, y + 0.5)
    }

    fn search_ids(tree: &RTree<2>, query: &Rect) -> HashSet<RowId> {
        tree.search(query).unwrap().collect()
    }

    fn assert_valid(tree: &RTree<2>) {
        let report = tree.verify();
        assert!(report.is_valid, "tree invariants broken: {:?}", report.errors);
    }

    #[test]
    fn test_create_empty_tree() {
        let tree: RTree<2> = RTree::new(RTreeConfig::default()).unwrap();
        assert_eq!(tree.len(), 0);
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        assert!(tree.entries().unwrap().is_empty());
        assert_valid(&tree);
    }

    #[test]
    fn test_new_rejects_bad_fanout() {
        let result = RTree::<2>::new(RTreeConfig {
            max_entries: 10,
            min_entries: 6,
        });
        assert!(matches!(result, Err(SpatialError::InvalidArgument(_))));
    }

    #[test]
    fn test_insert_and_search_scenario() {
        let mut tree = RTree::new(RTreeConfig::default()).unwrap();
        tree.insert(Rect::xy(0.0, 0.0, 1.0, 1.0), 1).unwrap();
        tree.insert(Rect::xy(5.0, 5.0, 6.0, 6.0), 2).unwrap();
        tree.insert(Rect::xy(0.5, 0.5, 2.0, 2.0), 3).unwrap();

        let found = search_ids(&tree, &Rect::xy(0.0, 0.0, 1.0, 1.0));
        assert_eq!(found, HashSet::from([1, 3]));
        assert!(!found.contains(&2));
        assert_valid(&tree);
    }

    #[test]
    fn test_insert_rejects_malformed_box() {
        let mut tree = RTree::new(RTreeConfig::default()).unwrap();
        let result = tree.insert(Rect::xy(2.0, 0.0, 1.0, 1.0), 1);
        assert!(matches!(result, Err(SpatialError::InvalidArgument(_))));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_insert_splits_and_grows_height() {
        let mut tree = RTree::new(small_config()).unwrap();
        for i in 0..5 {
            tree.insert(unit_box(i), i).unwrap();
        }
        assert_eq!(tree.height(), 1, "fifth entry must split the root leaf");
        assert_valid(&tree);

        for i in 5..200 {
            tree.insert(unit_box(i), i).unwrap();
            assert_valid(&tree);
        }
        assert_eq!(tree.len(), 200);
        assert!(tree.height() >= 3);

        for i in 0..200 {
            assert!(search_ids(&tree, &unit_box(i)).contains(&i));
        }
    }

    #[test]
    fn test_duplicate_pairs_are_kept() {
        let mut tree = RTree::new(small_config()).unwrap();
        let bbox = Rect::xy(1.0, 1.0, 2.0, 2.0);
        tree.insert(bbox, 7).unwrap();
        tree.insert(bbox, 7).unwrap();
        assert_eq!(tree.len(), 2);

        assert!(tree.delete(&bbox, 7).unwrap());
        assert_eq!(tree.len(), 1);
        assert!(tree.contains_entry(&bbox, 7).unwrap());
    }

    #[test]
    fn test_delete_then_search_never_returns_row() {
        let mut tree = RTree::new(small_config()).unwrap();
        for i in 0..100 {
            tree.insert(unit_box(i), i).unwrap();
        }

        for i in (0..100).step_by(3) {
            assert!(tree.delete(&unit_box(i), i).unwrap());
            assert!(!search_ids(&tree, &unit_box(i)).contains(&i));
            assert_valid(&tree);
        }

        let everything = Rect::xy(-1.0, -1.0, 100.0, 100.0);
        let remaining = search_ids(&tree, &everything);
        let expected: HashSet<RowId> = (0..100).filter(|i| i % 3 != 0).collect();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut tree = RTree::new(small_config()).unwrap();
        for i in 0..20 {
            tree.insert(unit_box(i), i).unwrap();
        }
        let epoch = tree.epoch();

        // right box, wrong row
        assert!(!tree.delete(&unit_box(3), 99).unwrap());
        // right row, wrong box
        assert!(!tree.delete(&unit_box(4), 3).unwrap());
        assert_eq!(tree.len(), 20);
        assert_eq!(tree.epoch(), epoch);
        assert_valid(&tree);

        let mut empty: RTree<2> = RTree::new(small_config()).unwrap();
        assert!(!empty.delete(&unit_box(0), 0).unwrap());
    }

    #[test]
    fn test_delete_everything_empties_tree() {
        let mut tree = RTree::new(small_config()).unwrap();
        for i in 0..60 {
            tree.insert(unit_box(i), i).unwrap();
        }
        for i in (0..60).rev() {
            assert!(tree.delete(&unit_box(i), i).unwrap());
            assert_valid(&tree);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        assert!(tree.root.is_none());
        assert_eq!(tree.stats().node_count, 0);
        assert!(tree.verify_allocations().is_valid);
    }

    #[test]
    fn test_condense_shrinks_height() {
        let mut tree = RTree::new(small_config()).unwrap();
        for i in 0..64 {
            tree.insert(unit_box(i), i).unwrap();
        }
        let tall = tree.height();
        for i in 0..62 {
            tree.delete(&unit_box(i), i).unwrap();
        }
        assert_eq!(tree.len(), 2);
        assert!(tree.height() < tall);
        assert_eq!(tree.height(), 0, "two entries fit in a single root leaf");
        assert_valid(&tree);
    }

    #[test]
    fn test_random_workload_keeps_invariants() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut tree = RTree::new(RTreeConfig::new(8, 3).unwrap()).unwrap();
        let mut live: Vec<(Rect, RowId)> = Vec::new();

        for row_id in 0..2_000 {
            if !live.is_empty() && rng.gen_bool(0.35) {
                let victim = rng.gen_range(0..live.len());
                let (bbox, id) = live.swap_remove(victim);
                assert!(tree.delete(&bbox, id).unwrap());
            } else {
                let x = rng.gen_range(0.0..1000.0);
                let y = rng.gen_range(0.0..1000.0);
                let bbox = Rect::xy(x, y, x + rng.gen_range(0.0..20.0), y + rng.gen_range(0.0..20.0));
                tree.insert(bbox, row_id).unwrap();
                live.push((bbox, row_id));
            }
        }

        assert_valid(&tree);
        assert!(tree.verify_allocations().is_valid);
        assert_eq!(tree.len(), live.len());
        for (bbox, id) in &live {
            assert!(search_ids(&tree, bbox).contains(id));
        }
    }

    #[test]
    fn test_search_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = RTree::new(RTreeConfig::new(6, 2).unwrap()).unwrap();
        let mut all = Vec::new();
        for row_id in 0..500 {
            let x = rng.gen_range(0.0..100.0);
            let y = rng.gen_range(0.0..100.0);
            let bbox = Rect::xy(x, y, x + 2.0, y + 2.0);
            tree.insert(bbox, row_id).unwrap();
            all.push((bbox, row_id));
        }

        for _ in 0..50 {
            let x = rng.gen_range(0.0..100.0);
            let y = rng.gen_range(0.0..100.0);
            let query = Rect::xy(x, y, x + 10.0, y + 10.0);
            let expected: HashSet<RowId> = all
                .iter()
                .filter(|(bbox, _)| bbox.overlaps(&query))
                .map(|(_, id)| *id)
                .collect();
            assert_eq!(search_ids(&tree, &query), expected);
        }
    }

    #[test]
    fn test_bulk_construct_length_mismatch() {
        let boxes = vec![unit_box(0), unit_box(1)];
        let result = RTree::bulk_construct(RTreeConfig::default(), &boxes, &[1]);
        assert!(matches!(result, Err(SpatialError::InvalidArgument(_))));
    }

    #[test]
    fn test_bulk_construct_empty() {
        let tree: RTree<2> = RTree::bulk_construct(RTreeConfig::default(), &[], &[]).unwrap();
        assert!(tree.is_empty());
        assert!(tree.root.is_none());
    }

    #[test]
    fn test_bulk_construct_round_trip() {
        let boxes: Vec<Rect> = (0..1_000).map(unit_box).collect();
        let row_ids: Vec<RowId> = (0..1_000).collect();
        let tree = RTree::bulk_construct(small_config(), &boxes, &row_ids).unwrap();

        assert_eq!(tree.len(), 1_000);
        assert_valid(&tree);
        for (bbox, id) in boxes.iter().zip(&row_ids) {
            assert!(search_ids(&tree, bbox).contains(id));
        }
    }

    #[test]
    fn test_bulk_construct_height_and_full_scan() {
        let mut rng = StdRng::seed_from_u64(10_000);
        let n = 10_000;
        let boxes: Vec<Rect> = (0..n)
            .map(|_| {
                let x = rng.gen_range(0.0..1_000.0);
                let y = rng.gen_range(0.0..1_000.0);
                Rect::xy(x, y, x + 1.0, y + 1.0)
            })
            .collect();
        let row_ids: Vec<RowId> = (0..n as RowId).collect();
        let config = RTreeConfig::default();
        let tree = RTree::bulk_construct(config, &boxes, &row_ids).unwrap();

        // levels == ceil(log_M(n))
        let mut levels = 1;
        let mut capacity = config.max_entries;
        while capacity < n {
            capacity *= config.max_entries;
            levels += 1;
        }
        assert_eq!(tree.height() + 1, levels);
        assert_valid(&tree);

        let everything = Rect::xy(-1.0, -1.0, 1_002.0, 1_002.0);
        let mut found: Vec<RowId> = tree.search(&everything).unwrap().collect();
        assert_eq!(found.len(), n);
        found.sort_unstable();
        found.dedup();
        assert_eq!(found.len(), n, "every row id exactly once");
    }

    #[test]
    fn test_bulk_construct_then_mutate() {
        let boxes: Vec<Rect> = (0..300).map(unit_box).collect();
        let row_ids: Vec<RowId> = (0..300).collect();
        let mut tree = RTree::bulk_construct(RTreeConfig::new(8, 4).unwrap(), &boxes, &row_ids).unwrap();

        for i in 300..400 {
            tree.insert(unit_box(i), i).unwrap();
        }
        for i in 0..150 {
            assert!(tree.delete(&unit_box(i), i).unwrap());
        }
        assert_eq!(tree.len(), 250);
        assert_valid(&tree);
    }

    #[test]
    fn test_merge_leaves_inputs_unchanged() {
        let mut left = RTree::new(small_config()).unwrap();
        let mut right = RTree::new(small_config()).unwrap();
        for i in 0..30 {
            left.insert(unit_box(i), i).unwrap();
        }
        for i in 30..50 {
            right.insert(unit_box(i), i).unwrap();
        }

        let merged = left.merge(&right).unwrap();
        assert_eq!(merged.len(), 50);
        assert_eq!(left.len(), 30);
        assert_eq!(right.len(), 20);
        assert_valid(&merged);

        let everything = Rect::xy(-1.0, -1.0, 100.0, 100.0);
        assert_eq!(search_ids(&merged, &everything), (0..50).collect());
    }

    #[test]
    fn test_vacuum_repacks() {
        let mut tree = RTree::new(small_config()).unwrap();
        for i in 0..500 {
            tree.insert(unit_box(i), i).unwrap();
        }
        for i in 0..400 {
            tree.delete(&unit_box(i), i).unwrap();
        }
        let epoch = tree.epoch();

        let stats = tree.vacuum().unwrap();
        assert_eq!(stats.entries_reindexed, 100);
        assert!(stats.nodes_after <= stats.nodes_before);
        assert!(tree.epoch() > epoch);
        assert_eq!(tree.stats().free_slots, 0);
        assert_valid(&tree);
        assert!(tree.verify_allocations().is_valid);

        let everything = Rect::xy(-1.0, -1.0, 100.0, 100.0);
        assert_eq!(search_ids(&tree, &everything), (400..500).collect());
    }

    #[test]
    fn test_clear() {
        let mut tree = RTree::new(small_config()).unwrap();
        for i in 0..10 {
            tree.insert(unit_box(i), i).unwrap();
        }
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.stats(), RTreeStats::default());
    }

    #[test]
    fn test_in_memory_size_grows() {
        let mut tree = RTree::new(RTreeConfig::default()).unwrap();
        let empty = tree.in_memory_size();
        for i in 0..1_000 {
            tree.insert(unit_box(i), i).unwrap();
        }
        assert!(tree.in_memory_size() > empty + 1_000 * std::mem::size_of::<LeafEntry<2>>());
    }

    #[test]
    fn test_four_dimensional_boxes() {
        use crate::bounding_box::STBox;

        let mut tree = RTree::new(small_config()).unwrap();
        for i in 0..100 {
            let x = i as f64;
            tree.insert(STBox::xyt(x, x, x + 1.0, x + 1.0, x * 10.0, x * 10.0 + 5.0), i)
                .unwrap();
        }
        let query = STBox::xyt(0.0, 0.0, 1000.0, 1000.0, 100.0, 120.0);
        let found: HashSet<RowId> = tree.search(&query).unwrap().collect();
        assert_eq!(found, HashSet::from([10, 11, 12]));
    }

    #[test]
    fn test_quadratic_split_respects_min_fill() {
        let mbrs = vec![
            Rect::xy(0.0, 0.0, 1.0, 1.0),
            Rect::xy(100.0, 100.0, 101.0, 101.0),
            Rect::xy(0.5, 0.5, 1.5, 1.5),
            Rect::xy(0.2, 0.2, 0.3, 0.3),
            Rect::xy(0.1, 0.9, 0.4, 1.2),
        ];
        let (g1, g2) = quadratic_split(&mbrs, 2);
        assert_eq!(g1.len() + g2.len(), 5);
        assert!(g1.len() >= 2 && g2.len() >= 2);

        let mut all: Vec<usize> = g1.iter().chain(g2.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_quadratic_split_picks_distant_seeds() {
        let mbrs = vec![
            Rect::xy(0.0, 0.0, 1.0, 1.0),
            Rect::xy(0.1, 0.1, 1.1, 1.1),
            Rect::xy(50.0, 50.0, 51.0, 51.0),
            Rect::xy(0.2, 0.2, 0.9, 0.9),
            Rect::xy(50.5, 50.5, 51.5, 51.5),
        ];
        let (seed1, seed2) = pick_seeds(&mbrs);
        let far = [2, 4];
        assert!(far.contains(&seed1) != far.contains(&seed2));

        let (g1, g2) = quadratic_split(&mbrs, 2);
        let (near_group, far_group) = if g1.contains(&2) { (g2, g1) } else { (g1, g2) };
        assert!(far_group.contains(&4));
        assert!(near_group.contains(&0) && near_group.contains(&1) && near_group.contains(&3));
    }

    #[test]
    fn test_choose_subtree_tie_breaks() {
        let children = vec![
            ChildRef {
                mbr: Rect::xy(0.0, 0.0, 10.0, 10.0),
                node: 0,
            },
            ChildRef {
                mbr: Rect::xy(0.0, 0.0, 4.0, 4.0),
                node: 1,
            },
            ChildRef {
                mbr: Rect::xy(0.0, 0.0, 4.0, 4.0),
                node: 2,
            },
        ];
        // contained everywhere: zero enlargement, smallest area wins, first of equals
        assert_eq!(choose_subtree(&children, &Rect::xy(1.0, 1.0, 2.0, 2.0)), Some(1));
        assert_eq!(choose_subtree::<2>(&[], &Rect::xy(1.0, 1.0, 2.0, 2.0)), None);
    }

    #[test]
    fn test_balanced_chunks() {
        let chunks = balanced_chunks((0..10).collect::<Vec<_>>(), 4);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(chunks.concat(), (0..10).collect::<Vec<_>>());

        let single = balanced_chunks(vec![1, 2], 4);
        assert_eq!(single, vec![vec![1, 2]]);
    }

    #[test]
    fn test_take_indices() {
        let mut items = vec!['a', 'b', 'c', 'd', 'e'];
        let taken = take_indices(&mut items, &[3, 0]);
        assert_eq!(taken, vec!['a', 'd']);
        assert_eq!(items, vec!['b', 'c', 'e']);
    }
}
