//! Overlap search over an [`RTree`].
//!
//! Both the eager [`SearchIter`] and the resumable [`ScanCursor`] run the same
//! depth-first [`Traversal`]: a stack of `(node, next item)` frames that can be
//! suspended after any match and resumed later.

use crate::bounding_box::BoundingBox;
use crate::rtree::{Node, NodeId, RTree, RowId, SpatialError, SpatialResult};

/// Suspended depth-first walk over nodes overlapping a query box.
#[derive(Debug, Clone)]
struct Traversal<const D: usize> {
    query: BoundingBox<D>,
    stack: Vec<(NodeId, usize)>,
}

enum Step {
    Emit(RowId),
    Descend(NodeId),
    Pop,
}

impl<const D: usize> Traversal<D> {
    fn new(tree: &RTree<D>, query: BoundingBox<D>) -> Self {
        Self {
            query,
            stack: tree.root.map(|root| (root, 0)).into_iter().collect(),
        }
    }

    fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    /// Resumes the walk until the next matching row id.
    fn next_match(&mut self, tree: &RTree<D>) -> SpatialResult<Option<RowId>> {
        while let Some(frame) = self.stack.last_mut() {
            let (node_id, next) = *frame;
            let step = match tree.node(node_id)? {
                Node::Leaf { entries } => entries
                    .get(next..)
                    .unwrap_or_default()
                    .iter()
                    .position(|e| e.mbr.overlaps(&self.query))
                    .map(|offset| {
                        frame.1 = next + offset + 1;
                        Step::Emit(entries[next + offset].row_id)
                    })
                    .unwrap_or(Step::Pop),
                Node::Internal { children, .. } => children
                    .get(next..)
                    .unwrap_or_default()
                    .iter()
                    .position(|c| c.mbr.overlaps(&self.query))
                    .map(|offset| {
                        frame.1 = next + offset + 1;
                        Step::Descend(children[next + offset].node)
                    })
                    .unwrap_or(Step::Pop),
            };

            match step {
                Step::Emit(row_id) => return Ok(Some(row_id)),
                Step::Descend(child) => self.stack.push((child, 0)),
                Step::Pop => {
                    self.stack.pop();
                }
            }
        }
        Ok(None)
    }
}

/// Lazy iterator over the row ids whose boxes overlap a query box.
///
/// Borrows the tree, so the tree cannot change while the iterator lives.
/// Result order follows the tree shape and is unspecified.
pub struct SearchIter<'a, const D: usize> {
    tree: &'a RTree<D>,
    traversal: Traversal<D>,
}

impl<const D: usize> Iterator for SearchIter<'_, D> {
    type Item = RowId;

    fn next(&mut self) -> Option<RowId> {
        match self.traversal.next_match(self.tree) {
            Ok(next) => next,
            Err(e) => {
                log::warn!("Search aborted on a corrupted R-tree: {}", e);
                self.traversal.stack.clear();
                None
            }
        }
    }
}

/// Lifecycle of a [`ScanCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Opened, nothing returned yet
    Created,
    /// At least one batch has been returned and more may follow
    Active,
    /// No further matches
    Exhausted,
}

/// Resumable scan over a query's matches.
///
/// A cursor owns its traversal stack, so any number of cursors can be open
/// on the same tree. It is bound to the tree version it was opened on:
/// advancing it after the tree changed fails with `InvalidOperation`.
#[derive(Debug, Clone)]
pub struct ScanCursor<const D: usize> {
    traversal: Traversal<D>,
    state: CursorState,
    epoch: u64,
}

impl<const D: usize> ScanCursor<D> {
    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn query(&self) -> &BoundingBox<D> {
        &self.traversal.query
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }
}

impl<const D: usize> RTree<D> {
    /// Returns a lazy iterator over row ids whose boxes overlap `query`.
    ///
    /// Fails with `InvalidArgument` if `query` has `min > max` on any axis.
    pub fn search(&self, query: &BoundingBox<D>) -> SpatialResult<SearchIter<'_, D>> {
        query.validate()?;
        Ok(SearchIter {
            tree: self,
            traversal: Traversal::new(self, *query),
        })
    }

    /// Opens a cursor over the matches of `query`. A cursor over an empty
    /// tree starts exhausted.
    pub fn initialize_scan(&self, query: &BoundingBox<D>) -> SpatialResult<ScanCursor<D>> {
        query.validate()?;
        let traversal = Traversal::new(self, *query);
        let state = if traversal.is_done() {
            CursorState::Exhausted
        } else {
            CursorState::Created
        };
        Ok(ScanCursor {
            traversal,
            state,
            epoch: self.epoch,
        })
    }

    /// Appends up to `max_count` further matches of `cursor` to `out` and
    /// returns how many were appended. Returns 0 once the cursor is exhausted.
    pub fn advance(
        &self,
        cursor: &mut ScanCursor<D>,
        out: &mut Vec<RowId>,
        max_count: usize,
    ) -> SpatialResult<usize> {
        if max_count == 0 {
            return Err(SpatialError::InvalidArgument(
                "scan batch size must be positive".into(),
            ));
        }
        if cursor.state == CursorState::Exhausted {
            return Ok(0);
        }
        if cursor.epoch != self.epoch {
            return Err(SpatialError::InvalidOperation(format!(
                "cursor was opened at version {} but the tree is at version {}",
                cursor.epoch, self.epoch
            )));
        }

        let mut count = 0;
        while count < max_count {
            match cursor.traversal.next_match(self)? {
                Some(row_id) => {
                    out.push(row_id);
                    count += 1;
                }
                None => break,
            }
        }

        cursor.state = if cursor.traversal.is_done() {
            CursorState::Exhausted
        } else {
            CursorState::Active
        };
        Ok(count)
    }
}
