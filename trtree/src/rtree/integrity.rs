//! Structural verification of an [`RTree`].

use std::collections::HashSet;
use std::fmt::{self, Display, Write};

use super::rtree_impl::RTree;
use super::rtree_types::{Node, NodeId};

/// Integrity check report
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Total nodes checked
    pub nodes_checked: u64,
    /// Leaf entries seen while walking the tree
    pub entries_checked: u64,
    /// Nodes that break a structural invariant
    pub corrupted_nodes: Vec<NodeId>,
    /// Live nodes unreachable from the root
    pub orphaned_nodes: Vec<NodeId>,
    /// Summary of findings
    pub is_valid: bool,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            nodes_checked: 0,
            entries_checked: 0,
            corrupted_nodes: Vec::new(),
            orphaned_nodes: Vec::new(),
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn corrupt(&mut self, node: NodeId, message: String) {
        if !self.corrupted_nodes.contains(&node) {
            self.corrupted_nodes.push(node);
        }
        self.fail(format!("Node {}: {}", node, message));
    }

    fn fail(&mut self, message: String) {
        self.errors.push(message);
        self.is_valid = false;
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid {
            write!(
                f,
                "ok: {} nodes, {} entries",
                self.nodes_checked, self.entries_checked
            )
        } else {
            write!(f, "{} errors", self.errors.len())?;
            for error in &self.errors {
                write!(f, "\n  {}", error)?;
            }
            Ok(())
        }
    }
}

impl<const D: usize> RTree<D> {
    /// Checks every structural invariant reachable from the root:
    /// - all leaves sit at the same depth and child levels step down by one
    /// - every child reference carries the exact MBR of its node
    /// - non-root nodes hold between `m` and `M` items, the root at most `M`
    /// - no node is referenced twice
    /// - the number of leaf entries matches the tree's length
    pub fn verify(&self) -> IntegrityReport {
        let mut report = IntegrityReport::new();

        let Some(root) = self.root else {
            if self.len != 0 {
                report.fail(format!("empty tree reports {} entries", self.len));
            }
            return report;
        };
        let level = match self.node(root) {
            Ok(node) => node.level(),
            Err(e) => {
                report.fail(format!("Root {}: {}", root, e));
                return report;
            }
        };

        // (node, level it must sit at, is root)
        let mut visited = HashSet::new();
        let mut stack = vec![(root, level, true)];
        while let Some((id, expected_level, is_root)) = stack.pop() {
            let children =
                self.verify_node(id, expected_level, is_root, &mut visited, &mut report);
            if let Some(children) = children {
                stack.extend(children.into_iter().rev());
            }
        }

        if report.entries_checked != self.len as u64 {
            report.fail(format!(
                "tree reports {} entries but {} are reachable",
                self.len, report.entries_checked
            ));
        }
        report
    }

    /// Checks one node and returns the children still worth descending into.
    ///
    /// A node with a wrong level or fanout is reported and not descended, so
    /// a damaged tree never drives the walk deeper than its levels allow.
    fn verify_node(
        &self,
        id: NodeId,
        expected_level: u32,
        is_root: bool,
        visited: &mut HashSet<NodeId>,
        report: &mut IntegrityReport,
    ) -> Option<Vec<(NodeId, u32, bool)>> {
        if !visited.insert(id) {
            report.corrupt(id, "referenced more than once".into());
            return None;
        }
        let node = match self.node(id) {
            Ok(node) => node,
            Err(e) => {
                report.corrupt(id, e.to_string());
                return None;
            }
        };
        report.nodes_checked += 1;

        let mut sound = true;
        if node.level() != expected_level {
            report.corrupt(
                id,
                format!("level {} where {} was expected", node.level(), expected_level),
            );
            sound = false;
        }

        let count = node.len();
        let max = self.config.max_entries;
        let min = if is_root {
            if node.is_leaf() { 1 } else { 2 }
        } else {
            self.config.min_entries
        };
        if count < min || count > max {
            report.corrupt(id, format!("holds {} items, outside [{}, {}]", count, min, max));
            sound = false;
        }

        match node {
            Node::Leaf { entries } => {
                report.entries_checked += entries.len() as u64;
                for entry in entries {
                    if let Err(e) = entry.mbr.validate() {
                        report.corrupt(id, format!("row {}: {}", entry.row_id, e));
                    }
                }
                None
            }
            Node::Internal { level: 0, .. } => {
                report.corrupt(id, "internal node at leaf level".into());
                None
            }
            Node::Internal { children, level } => {
                for child in children {
                    match self.node(child.node).map(Node::compute_mbr) {
                        Ok(Some(actual)) if actual != child.mbr => report.corrupt(
                            id,
                            format!(
                                "child {} is recorded as {} but spans {}",
                                child.node, child.mbr, actual
                            ),
                        ),
                        _ => {}
                    }
                }
                sound.then(|| children.iter().map(|c| (c.node, level - 1, false)).collect())
            }
        }
    }

    /// Checks the node arena: every live slot is reachable from the root and
    /// every free slot is empty and listed once.
    pub fn verify_allocations(&self) -> IntegrityReport {
        let mut report = IntegrityReport::new();

        let mut reachable = HashSet::new();
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            match self.node(id) {
                Ok(Node::Internal { children, .. }) => {
                    stack.extend(children.iter().map(|c| c.node));
                }
                Ok(Node::Leaf { .. }) => {}
                Err(e) => report.corrupt(id, e.to_string()),
            }
        }

        let mut free = HashSet::new();
        for &slot in &self.free_slots {
            if !free.insert(slot) {
                report.corrupt(slot, "listed as free more than once".into());
            }
            if matches!(self.nodes.get(slot), Some(Some(_))) {
                report.corrupt(slot, "listed as free but holds a node".into());
            }
            if slot >= self.nodes.len() {
                report.corrupt(slot, "free slot is outside the arena".into());
            }
        }

        for (slot, node) in self.nodes.iter().enumerate() {
            report.nodes_checked += 1;
            match node {
                Some(_) if !reachable.contains(&slot) => {
                    report.orphaned_nodes.push(slot);
                    report.fail(format!("Node {}: allocated but unreachable", slot));
                }
                None if !free.contains(&slot) => {
                    report.fail(format!("Slot {}: empty but not on the free list", slot));
                }
                _ => {}
            }
        }

        report
    }

    /// Renders the tree one node per line, indented by depth.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "RTree(len={}, height={}, M={}, m={})",
            self.len,
            self.height(),
            self.config.max_entries,
            self.config.min_entries
        );
        if let Some(root) = self.root {
            self.dump_node(root, 1, &mut out);
        }
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Ok(Node::Leaf { entries }) => {
                let _ = writeln!(out, "{}leaf #{} ({} entries)", indent, id, entries.len());
                for entry in entries {
                    let _ = writeln!(out, "{}  {} -> {}", indent, entry.mbr, entry.row_id);
                }
            }
            Ok(Node::Internal { children, level }) => {
                let _ = writeln!(
                    out,
                    "{}node #{} level {} ({} children)",
                    indent,
                    id,
                    level,
                    children.len()
                );
                for child in children {
                    let _ = writeln!(out, "{}  {}", indent, child.mbr);
                    self.dump_node(child.node, depth + 2, out);
                }
            }
            Err(e) => {
                let _ = writeln!(out, "{}<{}>", indent, e);
            }
        }
    }
}
