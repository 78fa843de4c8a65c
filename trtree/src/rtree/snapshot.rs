//! Snapshot codec for handing a tree to a host-owned serializer.
//!
//! A snapshot is a bincode envelope carrying a magic number, a format
//! version, the number of axes and a CRC32 of the payload. The payload holds
//! the fanout parameters, the entry count, the root slot and the node arena.

use serde::{Deserialize, Serialize};

use super::rtree_constants::{MAGIC, VERSION};
use super::rtree_impl::{next_epoch, RTree};
use super::rtree_types::{Node, NodeId, RTreeConfig, SpatialError, SpatialResult};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    magic: u32,
    version: u32,
    dims: u32,
    checksum: u32,
    payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeSnapshot<const D: usize> {
    config: RTreeConfig,
    len: u64,
    root: Option<NodeId>,
    nodes: Vec<Option<Node<D>>>,
    free_slots: Vec<NodeId>,
}

/// Serializes `tree` into a self-describing, checksummed blob.
pub fn encode_snapshot<const D: usize>(tree: &RTree<D>) -> SpatialResult<Vec<u8>> {
    let snapshot = TreeSnapshot {
        config: tree.config,
        len: tree.len as u64,
        root: tree.root,
        nodes: tree.nodes.clone(),
        free_slots: tree.free_slots.clone(),
    };
    let payload = bincode::serde::encode_to_vec(&snapshot, bincode::config::legacy())
        .map_err(|e| SpatialError::Serialization(e.to_string()))?;

    let envelope = Envelope {
        magic: MAGIC,
        version: VERSION,
        dims: D as u32,
        checksum: crc32fast::hash(&payload),
        payload,
    };
    bincode::serde::encode_to_vec(&envelope, bincode::config::legacy())
        .map_err(|e| SpatialError::Serialization(e.to_string()))
}

/// Restores a tree from a blob produced by [`encode_snapshot`].
///
/// The restored tree is fully verified before it is returned.
pub fn decode_snapshot<const D: usize>(bytes: &[u8]) -> SpatialResult<RTree<D>> {
    let (envelope, _): (Envelope, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::legacy()).map_err(|e| {
            SpatialError::CorruptedIndex(format!("unreadable snapshot envelope: {}", e))
        })?;

    if envelope.magic != MAGIC {
        return Err(SpatialError::InvalidArgument(format!(
            "not an R-tree snapshot (magic {:#010x})",
            envelope.magic
        )));
    }
    if envelope.version != VERSION {
        return Err(SpatialError::InvalidArgument(format!(
            "unsupported snapshot version {} (expected {})",
            envelope.version, VERSION
        )));
    }
    if envelope.dims != D as u32 {
        return Err(SpatialError::InvalidArgument(format!(
            "snapshot holds {}-dimensional boxes, expected {}",
            envelope.dims, D
        )));
    }

    let actual = crc32fast::hash(&envelope.payload);
    if actual != envelope.checksum {
        return Err(SpatialError::CorruptedIndex(format!(
            "snapshot checksum mismatch (expected: {:x}, got: {:x})",
            envelope.checksum, actual
        )));
    }

    let (snapshot, _): (TreeSnapshot<D>, usize) =
        bincode::serde::decode_from_slice(&envelope.payload, bincode::config::legacy())
            .map_err(|e| SpatialError::CorruptedIndex(format!("unreadable snapshot: {}", e)))?;

    snapshot
        .config
        .validate()
        .map_err(|e| SpatialError::CorruptedIndex(e.to_string()))?;

    let tree = RTree {
        config: snapshot.config,
        nodes: snapshot.nodes,
        free_slots: snapshot.free_slots,
        root: snapshot.root,
        len: snapshot.len as usize,
        epoch: next_epoch(),
    };

    let report = tree.verify();
    if !report.is_valid {
        return Err(SpatialError::CorruptedIndex(report.to_string()));
    }
    let report = tree.verify_allocations();
    if !report.is_valid {
        return Err(SpatialError::CorruptedIndex(report.to_string()));
    }
    Ok(tree)
}
