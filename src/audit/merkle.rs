//! Merkle Tree for Audit Exports
//!
//! Builds a SHA-256 Merkle tree over event integrity hashes so an exported
//! batch can be committed to with a single root and checked later.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tracing::debug;

use crate::audit::chain::HASH_PREFIX;

/// Merkle tree node
#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub hash: String,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    pub fn leaf(integrity_hash: &str) -> Self {
        Self {
            hash: integrity_hash.to_string(),
            left: None,
            right: None,
        }
    }

    pub fn internal(left: MerkleNode, right: MerkleNode) -> Self {
        Self {
            hash: combine(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    /// An odd node at the end of a level is paired with itself. The subtree
    /// is kept once, on the left.
    pub fn single_child(child: MerkleNode) -> Self {
        Self {
            hash: combine(&child.hash, &child.hash),
            left: Some(Box::new(child)),
            right: None,
        }
    }
}

fn combine(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    format!("{}{}", HASH_PREFIX, hex::encode(hasher.finalize()))
}

/// Build the tree over `hashes` in the given order. `None` when empty.
pub fn build_merkle_tree(hashes: &[String]) -> Option<MerkleNode> {
    let mut nodes: VecDeque<MerkleNode> = hashes.iter().map(|h| MerkleNode::leaf(h)).collect();
    if nodes.is_empty() {
        return None;
    }

    while nodes.len() > 1 {
        let mut next_level = VecDeque::with_capacity(nodes.len() / 2 + 1);
        while let Some(left) = nodes.pop_front() {
            match nodes.pop_front() {
                Some(right) => next_level.push_back(MerkleNode::internal(left, right)),
                None => next_level.push_back(MerkleNode::single_child(left)),
            }
        }
        nodes = next_level;
    }

    let root = nodes.pop_front();
    if let Some(root) = &root {
        debug!("Merkle root over {} hashes: {}", hashes.len(), root.hash);
    }
    root
}

/// Root hash only, computed one level at a time without building nodes.
pub fn merkle_root(hashes: &[String]) -> Option<String> {
    let mut level: Vec<String> = hashes.to_vec();
    if level.is_empty() {
        return None;
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| combine(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level.pop()
}

pub fn verify_merkle_root(hashes: &[String], claimed_root: &str) -> bool {
    merkle_root(hashes).map_or(false, |root| root == claimed_root)
}
