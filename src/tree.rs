//! Generic tree operations.
//!
//! A tree is acyclic; a node may be a child of several parents, so identical
//! subtrees can be shared. Equality and hashing come in two flavours:
//! node-wise (ignoring children) and tree-wise (node-wise combined recursively
//! with the children, in order).

use std::hash::Hasher;

use crate::key::stable_hasher;

/// A node of a tree whose children have the same handle type.
pub trait TreeNode: Clone {
    /// The children, in order.
    fn tree_children(&self) -> Vec<Self>;

    /// Node-wise equality, ignoring children.
    fn node_eq(&self, other: &Self) -> bool;

    /// Node-wise hash, consistent with [`node_eq`](Self::node_eq).
    fn node_hash(&self) -> u64;

    /// Tree-wise equality.
    fn tree_eq(&self, other: &Self) -> bool {
        if !self.node_eq(other) {
            return false;
        }
        let mine = self.tree_children();
        let theirs = other.tree_children();
        mine.len() == theirs.len() && mine.iter().zip(theirs.iter()).all(|(a, b)| a.tree_eq(b))
    }

    /// Tree-wise hash, consistent with [`tree_eq`](Self::tree_eq).
    fn tree_hash(&self) -> u64 {
        combine_hashes(
            self.node_hash(),
            self.tree_children().iter().map(TreeNode::tree_hash),
        )
    }

    /// Pre-order traversal; shared subtrees are visited once per occurrence.
    fn pre_order(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            let children = node.tree_children();
            out.push(node);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Number of nodes counting shared subtrees once per occurrence.
    fn node_count(&self) -> usize {
        1 + self
            .tree_children()
            .iter()
            .map(TreeNode::node_count)
            .sum::<usize>()
    }

    /// Length of the longest root-to-leaf path, a leaf having depth 1.
    fn depth(&self) -> usize {
        1 + self
            .tree_children()
            .iter()
            .map(TreeNode::depth)
            .max()
            .unwrap_or(0)
    }
}

/// Combine a node hash with its children's tree hashes, order-sensitively.
pub fn combine_hashes(node_hash: u64, children: impl IntoIterator<Item = u64>) -> u64 {
    let mut hasher = stable_hasher();
    hasher.write_u64(node_hash);
    let mut count = 0usize;
    for child in children {
        hasher.write_u64(child);
        count += 1;
    }
    hasher.write_usize(count);
    hasher.finish()
}
