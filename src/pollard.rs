//! Pollard extraction: bounded-depth windows of a voting tree.
//!
//! A pollard rooted at node `r` is the row of `r`'s descendants
//! `depth_per_round` levels below it, clamped to the tree's depth. It is what
//! a proposer publishes with a proposal and what it reveals when one of its
//! nodes is challenged.

use crate::error::TreeError;
use crate::node::VotingTreeNode;
use crate::tree::VotingTree;

/// Levels revealed per challenge round; bounds the on-chain cost of a round.
pub const DEPTH_PER_ROUND: u32 = 5;

/// Number of nodes in a pollard rooted at `local` for a tree of `depth`.
pub fn pollard_size(local: u64, depth: u32, depth_per_round: u32) -> u64 {
    let root_level = local.ilog2();
    let absolute_depth = root_level
        .saturating_add(depth_per_round)
        .min(depth)
        .max(root_level);
    1u64 << (absolute_depth - root_level)
}

/// Extracts the pollard rooted at `virtual_root_index`.
pub fn extract_pollard(
    tree: &VotingTree,
    virtual_root_index: u64,
) -> Result<&[VotingTreeNode], TreeError> {
    let local = tree.local_index(virtual_root_index)?;
    let size = pollard_size(local, tree.depth(), tree.depth_per_round());

    // Descendants of `local` that many levels down start at local index `local * size`.
    let out_of_range = TreeError::IndexOutOfRange {
        index: virtual_root_index,
        node_count: tree.node_count(),
    };
    let first = local
        .checked_mul(size)
        .ok_or_else(|| out_of_range.clone())?
        - 1;
    let last = first + size;
    if last > tree.node_count() {
        return Err(out_of_range);
    }
    Ok(&tree.nodes()[first as usize..last as usize])
}
