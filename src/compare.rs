//! Locating the first disagreement between a local and a submitted pollard.
//!
//! This is the narrowing step of the dispute game: the challenger compares the
//! proposer's pollard with its own, picks the first entry that differs, and
//! takes the proposer's claim about that one node (plus the proof tying it to
//! the pollard's root) as the next thing to challenge.

use serde::{Deserialize, Serialize};

use crate::error::TreeError;
use crate::index::virtual_from_local;
use crate::node::VotingTreeNode;
use crate::pollard::extract_pollard;
use crate::tree::VotingTree;

/// The disputed node found by [`compare_pollards`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeArtifacts {
    /// Virtual index of the disputed node.
    pub virtual_index: u64,
    /// The node as claimed by the submitter.
    pub node: VotingTreeNode,
    /// Proof of `node` against the root of the submitted pollard.
    pub proof: Vec<VotingTreeNode>,
}

/// Compares `submitted` with the pollard `tree` derives at `virtual_root_index`.
///
/// Returns `Ok(None)` when every entry agrees.
pub fn compare_pollards(
    tree: &VotingTree,
    virtual_root_index: u64,
    submitted: &[VotingTreeNode],
) -> Result<Option<ChallengeArtifacts>, TreeError> {
    let local_pollard = extract_pollard(tree, virtual_root_index)?;
    if local_pollard.len() != submitted.len() {
        return Err(TreeError::PollardSizeMismatch {
            local: local_pollard.len(),
            submitted: submitted.len(),
        });
    }

    let Some(position) = local_pollard
        .iter()
        .zip(submitted)
        .position(|(local, theirs)| !local.same_commitment(theirs))
    else {
        return Ok(None);
    };

    // Re-rooted at 1, a pollard of size 2^k occupies local indices [2^k, 2^(k+1)).
    let local_index = (local_pollard.len() + position) as u64;
    let virtual_index = virtual_from_local(virtual_root_index, local_index).ok_or(
        TreeError::IndexOutOfRange {
            index: local_index,
            node_count: tree.node_count(),
        },
    )?;

    let claimed = VotingTree::with_depth_per_round(
        submitted,
        virtual_root_index,
        tree.depth_per_round(),
    )?;
    let (node, proof) = claimed.artifacts_for_challenge(virtual_index)?;
    Ok(Some(ChallengeArtifacts {
        virtual_index,
        node,
        proof,
    }))
}
