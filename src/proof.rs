//! Merkle sum proofs over voting trees.

use crate::error::TreeError;
use crate::node::VotingTreeNode;
use crate::tree::VotingTree;

/// Collects the siblings on the path from `local` up to, but excluding, the root.
///
/// The proof is ordered leaf-to-root. `local` is a local index, not a virtual one.
pub fn build_proof(tree: &VotingTree, local: u64) -> Result<Vec<VotingTreeNode>, TreeError> {
    tree.node(local)?;
    let mut proof = Vec::with_capacity(local.ilog2() as usize);
    let mut index = local;
    while index > 1 {
        let sibling = if index % 2 == 0 { index + 1 } else { index - 1 };
        proof.push(tree.node(sibling)?.clone());
        index /= 2;
    }
    Ok(proof)
}

/// Folds `proof` against `node` (found at `local`) and returns the implied root.
pub fn root_from_proof(
    local: u64,
    node: &VotingTreeNode,
    proof: &[VotingTreeNode],
) -> Result<VotingTreeNode, TreeError> {
    if local == 0 || (local.ilog2() as usize) != proof.len() {
        return Err(TreeError::MalformedProof {
            index: local,
            proof_len: proof.len(),
        });
    }
    let mut index = local;
    let mut current = node.clone();
    for sibling in proof {
        current = if index % 2 == 0 {
            VotingTreeNode::parent(&current, sibling)?
        } else {
            VotingTreeNode::parent(sibling, &current)?
        };
        index /= 2;
    }
    Ok(current)
}

/// Checks that `proof` places `node` at `local` under `root`.
pub fn verify_proof(
    local: u64,
    node: &VotingTreeNode,
    proof: &[VotingTreeNode],
    root: &VotingTreeNode,
) -> bool {
    match root_from_proof(local, node, proof) {
        Ok(folded) => folded.same_commitment(root),
        Err(_) => false,
    }
}
