//! Immutable, array-backed sum-Merkle voting tree.
//!
//! The tree is a complete binary tree stored as a dense arena. Local index
//! `i` (1-based, root = 1) lives at `nodes[i - 1]`, so the children of `i` are
//! `2i` and `2i + 1`. The leaf row is padded to a power of two with the
//! canonical zero leaf.

use crate::compare::{compare_pollards, ChallengeArtifacts};
use crate::error::TreeError;
use crate::index::{local_from_virtual, virtual_from_local};
use crate::node::VotingTreeNode;
use crate::pollard::{extract_pollard, DEPTH_PER_ROUND};
use crate::proof::build_proof;

/// A sum-Merkle tree over voting power leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingTree {
    nodes: Vec<VotingTreeNode>,
    leaf_count: usize,
    real_leaf_count: usize,
    depth: u32,
    virtual_root_index: u64,
    depth_per_round: u32,
}

impl VotingTree {
    /// Builds a tree from `leaves` whose root sits at `virtual_root_index` in
    /// the outer protocol's index space.
    pub fn from_leaves(
        leaves: &[VotingTreeNode],
        virtual_root_index: u64,
    ) -> Result<Self, TreeError> {
        Self::with_depth_per_round(leaves, virtual_root_index, DEPTH_PER_ROUND)
    }

    /// Same as [`VotingTree::from_leaves`] with an explicit per-round depth.
    pub fn with_depth_per_round(
        leaves: &[VotingTreeNode],
        virtual_root_index: u64,
        depth_per_round: u32,
    ) -> Result<Self, TreeError> {
        if leaves.is_empty() {
            return Err(TreeError::InvalidLeafSet);
        }
        if depth_per_round == 0 || depth_per_round > 63 {
            return Err(TreeError::InvalidDepthPerRound(depth_per_round));
        }
        let leaf_count = leaves.len().next_power_of_two();
        let node_count = 2 * leaf_count - 1;
        if virtual_root_index == 0 {
            return Err(TreeError::IndexOutOfRange {
                index: 0,
                node_count: node_count as u64,
            });
        }

        let mut nodes = Vec::with_capacity(node_count);
        nodes.resize(leaf_count - 1, VotingTreeNode::zero());
        nodes.extend_from_slice(leaves);
        nodes.resize(node_count, VotingTreeNode::zero());

        // Walking the internal slots backwards finishes every level before the one above it.
        for j in (0..leaf_count - 1).rev() {
            let parent = VotingTreeNode::parent(&nodes[2 * j + 1], &nodes[2 * j + 2])?;
            nodes[j] = parent;
        }

        Ok(Self {
            nodes,
            leaf_count,
            real_leaf_count: leaves.len(),
            depth: leaves.len().ilog2(),
            virtual_root_index,
            depth_per_round,
        })
    }

    /// Root node (local index 1).
    pub fn root(&self) -> &VotingTreeNode {
        &self.nodes[0]
    }

    /// Every node in local index order (`nodes()[i - 1]` is local node `i`).
    pub fn nodes(&self) -> &[VotingTreeNode] {
        &self.nodes
    }

    /// Total number of nodes, padding included.
    pub fn node_count(&self) -> u64 {
        self.nodes.len() as u64
    }

    /// Padded leaf count (a power of two).
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of leaves supplied at construction time.
    pub fn real_leaf_count(&self) -> usize {
        self.real_leaf_count
    }

    /// `floor(log2(real_leaf_count))`, the depth used for pollard sizing.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Virtual index of this tree's root.
    pub fn virtual_root_index(&self) -> u64 {
        self.virtual_root_index
    }

    /// Levels revealed by a single pollard.
    pub fn depth_per_round(&self) -> u32 {
        self.depth_per_round
    }

    /// The padded leaf row.
    pub fn leaves(&self) -> &[VotingTreeNode] {
        &self.nodes[self.leaf_count - 1..]
    }

    /// Local index of the `position`-th leaf.
    pub fn leaf_local_index(&self, position: usize) -> Result<u64, TreeError> {
        if position >= self.leaf_count {
            return Err(TreeError::IndexOutOfRange {
                index: (self.leaf_count + position) as u64,
                node_count: self.node_count(),
            });
        }
        Ok((self.leaf_count + position) as u64)
    }

    /// Node at a 1-based local index.
    pub fn node(&self, local: u64) -> Result<&VotingTreeNode, TreeError> {
        self.check_local(local)?;
        Ok(&self.nodes[(local - 1) as usize])
    }

    /// Node at a virtual index.
    pub fn node_at_virtual(&self, virtual_index: u64) -> Result<&VotingTreeNode, TreeError> {
        let local = self.local_index(virtual_index)?;
        self.node(local)
    }

    /// Resolves a virtual index to a local one inside this tree.
    pub fn local_index(&self, virtual_index: u64) -> Result<u64, TreeError> {
        let local = local_from_virtual(self.virtual_root_index, virtual_index).ok_or(
            TreeError::IndexOutOfRange {
                index: virtual_index,
                node_count: self.node_count(),
            },
        )?;
        if local > self.node_count() {
            return Err(TreeError::IndexOutOfRange {
                index: virtual_index,
                node_count: self.node_count(),
            });
        }
        Ok(local)
    }

    /// Resolves a local index of this tree to its virtual index.
    pub fn virtual_index(&self, local: u64) -> Result<u64, TreeError> {
        self.check_local(local)?;
        virtual_from_local(self.virtual_root_index, local).ok_or(TreeError::IndexOutOfRange {
            index: local,
            node_count: self.node_count(),
        })
    }

    /// Pollard accompanying a new proposal (rooted at this tree's root).
    pub fn pollard_for_proposal(&self) -> Result<&[VotingTreeNode], TreeError> {
        extract_pollard(self, self.virtual_root_index)
    }

    /// Pollard answering a challenge against `challenged_index` (virtual).
    pub fn pollard_for_challenge_response(
        &self,
        challenged_index: u64,
    ) -> Result<&[VotingTreeNode], TreeError> {
        extract_pollard(self, challenged_index)
    }

    /// Merkle proof (leaf-to-root siblings) for a local index.
    pub fn proof(&self, local: u64) -> Result<Vec<VotingTreeNode>, TreeError> {
        build_proof(self, local)
    }

    /// The node at `virtual_index` together with its proof inside this tree.
    pub fn artifacts_for_challenge(
        &self,
        virtual_index: u64,
    ) -> Result<(VotingTreeNode, Vec<VotingTreeNode>), TreeError> {
        let local = self.local_index(virtual_index)?;
        let node = self.node(local)?.clone();
        let proof = build_proof(self, local)?;
        Ok((node, proof))
    }

    /// Compares a submitted pollard against this tree; see [`compare_pollards`].
    pub fn check_for_challengeable_artifacts(
        &self,
        virtual_root_index: u64,
        submitted: &[VotingTreeNode],
    ) -> Result<Option<ChallengeArtifacts>, TreeError> {
        compare_pollards(self, virtual_root_index, submitted)
    }

    fn check_local(&self, local: u64) -> Result<(), TreeError> {
        if local == 0 || local > self.node_count() {
            return Err(TreeError::IndexOutOfRange {
                index: local,
                node_count: self.node_count(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::root_from_proof;
    use primitive_types::U256;
    use proptest::prelude::*;

    fn leaves(sums: &[u64]) -> Vec<VotingTreeNode> {
        sums.iter()
            .map(|s| VotingTreeNode::leaf(U256::from(*s)))
            .collect()
    }

    #[test]
    fn empty_leaf_set_is_rejected() {
        assert_eq!(
            VotingTree::from_leaves(&[], 1),
            Err(TreeError::InvalidLeafSet)
        );
    }

    #[test]
    fn zero_virtual_root_is_rejected() {
        assert!(matches!(
            VotingTree::from_leaves(&leaves(&[1]), 0),
            Err(TreeError::IndexOutOfRange { index: 0, .. })
        ));
    }

    #[test]
    fn depth_per_round_outside_one_to_sixty_three_is_rejected() {
        let row = leaves(&[1, 2, 3]);
        assert_eq!(
            VotingTree::with_depth_per_round(&row, 1, 0),
            Err(TreeError::InvalidDepthPerRound(0))
        );
        assert_eq!(
            VotingTree::with_depth_per_round(&row, 1, 64),
            Err(TreeError::InvalidDepthPerRound(64))
        );
        assert_eq!(
            VotingTree::with_depth_per_round(&row, 1, 1)
                .unwrap()
                .depth_per_round(),
            1
        );
    }

    #[test]
    fn power_of_two_leaf_row() {
        // [10, 0, 5, 0]: root 15, depth 2, leaf 3 (sum 5) at local 7 has a 2-node proof.
        let tree = VotingTree::from_leaves(&leaves(&[10, 0, 5, 0]), 1).unwrap();
        assert_eq!(tree.root().sum, U256::from(15u64));
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.leaf_local_index(2).unwrap(), 7);
        assert_eq!(tree.node(7).unwrap().sum, U256::from(5u64));
        assert_eq!(tree.proof(7).unwrap().len(), 2);
    }

    #[test]
    fn single_leaf_tree_is_its_own_root() {
        let tree = VotingTree::from_leaves(&leaves(&[9]), 1).unwrap();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.root(), &VotingTreeNode::leaf(U256::from(9u64)));
        assert!(tree.proof(1).unwrap().is_empty());
    }

    #[test]
    fn padding_uses_zero_leaves_and_unpadded_depth() {
        let tree = VotingTree::from_leaves(&leaves(&[1, 2, 3, 4, 5]), 1).unwrap();
        assert_eq!(tree.leaf_count(), 8);
        assert_eq!(tree.real_leaf_count(), 5);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.root().sum, U256::from(15u64));
        for pad in &tree.leaves()[5..] {
            assert_eq!(pad, &VotingTreeNode::zero());
        }
    }

    #[test]
    fn input_leaves_are_left_untouched() {
        let input = leaves(&[3, 1, 4]);
        let snapshot = input.clone();
        let tree = VotingTree::from_leaves(&input, 1).unwrap();
        assert_eq!(input, snapshot);
        assert_eq!(&tree.leaves()[..3], &snapshot[..]);
    }

    #[test]
    fn index_lookups_are_bounds_checked() {
        let tree = VotingTree::from_leaves(&leaves(&[1, 2]), 1).unwrap();
        assert!(tree.node(0).is_err());
        assert!(tree.node(4).is_err());
        assert!(tree.local_index(4).is_err());
        assert!(tree.leaf_local_index(2).is_err());
    }

    #[test]
    fn rerooted_tree_resolves_outer_indices() {
        let tree = VotingTree::from_leaves(&leaves(&[1, 2, 3, 4]), 3).unwrap();
        assert_eq!(tree.local_index(3).unwrap(), 1);
        assert_eq!(tree.local_index(13).unwrap(), 5);
        assert_eq!(tree.node_at_virtual(13).unwrap().sum, U256::from(2u64));
        assert_eq!(tree.virtual_index(7).unwrap(), 15);
        assert!(tree.local_index(16).is_err());
    }

    proptest! {
        #[test]
        fn root_sum_is_conserved(sums in prop::collection::vec(0u64..1_000_000, 1..70)) {
            let tree = VotingTree::from_leaves(&leaves(&sums), 1).unwrap();
            let total: u64 = sums.iter().sum();
            prop_assert_eq!(tree.root().sum, U256::from(total));
        }

        #[test]
        fn padding_is_neutral(sums in prop::collection::vec(0u64..1_000, 1..70)) {
            let tree = VotingTree::from_leaves(&leaves(&sums), 1).unwrap();
            prop_assert!(tree.leaf_count().is_power_of_two());
            prop_assert_eq!(tree.depth(), sums.len().ilog2());
            for pad in &tree.leaves()[sums.len()..] {
                prop_assert_eq!(pad, &VotingTreeNode::zero());
            }
        }

        #[test]
        fn every_leaf_proof_folds_to_the_root(sums in prop::collection::vec(0u64..1_000, 1..40)) {
            let tree = VotingTree::from_leaves(&leaves(&sums), 1).unwrap();
            for position in 0..tree.leaf_count() {
                let local = tree.leaf_local_index(position).unwrap();
                let proof = tree.proof(local).unwrap();
                let folded = root_from_proof(local, tree.node(local).unwrap(), &proof).unwrap();
                prop_assert_eq!(&folded, tree.root());
            }
        }

        #[test]
        fn pollards_are_deterministic(sums in prop::collection::vec(0u64..1_000, 1..70), pick in 0usize..64) {
            let first = VotingTree::from_leaves(&leaves(&sums), 1).unwrap();
            let second = VotingTree::from_leaves(&leaves(&sums), 1).unwrap();
            let virtual_index = 1 + (pick as u64 % first.node_count());
            prop_assert_eq!(
                first.pollard_for_challenge_response(virtual_index).unwrap(),
                second.pollard_for_challenge_response(virtual_index).unwrap()
            );
        }
    }
}
