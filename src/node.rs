//! Sum-augmented Merkle nodes and the keccak combination rules.
//!
//! Every node commits to a 256-bit voting power sum and a 32-byte digest.
//! Leaves hash the big-endian sum alone; internal nodes hash both children's
//! digests interleaved with their sums, so a proof binds the sums as well as
//! the hashes.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::codec::hash_hex;
use crate::error::TreeError;

/// 32-byte keccak digest.
pub type NodeHash = [u8; 32];

/// A single node of a voting tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VotingTreeNode {
    /// Total voting power represented by the subtree rooted here.
    pub sum: U256,
    /// Keccak commitment over the subtree.
    #[serde(with = "hash_hex")]
    pub hash: NodeHash,
}

impl VotingTreeNode {
    /// Builds a leaf carrying `sum`.
    pub fn leaf(sum: U256) -> Self {
        Self {
            hash: leaf_hash(&sum),
            sum,
        }
    }

    /// The canonical zero leaf used for padding and for accounts without power.
    pub fn zero() -> Self {
        Self::leaf(U256::zero())
    }

    /// Combines two children into their parent node.
    pub fn parent(left: &Self, right: &Self) -> Result<Self, TreeError> {
        let sum = left
            .sum
            .checked_add(right.sum)
            .ok_or(TreeError::SumOverflow)?;
        let mut hasher = Keccak256::new();
        hasher.update(left.hash);
        hasher.update(be_normalize256(&left.sum));
        hasher.update(right.hash);
        hasher.update(be_normalize256(&right.sum));
        Ok(Self {
            sum,
            hash: hasher.finalize().into(),
        })
    }

    /// Returns `true` if both the sum and the digest match.
    pub fn same_commitment(&self, other: &Self) -> bool {
        self.hash == other.hash && self.sum == other.sum
    }
}

/// Big-endian encodes `value` into a zero-padded 32-byte buffer.
pub fn be_normalize256(value: &U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

/// Keccak digest of a leaf carrying `sum`.
pub fn leaf_hash(sum: &U256) -> NodeHash {
    let mut hasher = Keccak256::new();
    hasher.update(be_normalize256(sum));
    hasher.finalize().into()
}
