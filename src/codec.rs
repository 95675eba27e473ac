//! Wire and text encodings for voting tree nodes.
//!
//! On chain a node is the static tuple `(uint256 sum, bytes32 hash)`, so every
//! node occupies exactly 64 bytes: the big-endian, zero-padded sum followed by
//! the digest. Arrays are the bare concatenation of their entries; the ABI
//! form additionally carries a leading length word.

use primitive_types::U256;
use thiserror::Error;

use crate::node::{be_normalize256, NodeHash, VotingTreeNode};

/// Encoded size of a single node.
pub const NODE_WIRE_BYTES: usize = 64;

/// Failures while decoding node encodings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("node array length {0} is not a multiple of {NODE_WIRE_BYTES}")]
    /// Raw buffer does not hold a whole number of nodes.
    Truncated(usize),
    #[error("ABI length word claims {claimed} nodes but {available} are present")]
    /// ABI length prefix disagrees with the payload.
    LengthMismatch {
        /// Number of nodes announced by the length word.
        claimed: u64,
        /// Number of nodes actually encoded.
        available: usize,
    },
    #[error("invalid hex digest: {0}")]
    /// A textual digest was malformed.
    Hex(String),
}

/// Encodes a node as `be32(sum) ‖ hash`.
pub fn encode_node(node: &VotingTreeNode) -> [u8; NODE_WIRE_BYTES] {
    let mut out = [0u8; NODE_WIRE_BYTES];
    out[..32].copy_from_slice(&be_normalize256(&node.sum));
    out[32..].copy_from_slice(&node.hash);
    out
}

/// Decodes a single 64-byte node.
pub fn decode_node(bytes: &[u8; NODE_WIRE_BYTES]) -> VotingTreeNode {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes[32..]);
    VotingTreeNode {
        sum: U256::from_big_endian(&bytes[..32]),
        hash,
    }
}

/// Concatenates the encodings of `nodes`.
pub fn encode_nodes(nodes: &[VotingTreeNode]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * NODE_WIRE_BYTES);
    for node in nodes {
        out.extend_from_slice(&encode_node(node));
    }
    out
}

/// Decodes a concatenation produced by [`encode_nodes`].
pub fn decode_nodes(bytes: &[u8]) -> Result<Vec<VotingTreeNode>, CodecError> {
    if bytes.len() % NODE_WIRE_BYTES != 0 {
        return Err(CodecError::Truncated(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(NODE_WIRE_BYTES)
        .map(|chunk| {
            let mut entry = [0u8; NODE_WIRE_BYTES];
            entry.copy_from_slice(chunk);
            decode_node(&entry)
        })
        .collect())
}

/// ABI tail encoding of a `(uint256,bytes32)[]`: a length word then the entries.
pub fn encode_node_array(nodes: &[VotingTreeNode]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + nodes.len() * NODE_WIRE_BYTES);
    out.extend_from_slice(&be_normalize256(&U256::from(nodes.len())));
    out.extend_from_slice(&encode_nodes(nodes));
    out
}

/// Decodes the output of [`encode_node_array`].
pub fn decode_node_array(bytes: &[u8]) -> Result<Vec<VotingTreeNode>, CodecError> {
    if bytes.len() < 32 {
        return Err(CodecError::Truncated(bytes.len()));
    }
    let (length_word, payload) = bytes.split_at(32);
    let nodes = decode_nodes(payload)?;
    let claimed = U256::from_big_endian(length_word);
    if claimed != U256::from(nodes.len()) {
        return Err(CodecError::LengthMismatch {
            claimed: claimed.low_u64(),
            available: nodes.len(),
        });
    }
    Ok(nodes)
}

/// Renders a digest as `0x`-prefixed lowercase hex.
pub fn hash_to_hex(hash: &NodeHash) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parses a 32-byte digest with or without the `0x` prefix.
pub fn hash_from_hex(input: &str) -> Result<NodeHash, CodecError> {
    let trimmed = input.strip_prefix("0x").unwrap_or(input);
    let bytes = hex::decode(trimmed).map_err(|err| CodecError::Hex(err.to_string()))?;
    if bytes.len() != 32 {
        return Err(CodecError::Hex(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Serde adapter storing digests as `0x` hex strings.
pub mod hash_hex {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use crate::node::NodeHash;

    /// Serializes a digest as hex.
    pub fn serialize<S: Serializer>(hash: &NodeHash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::hash_to_hex(hash))
    }

    /// Deserializes a hex digest.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NodeHash, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::hash_from_hex(&raw).map_err(D::Error::custom)
    }
}
