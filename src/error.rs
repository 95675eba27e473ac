//! Errors raised by the pure tree, pollard, proof and comparison routines.

use thiserror::Error;

/// Failures surfaced while building or reading a voting tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("cannot build a voting tree from an empty leaf set")]
    /// Tree construction was attempted with zero leaves.
    InvalidLeafSet,
    #[error("pollard size mismatch: local pollard = {local} nodes, submitted pollard = {submitted} nodes")]
    /// The counterparty's pollard does not have the size this tree derives for the same root.
    PollardSizeMismatch {
        /// Size of the locally extracted pollard.
        local: usize,
        /// Size of the submitted pollard.
        submitted: usize,
    },
    #[error("index {index} does not resolve inside the tree (1..={node_count})")]
    /// A local or virtual index resolved outside `[1, node_count]`.
    IndexOutOfRange {
        /// Offending index as supplied by the caller.
        index: u64,
        /// Number of nodes held by the tree.
        node_count: u64,
    },
    #[error("depth per round must be between 1 and 63, got {0}")]
    /// A tree was configured to reveal no levels per round, or more than an index can address.
    InvalidDepthPerRound(u32),
    #[error("a proof of {proof_len} siblings cannot place a node at local index {index}")]
    /// The proof length does not match the level of the index it claims to prove.
    MalformedProof {
        /// Local index the proof was folded from.
        index: u64,
        /// Number of siblings supplied.
        proof_len: usize,
    },
    #[error("voting power sum exceeds 256 bits")]
    /// Adding two sums overflowed the on-chain `uint256` range.
    SumOverflow,
}
