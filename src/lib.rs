#![deny(missing_docs)]

//! # voting_pollard
//!
//! Sum-augmented Merkle trees for on-chain voting power commitments, and the
//! challenge/response machinery built on them.
//!
//! A proposer commits to a [`VotingTree`] over one leaf per eligible account.
//! Anyone who disagrees challenges a node; the proposer answers with a
//! *pollard*, the row of nodes a bounded number of levels below it. Comparing
//! pollards narrows the dispute one window at a time until a single node is
//! isolated and proven with a Merkle proof.
//!
//! ## Layout
//!
//! * [`node`], [`tree`], [`index`], [`pollard`], [`proof`] and [`compare`] are
//!   the pure tree layer: synchronous, allocation-bounded, no I/O.
//! * [`leaves`] and [`collect`] turn account records into leaf sets.
//! * [`manager`] builds and routes the network and delegate trees of a
//!   proposal, persisting network trees through [`artifact`].
//! * [`defend`] and [`verify`] are the two task cycles, talking to the chain
//!   through the traits in [`sources`]. With the `net` feature, `schedule`
//!   drives them on a tokio interval.
//!
//! ## Usage
//!
//! ```rust
//! use primitive_types::U256;
//! use voting_pollard::{compare_pollards, VotingTree, VotingTreeNode};
//!
//! let honest: Vec<_> = (0..16u64).map(|s| VotingTreeNode::leaf(U256::from(s))).collect();
//! let mut forged = honest.clone();
//! forged[11] = VotingTreeNode::leaf(U256::from(1_000u64));
//!
//! let local = VotingTree::from_leaves(&honest, 1).unwrap();
//! let claimed = VotingTree::from_leaves(&forged, 1).unwrap();
//! let dispute = compare_pollards(&local, 1, claimed.pollard_for_proposal().unwrap())
//!     .unwrap()
//!     .expect("pollards differ");
//! assert_eq!(dispute.virtual_index, 16 + 11);
//! ```

pub mod artifact;
pub mod codec;
pub mod collect;
pub mod compare;
pub mod config;
pub mod defend;
mod error;
pub mod index;
pub mod leaves;
pub mod manager;
pub mod node;
pub mod pollard;
pub mod proof;
pub mod scan;
#[cfg(feature = "net")]
pub mod schedule;
pub mod sources;
pub mod tree;
pub mod verify;

#[cfg(test)]
mod testing;

#[cfg(doctest)]
#[doc = include_str!("../README.md")]
struct ReadmeDoctests;

pub use artifact::{ArtifactError, ArtifactStore, NetworkTreeArtifact};
pub use codec::{decode_nodes, encode_node_array, encode_nodes, CodecError, NODE_WIRE_BYTES};
pub use collect::{collect_snapshot, CollectConfig, CollectError, VotingSnapshot};
pub use compare::{compare_pollards, ChallengeArtifacts};
pub use config::{ConfigError, VotingConfig};
pub use defend::{ChallengeDefender, DefendError, DefendReport, DefenderPhase};
pub use error::TreeError;
pub use index::{local_from_virtual, virtual_from_local};
pub use leaves::{delegate_leaves, network_leaves, AccountId, AccountRecord};
pub use manager::{HeightLease, ManagerError, ProposalTrees, VotingArtifacts};
pub use node::{be_normalize256, NodeHash, VotingTreeNode};
pub use pollard::{extract_pollard, DEPTH_PER_ROUND};
pub use proof::{build_proof, root_from_proof, verify_proof};
pub use scan::{CancelFlag, ScanCursor};
pub use sources::{
    BlockTimeSource, ChainClients, ChainEventSource, ChainStateSource, ChainTxSubmitter,
    ChainView, ChainViewSource, ChallengeState, ChallengeSubmitted, ProposalDetails,
    RootSubmitted, SourceError, TxHash, VotingPowerSource,
};
pub use tree::VotingTree;
pub use verify::{ChallengeVerifier, VerifierPhase, VerifyError, VerifyReport};
