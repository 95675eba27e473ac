//! Collaborators the challenge tasks talk to, and the chain data they exchange.
//!
//! Implementations own transport, retries and timeouts. Every call is
//! synchronous and may be issued from worker threads, hence `Send + Sync`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::leaves::{AccountId, AccountRecord};
use crate::node::{NodeHash, VotingTreeNode};

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("data source error: {0}")]
    /// Reading chain or voting data failed.
    DataSource(String),
    #[error("submission error: {0}")]
    /// Building, simulating or sending a transaction failed.
    Submission(String),
}

/// Hash of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(#[serde(with = "crate::codec::hash_hex")] pub NodeHash);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::codec::hash_to_hex(&self.0))
    }
}

/// On-chain state of a challenge against one index of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeState {
    /// Nobody has challenged the index.
    Unchallenged,
    /// Challenged and awaiting the proposer's response.
    Challenged,
    /// The proposer revealed the pollard below the index.
    Responded,
    /// The challenge bond has been paid out.
    Paid,
}

/// A challenge raised against one index of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSubmitted {
    /// Proposal under challenge.
    pub proposal_id: u64,
    /// Account that raised the challenge.
    pub challenger: AccountId,
    /// Virtual index being challenged.
    pub index: u64,
    /// Block timestamp of the challenge, in seconds.
    pub timestamp: u64,
}

/// A pollard revealed by a proposer, either with the proposal (index 1) or in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSubmitted {
    /// Proposal the pollard belongs to.
    pub proposal_id: u64,
    /// Account that submitted it.
    pub proposer: AccountId,
    /// Snapshot height the proposal is pinned to.
    pub block_number: u64,
    /// Virtual index the pollard is rooted at.
    pub index: u64,
    /// The node claimed at `index`.
    pub root: VotingTreeNode,
    /// The revealed pollard.
    pub tree_nodes: Vec<VotingTreeNode>,
    /// Block timestamp of the submission, in seconds.
    pub timestamp: u64,
}

/// The parts of a proposal the challenge tasks care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDetails {
    /// Proposal identifier.
    pub id: u64,
    /// Account that created the proposal.
    pub proposer: AccountId,
    /// Height of the voting power snapshot the proposal commits to.
    pub target_height: u64,
    /// Creation time, unix seconds.
    pub created_time: u64,
    /// Seconds after creation during which challenges are accepted.
    pub challenge_window: u64,
}

impl ProposalDetails {
    /// Whether challenges and responses are still accepted at `now`.
    pub fn in_challenge_window(&self, now: u64) -> bool {
        now < self.created_time.saturating_add(self.challenge_window)
    }
}

/// Chain context a task cycle runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainView {
    /// Latest execution block; the end of the scan window.
    pub block_number: u64,
    /// Current unix time in seconds.
    pub now: u64,
    /// Beacon genesis time, unix seconds.
    pub genesis_time: u64,
    /// Beacon slot duration.
    pub seconds_per_slot: u64,
    /// Proposals known at `block_number`.
    pub proposals: Vec<ProposalDetails>,
}

/// Voting power data at a historical height.
pub trait VotingPowerSource: Send + Sync {
    /// Number of accounts eligible to vote at `height`.
    fn eligible_account_count(&self, height: u64) -> Result<u64, SourceError>;

    /// Records `[start, start + count)` at `height`, in snapshot order.
    fn account_records(
        &self,
        height: u64,
        start: u64,
        count: u64,
    ) -> Result<Vec<AccountRecord>, SourceError>;
}

/// Event logs emitted by the governance contracts.
pub trait ChainEventSource: Send + Sync {
    /// Challenges against `proposal_ids` emitted in `[from_block, to_block]`.
    fn challenge_submitted_events(
        &self,
        proposal_ids: &[u64],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChallengeSubmitted>, SourceError>;

    /// Pollard submissions for `proposal_ids` emitted in `[from_block, to_block]`.
    fn root_submitted_events(
        &self,
        proposal_ids: &[u64],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RootSubmitted>, SourceError>;
}

/// Current contract state.
pub trait ChainStateSource: Send + Sync {
    /// Challenge state of `index` within `proposal_id`.
    fn challenge_state(&self, proposal_id: u64, index: u64) -> Result<ChallengeState, SourceError>;

    /// Node stored on chain for `proposal_id` at `index`.
    fn proposal_node(&self, proposal_id: u64, index: u64) -> Result<VotingTreeNode, SourceError>;
}

/// Transaction submission.
pub trait ChainTxSubmitter: Send + Sync {
    /// Answers a challenge with the pollard below `index` and the proof of the challenged node.
    fn submit_root(
        &self,
        proposal_id: u64,
        index: u64,
        proof: &[VotingTreeNode],
        pollard: &[VotingTreeNode],
    ) -> Result<TxHash, SourceError>;

    /// Challenges `index`, presenting the node the proposer claimed there and its proof.
    fn submit_create_challenge(
        &self,
        proposal_id: u64,
        index: u64,
        node: &VotingTreeNode,
        proof: &[VotingTreeNode],
    ) -> Result<TxHash, SourceError>;
}

/// Maps beacon slots to execution blocks.
pub trait BlockTimeSource: Send + Sync {
    /// Execution block proposed in `slot`.
    fn block_number_for_slot(&self, slot: u64) -> Result<u64, SourceError>;
}

/// Produces the chain context for the next task cycle.
pub trait ChainViewSource: Send + Sync {
    /// Latest block, clock, beacon config and proposal set.
    fn chain_view(&self) -> Result<ChainView, SourceError>;
}

/// Shared handles to every chain collaborator.
#[derive(Clone)]
pub struct ChainClients {
    /// Contract event logs.
    pub events: Arc<dyn ChainEventSource>,
    /// Contract state reads.
    pub state: Arc<dyn ChainStateSource>,
    /// Transaction submission.
    pub submitter: Arc<dyn ChainTxSubmitter>,
    /// Slot to block resolution.
    pub block_time: Arc<dyn BlockTimeSource>,
}
