//! Checks other accounts' proposals and challenges the ones that disagree
//! with the locally generated trees.
//!
//! A proposal whose root matches the local network tree is remembered as
//! valid. For the others the verifier walks the dispute down from index 1:
//! at each responded index it compares the revealed pollard with its own,
//! and challenges the first disagreeing node nobody has challenged yet.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::compare::ChallengeArtifacts;
use crate::leaves::AccountId;
use crate::manager::{ManagerError, ProposalTrees};
use crate::scan::{fetch_chunked, CancelFlag, ScanCursor, TaskPhase};
use crate::sources::{
    ChainClients, ChainView, ChallengeState, ProposalDetails, RootSubmitted, SourceError, TxHash,
};

/// Where the verifier is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierPhase {
    /// No cycle running.
    Idle,
    /// Comparing roots and crawling disputes.
    Checking,
    /// Submitting challenges.
    Challenging,
}

/// Errors that end a verifier cycle.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("reading chain data failed: {0}")]
    /// A chain read failed; nothing was submitted.
    Source(#[from] SourceError),
    #[error("building trees for proposal {proposal_id}, index {index} failed: {source}")]
    /// Local trees could not be produced or compared.
    Trees {
        /// Proposal being verified.
        proposal_id: u64,
        /// Index being examined.
        index: u64,
        /// Underlying failure.
        source: ManagerError,
    },
    #[error("proposal {proposal_id} responded at index {index} but no RootSubmitted event was found")]
    /// The contract reports a response the event scan never saw.
    MissingSubmission {
        /// Proposal being verified.
        proposal_id: u64,
        /// Responded index.
        index: u64,
    },
    #[error("cycle error: proposal {proposal_id} index {index} disagrees at the same index again")]
    /// Comparing a response produced the index it answered.
    Cycle {
        /// Proposal being verified.
        proposal_id: u64,
        /// Index that repeated.
        index: u64,
    },
    #[error("challenging proposal {proposal_id}, index {index} failed: {source}")]
    /// Submitting a challenge failed.
    Challenge {
        /// Proposal being challenged.
        proposal_id: u64,
        /// Index being challenged.
        index: u64,
        /// Underlying failure.
        source: SourceError,
    },
    #[error("verifier cycle cancelled")]
    /// The cancellation flag was raised mid-cycle.
    Cancelled,
}

/// A challenge raised during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedChallenge {
    /// Proposal challenged.
    pub proposal_id: u64,
    /// Index challenged.
    pub index: u64,
    /// Challenge transaction.
    pub tx: TxHash,
}

/// Outcome of one [`ChallengeVerifier::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// A cycle was already running, so this call did nothing.
    pub skipped: bool,
    /// Proposals found to match the local trees during this cycle.
    pub valid: Vec<u64>,
    /// Challenges submitted during this cycle.
    pub challenged: Vec<RaisedChallenge>,
}

#[derive(Default)]
struct VerifierState {
    cursor: ScanCursor,
    valid: HashSet<u64>,
    submissions: HashMap<u64, HashMap<u64, RootSubmitted>>,
}

struct PendingChallenge {
    proposal_id: u64,
    artifacts: ChallengeArtifacts,
}

/// Challenges invalid proposals made by accounts other than `account`.
pub struct ChallengeVerifier {
    account: AccountId,
    trees: Arc<ProposalTrees>,
    chain: ChainClients,
    event_log_interval: u64,
    phase: TaskPhase<VerifierPhase>,
    state: Mutex<VerifierState>,
    cancel: CancelFlag,
}

impl ChallengeVerifier {
    /// Verifier acting on behalf of `account`.
    pub fn new(account: AccountId, trees: Arc<ProposalTrees>, chain: ChainClients) -> Self {
        let event_log_interval = trees.config().event_log_interval;
        Self {
            account,
            trees,
            chain,
            event_log_interval,
            phase: TaskPhase::new(VerifierPhase::Idle),
            state: Mutex::new(VerifierState::default()),
            cancel: CancelFlag::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> VerifierPhase {
        self.phase.current()
    }

    /// Flag that stops a running cycle at its next checkpoint.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Scan cursor after the last successful cycle.
    pub fn cursor(&self) -> ScanCursor {
        self.state().cursor
    }

    /// Whether `proposal_id` is cached as matching the local trees.
    pub fn is_known_valid(&self, proposal_id: u64) -> bool {
        self.state().valid.contains(&proposal_id)
    }

    /// Runs one verification cycle against `view`.
    pub fn run(&self, view: &ChainView) -> Result<VerifyReport, VerifyError> {
        let Some(guard) = self.phase.try_begin(VerifierPhase::Checking) else {
            info!(evt = "SKIP", task = "verify", "previous cycle still running");
            return Ok(VerifyReport {
                skipped: true,
                ..VerifyReport::default()
            });
        };

        let eligible: Vec<ProposalDetails> = view
            .proposals
            .iter()
            .filter(|p| p.proposer != self.account && p.in_challenge_window(view.now))
            .cloned()
            .collect();
        self.prune(&eligible);
        let _lease = self.trees.lease(eligible.iter().map(|p| p.target_height));

        let mut report = VerifyReport::default();
        let mismatching = self.mismatching(&eligible, &mut report)?;
        let Some(earliest) = mismatching.iter().map(|p| p.created_time).min() else {
            return Ok(report);
        };

        let cursor = self.cursor();
        let window = cursor.window(view, earliest, self.chain.block_time.as_ref())?;
        if let Some((start, end)) = window {
            self.cache_submissions(&mismatching, start, end)?;
        }

        let mut first_error = None;
        let mut pending = Vec::new();
        for proposal in &mismatching {
            self.checkpoint()?;
            match self.crawl(proposal) {
                Ok(Some(challenge)) => pending.push(challenge),
                Ok(None) => {}
                Err(VerifyError::Cancelled) => return Err(VerifyError::Cancelled),
                Err(err) => {
                    warn!(
                        evt = "CRAWL_FAILED",
                        proposal_id = proposal.id,
                        error = %err,
                        "failed to locate a challengeable index"
                    );
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        guard.set(VerifierPhase::Challenging);
        for challenge in pending {
            self.checkpoint()?;
            match self.submit(&challenge) {
                Ok(raised) => report.challenged.push(raised),
                Err(err) => {
                    warn!(
                        evt = "CHALLENGE_FAILED",
                        proposal_id = challenge.proposal_id,
                        index = challenge.artifacts.virtual_index,
                        error = %err,
                        "failed to submit challenge"
                    );
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if let Some((_, end)) = window {
            self.state().cursor.advance(end);
        }
        Ok(report)
    }

    fn prune(&self, eligible: &[ProposalDetails]) {
        let keep: HashSet<u64> = eligible.iter().map(|p| p.id).collect();
        let mut state = self.state();
        state.valid.retain(|id| keep.contains(id));
        state.submissions.retain(|id, _| keep.contains(id));
    }

    fn mismatching(
        &self,
        eligible: &[ProposalDetails],
        report: &mut VerifyReport,
    ) -> Result<Vec<ProposalDetails>, VerifyError> {
        let mut mismatching = Vec::new();
        for proposal in eligible {
            self.checkpoint()?;
            if self.is_known_valid(proposal.id) {
                continue;
            }
            let onchain_root = self.chain.state.proposal_node(proposal.id, 1)?;
            let network = self
                .trees
                .network_tree(proposal.target_height)
                .map_err(|source| VerifyError::Trees {
                    proposal_id: proposal.id,
                    index: 1,
                    source,
                })?;
            if network.root().same_commitment(&onchain_root) {
                info!(
                    evt = "PROPOSAL_VALID",
                    proposal_id = proposal.id,
                    "proposal matches local tree"
                );
                self.state().valid.insert(proposal.id);
                report.valid.push(proposal.id);
            } else {
                info!(
                    evt = "PROPOSAL_MISMATCH",
                    proposal_id = proposal.id,
                    "proposal must be challenged"
                );
                mismatching.push(proposal.clone());
            }
        }
        Ok(mismatching)
    }

    fn cache_submissions(
        &self,
        proposals: &[ProposalDetails],
        start: u64,
        end: u64,
    ) -> Result<(), VerifyError> {
        let ids: Vec<u64> = proposals.iter().map(|p| p.id).collect();
        let events = fetch_chunked(start, end, self.event_log_interval, |from, to| {
            self.chain.events.root_submitted_events(&ids, from, to)
        })?;
        let mut state = self.state();
        for event in events {
            state
                .submissions
                .entry(event.proposal_id)
                .or_default()
                .insert(event.index, event);
        }
        Ok(())
    }

    fn crawl(&self, proposal: &ProposalDetails) -> Result<Option<PendingChallenge>, VerifyError> {
        let proposal_id = proposal.id;
        let mut index = 1u64;
        loop {
            self.checkpoint()?;
            let submission = self
                .state()
                .submissions
                .get(&proposal_id)
                .and_then(|by_index| by_index.get(&index))
                .cloned()
                .ok_or(VerifyError::MissingSubmission { proposal_id, index })?;

            let artifacts = self
                .trees
                .challengeable_artifacts(
                    proposal.target_height,
                    submission.index,
                    &submission.tree_nodes,
                )
                .map_err(|source| VerifyError::Trees {
                    proposal_id,
                    index,
                    source,
                })?;
            let Some(artifacts) = artifacts else {
                info!(evt = "NO_DISAGREEMENT", proposal_id, index, "pollard matches local tree");
                return Ok(None);
            };
            if artifacts.virtual_index == index {
                // A single-node response sits on the depth row: nothing below it is revealed.
                if submission.tree_nodes.len() == 1 {
                    info!(
                        evt = "DEAD_END",
                        proposal_id,
                        index,
                        "response reveals no deeper nodes"
                    );
                    return Ok(None);
                }
                return Err(VerifyError::Cycle { proposal_id, index });
            }

            let next = artifacts.virtual_index;
            match self.chain.state.challenge_state(proposal_id, next)? {
                ChallengeState::Unchallenged => {
                    return Ok(Some(PendingChallenge {
                        proposal_id,
                        artifacts,
                    }))
                }
                ChallengeState::Challenged => {
                    info!(evt = "AWAIT_RESPONSE", proposal_id, index = next, "waiting for proposer");
                    return Ok(None);
                }
                ChallengeState::Responded => index = next,
                ChallengeState::Paid => {
                    info!(evt = "CHALLENGE_PAID", proposal_id, index = next, "challenge already settled");
                    return Ok(None);
                }
            }
        }
    }

    fn submit(&self, challenge: &PendingChallenge) -> Result<RaisedChallenge, VerifyError> {
        let proposal_id = challenge.proposal_id;
        let index = challenge.artifacts.virtual_index;
        info!(evt = "CHALLENGE", proposal_id, index, "creating challenge");
        let tx = self
            .chain
            .submitter
            .submit_create_challenge(
                proposal_id,
                index,
                &challenge.artifacts.node,
                &challenge.artifacts.proof,
            )
            .map_err(|source| VerifyError::Challenge {
                proposal_id,
                index,
                source,
            })?;
        info!(evt = "CHALLENGED", proposal_id, index, tx = %tx, "challenge submitted");
        Ok(RaisedChallenge {
            proposal_id,
            index,
            tx,
        })
    }

    fn checkpoint(&self) -> Result<(), VerifyError> {
        if self.cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, VerifierState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
