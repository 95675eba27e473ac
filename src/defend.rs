//! Defends this account's proposals against challenges.
//!
//! Each cycle scans new `ChallengeSubmitted` events for the account's
//! proposals that are still inside their challenge window, re-checks every
//! hit against contract state, and answers the ones still `Challenged` with
//! the pollard below the challenged index.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::leaves::AccountId;
use crate::manager::{ManagerError, ProposalTrees};
use crate::scan::{fetch_chunked, CancelFlag, ScanCursor, TaskPhase};
use crate::sources::{
    ChainClients, ChainView, ChallengeState, ChallengeSubmitted, ProposalDetails, SourceError,
    TxHash,
};

/// Where the defender is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefenderPhase {
    /// No cycle running.
    Idle,
    /// Looking for open challenges.
    Scanning,
    /// Submitting responses.
    Responding,
}

/// Errors that end a defender cycle.
#[derive(Debug, Error)]
pub enum DefendError {
    #[error("scanning for challenges failed: {0}")]
    /// Reading chain data failed; nothing was submitted.
    Source(#[from] SourceError),
    #[error("building artifacts for proposal {proposal_id}, index {index} failed: {source}")]
    /// The response pollard could not be produced.
    Trees {
        /// Proposal being defended.
        proposal_id: u64,
        /// Challenged index.
        index: u64,
        /// Underlying failure.
        source: ManagerError,
    },
    #[error("responding to challenge against proposal {proposal_id}, index {index} failed: {source}")]
    /// Submitting the response failed.
    Respond {
        /// Proposal being defended.
        proposal_id: u64,
        /// Challenged index.
        index: u64,
        /// Underlying failure.
        source: SourceError,
    },
    #[error("defender cycle cancelled")]
    /// The cancellation flag was raised mid-cycle.
    Cancelled,
}

/// A submitted response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// Proposal defended.
    pub proposal_id: u64,
    /// Index answered.
    pub index: u64,
    /// Response transaction.
    pub tx: TxHash,
}

/// Outcome of one [`ChallengeDefender::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefendReport {
    /// A cycle was already running, so this call did nothing.
    pub skipped: bool,
    /// Responses submitted during the cycle.
    pub responded: Vec<ChallengeResponse>,
}

struct OpenChallenge {
    proposal: ProposalDetails,
    event: ChallengeSubmitted,
}

/// Answers challenges against proposals made by `account`.
pub struct ChallengeDefender {
    account: AccountId,
    trees: Arc<ProposalTrees>,
    chain: ChainClients,
    event_log_interval: u64,
    phase: TaskPhase<DefenderPhase>,
    cursor: Mutex<ScanCursor>,
    cancel: CancelFlag,
}

impl ChallengeDefender {
    /// Defender for `account`'s proposals.
    pub fn new(account: AccountId, trees: Arc<ProposalTrees>, chain: ChainClients) -> Self {
        let event_log_interval = trees.config().event_log_interval;
        Self {
            account,
            trees,
            chain,
            event_log_interval,
            phase: TaskPhase::new(DefenderPhase::Idle),
            cursor: Mutex::new(ScanCursor::default()),
            cancel: CancelFlag::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> DefenderPhase {
        self.phase.current()
    }

    /// Flag that stops a running cycle at its next checkpoint.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Scan cursor after the last successful cycle.
    pub fn cursor(&self) -> ScanCursor {
        *self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one scan-and-respond cycle against `view`.
    ///
    /// Calling this while a cycle is in flight returns a skipped report.
    pub fn run(&self, view: &ChainView) -> Result<DefendReport, DefendError> {
        let Some(guard) = self.phase.try_begin(DefenderPhase::Scanning) else {
            info!(evt = "SKIP", task = "defend", "previous cycle still running");
            return Ok(DefendReport {
                skipped: true,
                responded: Vec::new(),
            });
        };

        let eligible: Vec<ProposalDetails> = view
            .proposals
            .iter()
            .filter(|p| p.proposer == self.account && p.in_challenge_window(view.now))
            .cloned()
            .collect();
        let _lease = self.trees.lease(eligible.iter().map(|p| p.target_height));
        let Some(earliest) = eligible.iter().map(|p| p.created_time).min() else {
            return Ok(DefendReport::default());
        };

        let cursor = self.cursor();
        let Some((start, end)) =
            cursor.window(view, earliest, self.chain.block_time.as_ref())?
        else {
            return Ok(DefendReport::default());
        };
        info!(
            evt = "SCAN_START",
            task = "defend",
            proposals = eligible.len(),
            start,
            end,
            "checking for challenges"
        );

        let open = self.open_challenges(&eligible, start, end)?;

        guard.set(DefenderPhase::Responding);
        let mut report = DefendReport::default();
        let mut first_error = None;
        for challenge in open {
            self.checkpoint()?;
            match self.respond(&challenge) {
                Ok(response) => report.responded.push(response),
                Err(err) => {
                    warn!(
                        evt = "RESPOND_FAILED",
                        proposal_id = challenge.proposal.id,
                        index = challenge.event.index,
                        error = %err,
                        "failed to respond to challenge"
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
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .advance(end);
        Ok(report)
    }

    fn open_challenges(
        &self,
        eligible: &[ProposalDetails],
        start: u64,
        end: u64,
    ) -> Result<Vec<OpenChallenge>, DefendError> {
        let ids: Vec<u64> = eligible.iter().map(|p| p.id).collect();
        let by_id: HashMap<u64, &ProposalDetails> = eligible.iter().map(|p| (p.id, p)).collect();
        let events = fetch_chunked(start, end, self.event_log_interval, |from, to| {
            self.chain.events.challenge_submitted_events(&ids, from, to)
        })?;

        let mut seen = HashSet::new();
        let mut open = Vec::new();
        for event in events {
            self.checkpoint()?;
            let Some(proposal) = by_id.get(&event.proposal_id) else {
                continue;
            };
            if !seen.insert((event.proposal_id, event.index)) {
                continue;
            }
            let state = self
                .chain
                .state
                .challenge_state(event.proposal_id, event.index)?;
            if state == ChallengeState::Challenged {
                info!(
                    evt = "CHALLENGE_DETECTED",
                    proposal_id = event.proposal_id,
                    index = event.index,
                    challenger = %event.challenger,
                    "challenge detected"
                );
                open.push(OpenChallenge {
                    proposal: (*proposal).clone(),
                    event,
                });
            }
        }
        Ok(open)
    }

    fn respond(&self, challenge: &OpenChallenge) -> Result<ChallengeResponse, DefendError> {
        let proposal_id = challenge.proposal.id;
        let index = challenge.event.index;
        info!(evt = "RESPOND", proposal_id, index, "responding to challenge");

        let (proof, pollard) = self
            .trees
            .response_artifacts(challenge.proposal.target_height, index)
            .map_err(|source| DefendError::Trees {
                proposal_id,
                index,
                source,
            })?;
        let tx = self
            .chain
            .submitter
            .submit_root(proposal_id, index, &proof, &pollard)
            .map_err(|source| DefendError::Respond {
                proposal_id,
                index,
                source,
            })?;
        info!(evt = "RESPONDED", proposal_id, index, tx = %tx, "response submitted");
        Ok(ChallengeResponse {
            proposal_id,
            index,
            tx,
        })
    }

    fn checkpoint(&self) -> Result<(), DefendError> {
        if self.cancel.is_cancelled() {
            return Err(DefendError::Cancelled);
        }
        Ok(())
    }
}
