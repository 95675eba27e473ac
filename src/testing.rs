//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use primitive_types::U256;

use crate::config::VotingConfig;
use crate::leaves::{AccountId, AccountRecord};
use crate::manager::ProposalTrees;
use crate::node::VotingTreeNode;
use crate::sources::{
    BlockTimeSource, ChainClients, ChainEventSource, ChainStateSource, ChainTxSubmitter,
    ChainView, ChallengeState, ChallengeSubmitted, ProposalDetails, RootSubmitted, SourceError,
    TxHash, VotingPowerSource,
};

pub const NOW: u64 = 10_000;
pub const GENESIS: u64 = NOW - 600;
pub const SECONDS_PER_SLOT: u64 = 12;

/// Deterministic records: accounts `1..=n`, every third one delegating two places back.
pub fn sample_records(count: u64) -> Vec<AccountRecord> {
    (0..count)
        .map(|i| {
            let account = AccountId::from_low_u64(i + 1);
            let delegate = if i % 3 == 2 {
                AccountId::from_low_u64(i - 1)
            } else {
                account
            };
            AccountRecord {
                account,
                voting_power: U256::from(i * 37 % 101 + 1),
                delegate,
            }
        })
        .collect()
}

pub struct MockVotingSource {
    pub records: Vec<AccountRecord>,
    pub fail_at: Option<u64>,
    pub truncate_at: Option<u64>,
    /// Time each `account_records` call takes.
    pub latency: Option<Duration>,
    batches: AtomicUsize,
    counts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockVotingSource {
    pub fn with_records(records: Vec<AccountRecord>) -> Self {
        Self {
            records,
            fail_at: None,
            truncate_at: None,
            latency: None,
            batches: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn sequential(count: u64) -> Self {
        Self::with_records(sample_records(count))
    }

    /// Number of `account_records` calls.
    pub fn calls(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of `eligible_account_count` calls.
    pub fn count_calls(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }

    /// Most `account_records` calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl VotingPowerSource for MockVotingSource {
    fn eligible_account_count(&self, _height: u64) -> Result<u64, SourceError> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.len() as u64)
    }

    fn account_records(
        &self,
        _height: u64,
        start: u64,
        count: u64,
    ) -> Result<Vec<AccountRecord>, SourceError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_at == Some(start) {
            return Err(SourceError::DataSource(format!("batch at {start} failed")));
        }
        let begin = (start as usize).min(self.records.len());
        let end = (start + count).min(self.records.len() as u64) as usize;
        let mut batch = self.records[begin..end].to_vec();
        if self.truncate_at == Some(start) {
            batch.pop();
        }
        Ok(batch)
    }
}

/// Maps slot `s` to block `offset + s` and remembers every lookup.
pub struct FixedBlockTime {
    offset: u64,
    requested: Mutex<Vec<u64>>,
}

impl FixedBlockTime {
    pub fn offset(offset: u64) -> Self {
        Self {
            offset,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<u64> {
        self.requested.lock().unwrap().clone()
    }
}

impl BlockTimeSource for FixedBlockTime {
    fn block_number_for_slot(&self, slot: u64) -> Result<u64, SourceError> {
        self.requested.lock().unwrap().push(slot);
        Ok(self.offset + slot)
    }
}

pub type SubmittedRoot = (u64, u64, Vec<VotingTreeNode>, Vec<VotingTreeNode>);
pub type SubmittedChallenge = (u64, u64, VotingTreeNode, Vec<VotingTreeNode>);

#[derive(Default)]
struct ChainState {
    challenges: Vec<(u64, ChallengeSubmitted)>,
    roots: Vec<(u64, RootSubmitted)>,
    states: HashMap<(u64, u64), ChallengeState>,
    nodes: HashMap<(u64, u64), VotingTreeNode>,
    failing: HashSet<(u64, u64)>,
    fail_events: bool,
    challenge_queries: Vec<(u64, u64)>,
    root_queries: Vec<(u64, u64)>,
    node_reads: usize,
    submitted_roots: Vec<SubmittedRoot>,
    submitted_challenges: Vec<SubmittedChallenge>,
    txs: u8,
}

impl ChainState {
    fn next_tx(&mut self) -> TxHash {
        self.txs = self.txs.wrapping_add(1);
        TxHash([self.txs; 32])
    }
}

/// Contract events, state and submissions held in memory.
#[derive(Default)]
pub struct MockChain {
    inner: Mutex<ChainState>,
}

impl MockChain {
    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.inner.lock().unwrap()
    }

    pub fn add_challenge(&self, block: u64, proposal_id: u64, index: u64) {
        self.lock().challenges.push((
            block,
            ChallengeSubmitted {
                proposal_id,
                challenger: AccountId::from_low_u64(0xcc),
                index,
                timestamp: NOW,
            },
        ));
    }

    pub fn add_root(
        &self,
        block: u64,
        proposal_id: u64,
        index: u64,
        root: VotingTreeNode,
        tree_nodes: Vec<VotingTreeNode>,
    ) {
        self.lock().roots.push((
            block,
            RootSubmitted {
                proposal_id,
                proposer: AccountId::from_low_u64(0xbb),
                block_number: block,
                index,
                root,
                tree_nodes,
                timestamp: NOW,
            },
        ));
    }

    pub fn set_state(&self, proposal_id: u64, index: u64, state: ChallengeState) {
        self.lock().states.insert((proposal_id, index), state);
    }

    pub fn set_node(&self, proposal_id: u64, index: u64, node: VotingTreeNode) {
        self.lock().nodes.insert((proposal_id, index), node);
    }

    pub fn fail_submission(&self, proposal_id: u64, index: u64) {
        self.lock().failing.insert((proposal_id, index));
    }

    pub fn fail_events(&self, fail: bool) {
        self.lock().fail_events = fail;
    }

    /// Block ranges passed to `challenge_submitted_events`.
    pub fn event_queries(&self) -> Vec<(u64, u64)> {
        self.lock().challenge_queries.clone()
    }

    /// Block ranges passed to `root_submitted_events`.
    pub fn root_queries(&self) -> Vec<(u64, u64)> {
        self.lock().root_queries.clone()
    }

    pub fn node_reads(&self) -> usize {
        self.lock().node_reads
    }

    pub fn submitted_roots(&self) -> Vec<SubmittedRoot> {
        self.lock().submitted_roots.clone()
    }

    pub fn submitted_challenges(&self) -> Vec<SubmittedChallenge> {
        self.lock().submitted_challenges.clone()
    }
}

fn in_range<T: Clone>(
    events: &[(u64, T)],
    ids: &[u64],
    from: u64,
    to: u64,
    id_of: impl Fn(&T) -> u64,
) -> Vec<T> {
    let mut hits: Vec<&(u64, T)> = events
        .iter()
        .filter(|(block, event)| *block >= from && *block <= to && ids.contains(&id_of(event)))
        .collect();
    hits.sort_by_key(|(block, _)| *block);
    hits.into_iter().map(|(_, event)| event.clone()).collect()
}

impl ChainEventSource for MockChain {
    fn challenge_submitted_events(
        &self,
        proposal_ids: &[u64],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChallengeSubmitted>, SourceError> {
        let mut state = self.lock();
        state.challenge_queries.push((from_block, to_block));
        if state.fail_events {
            return Err(SourceError::DataSource("log query failed".into()));
        }
        Ok(in_range(&state.challenges, proposal_ids, from_block, to_block, |e| {
            e.proposal_id
        }))
    }

    fn root_submitted_events(
        &self,
        proposal_ids: &[u64],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RootSubmitted>, SourceError> {
        let mut state = self.lock();
        state.root_queries.push((from_block, to_block));
        if state.fail_events {
            return Err(SourceError::DataSource("log query failed".into()));
        }
        Ok(in_range(&state.roots, proposal_ids, from_block, to_block, |e| {
            e.proposal_id
        }))
    }
}

impl ChainStateSource for MockChain {
    fn challenge_state(&self, proposal_id: u64, index: u64) -> Result<ChallengeState, SourceError> {
        Ok(self
            .lock()
            .states
            .get(&(proposal_id, index))
            .copied()
            .unwrap_or(ChallengeState::Unchallenged))
    }

    fn proposal_node(&self, proposal_id: u64, index: u64) -> Result<VotingTreeNode, SourceError> {
        let mut state = self.lock();
        state.node_reads += 1;
        state
            .nodes
            .get(&(proposal_id, index))
            .cloned()
            .ok_or_else(|| SourceError::DataSource(format!("no node {proposal_id}/{index}")))
    }
}

impl ChainTxSubmitter for MockChain {
    fn submit_root(
        &self,
        proposal_id: u64,
        index: u64,
        proof: &[VotingTreeNode],
        pollard: &[VotingTreeNode],
    ) -> Result<TxHash, SourceError> {
        let mut state = self.lock();
        if state.failing.contains(&(proposal_id, index)) {
            return Err(SourceError::Submission("simulation reverted".into()));
        }
        state
            .submitted_roots
            .push((proposal_id, index, proof.to_vec(), pollard.to_vec()));
        Ok(state.next_tx())
    }

    fn submit_create_challenge(
        &self,
        proposal_id: u64,
        index: u64,
        node: &VotingTreeNode,
        proof: &[VotingTreeNode],
    ) -> Result<TxHash, SourceError> {
        let mut state = self.lock();
        if state.failing.contains(&(proposal_id, index)) {
            return Err(SourceError::Submission("simulation reverted".into()));
        }
        state
            .submitted_challenges
            .push((proposal_id, index, node.clone(), proof.to_vec()));
        Ok(state.next_tx())
    }
}

/// Trees, chain and block clock wired together.
pub struct TestHarness {
    pub source: Arc<MockVotingSource>,
    pub trees: Arc<ProposalTrees>,
    pub chain: Arc<MockChain>,
    pub block_time: Arc<FixedBlockTime>,
}

impl TestHarness {
    pub fn new(records: Vec<AccountRecord>) -> Self {
        let source = Arc::new(MockVotingSource::with_records(records));
        Self {
            trees: Arc::new(ProposalTrees::new(source.clone(), VotingConfig::default())),
            source,
            chain: Arc::new(MockChain::default()),
            block_time: Arc::new(FixedBlockTime::offset(0)),
        }
    }

    pub fn clients(&self) -> ChainClients {
        ChainClients {
            events: self.chain.clone(),
            state: self.chain.clone(),
            submitter: self.chain.clone(),
            block_time: self.block_time.clone(),
        }
    }

    pub fn view(&self, block_number: u64, proposals: Vec<ProposalDetails>) -> ChainView {
        ChainView {
            block_number,
            now: NOW,
            genesis_time: GENESIS,
            seconds_per_slot: SECONDS_PER_SLOT,
            proposals,
        }
    }

    /// A proposal created 100 seconds ago with a 1000 second challenge window.
    pub fn proposal(&self, id: u64, proposer: u64, target_height: u64) -> ProposalDetails {
        ProposalDetails {
            id,
            proposer: AccountId::from_low_u64(proposer),
            target_height,
            created_time: NOW - 100,
            challenge_window: 1_000,
        }
    }

    /// Block the first scan for `proposal` starts at.
    pub fn creation_block(&self, proposal: &ProposalDetails) -> u64 {
        self.block_time.offset + (proposal.created_time - GENESIS) / SECONDS_PER_SLOT
    }
}
