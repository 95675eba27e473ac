//! Builds and caches the trees a proposal commits to, and routes indices to them.
//!
//! A proposal at height `h` commits to one network tree (virtual root 1) whose
//! leaf `P + i` is in turn the root of account `i`'s delegate tree. Indices
//! below `P` live in the network tree; everything deeper belongs to the
//! delegate tree of the network leaf above it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactError, ArtifactStore};
use crate::collect::{collect_snapshot, CollectError, VotingSnapshot};
use crate::compare::{compare_pollards, ChallengeArtifacts};
use crate::config::VotingConfig;
use crate::error::TreeError;
use crate::leaves::{delegate_leaves, network_leaves, AccountId};
use crate::node::VotingTreeNode;
use crate::sources::VotingPowerSource;
use crate::tree::VotingTree;

/// Errors raised while producing trees or artifacts for a proposal.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    /// Collecting the snapshot failed.
    Collect(#[from] CollectError),
    #[error(transparent)]
    /// A tree operation failed.
    Tree(#[from] TreeError),
    #[error(transparent)]
    /// Persisting an artifact failed.
    Artifact(#[from] ArtifactError),
    #[error("account {account} is not eligible at height {height}")]
    /// The account is not part of the snapshot.
    UnknownAccount {
        /// Account looked up.
        account: AccountId,
        /// Snapshot height.
        height: u64,
    },
}

/// What a voter presents alongside a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingArtifacts {
    /// Position of the account in the snapshot.
    pub account_index: usize,
    /// Power delegated to the account (the root sum of its delegate tree).
    pub total_delegated_power: U256,
    /// Network-tree proof for the account's leaf.
    pub proof: Vec<VotingTreeNode>,
}

#[derive(Default)]
struct TreeCache {
    snapshots: HashMap<u64, Arc<VotingSnapshot>>,
    networks: HashMap<u64, Arc<VotingTree>>,
    delegates: HashMap<(u64, usize), Arc<VotingTree>>,
    leases: HashMap<u64, usize>,
}

impl TreeCache {
    fn evict(&mut self, height: u64) {
        self.snapshots.remove(&height);
        self.networks.remove(&height);
        self.delegates.retain(|(h, _), _| *h != height);
    }
}

/// Heights a task cycle is working on.
///
/// Cached trees for a height are evicted when the last lease holding it is
/// dropped, so concurrent cycles never discard each other's trees.
pub struct HeightLease<'a> {
    trees: &'a ProposalTrees,
    heights: Vec<u64>,
}

impl HeightLease<'_> {
    /// Leased heights, ascending.
    pub fn heights(&self) -> &[u64] {
        &self.heights
    }
}

impl Drop for HeightLease<'_> {
    fn drop(&mut self) {
        let mut cache = self.trees.cache();
        for height in &self.heights {
            let remaining = match cache.leases.get_mut(height) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            };
            if remaining == 0 {
                cache.leases.remove(height);
                cache.evict(*height);
            }
        }
    }
}

/// Tree factory shared by the defender and the verifier.
///
/// Trees are cached per height while a [`HeightLease`] holds it, or until
/// [`ProposalTrees::clear`] is called.
pub struct ProposalTrees {
    source: Arc<dyn VotingPowerSource>,
    config: VotingConfig,
    store: Option<ArtifactStore>,
    cache: Mutex<TreeCache>,
}

impl ProposalTrees {
    /// Creates a factory; artifacts are persisted when `config.artifact_dir` is set.
    pub fn new(source: Arc<dyn VotingPowerSource>, config: VotingConfig) -> Self {
        let store = config
            .artifact_dir
            .as_ref()
            .map(|dir| ArtifactStore::new(dir.clone(), config.network.clone()));
        Self {
            source,
            config,
            store,
            cache: Mutex::new(TreeCache::default()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &VotingConfig {
        &self.config
    }

    /// Drops every cached snapshot and tree. Outstanding leases stay valid.
    pub fn clear(&self) {
        let mut cache = self.cache();
        let leases = std::mem::take(&mut cache.leases);
        *cache = TreeCache {
            leases,
            ..TreeCache::default()
        };
    }

    /// Holds the cache for `heights` until the returned lease is dropped.
    pub fn lease(&self, heights: impl IntoIterator<Item = u64>) -> HeightLease<'_> {
        let mut heights: Vec<u64> = heights.into_iter().collect();
        heights.sort_unstable();
        heights.dedup();
        let mut cache = self.cache();
        for height in &heights {
            *cache.leases.entry(*height).or_default() += 1;
        }
        drop(cache);
        HeightLease {
            trees: self,
            heights,
        }
    }

    /// Voting snapshot at `height`.
    pub fn snapshot(&self, height: u64) -> Result<Arc<VotingSnapshot>, ManagerError> {
        if let Some(snapshot) = self.cache().snapshots.get(&height) {
            return Ok(snapshot.clone());
        }
        let snapshot = Arc::new(collect_snapshot(
            self.source.as_ref(),
            height,
            &self.config.collect(),
        )?);
        self.cache().snapshots.insert(height, snapshot.clone());
        Ok(snapshot)
    }

    /// Network tree at `height`, from cache, from disk, or freshly built.
    pub fn network_tree(&self, height: u64) -> Result<Arc<VotingTree>, ManagerError> {
        if let Some(tree) = self.cache().networks.get(&height) {
            return Ok(tree.clone());
        }

        let tree = match self.load_artifact(height) {
            Some(tree) => tree,
            None => {
                let snapshot = self.snapshot(height)?;
                let leaves = network_leaves(&snapshot.records)?;
                let tree =
                    VotingTree::with_depth_per_round(&leaves, 1, self.config.depth_per_round)?;
                if let Some(store) = &self.store {
                    store.save(height, &tree)?;
                }
                info!(
                    evt = "NETWORK_TREE",
                    height,
                    leaves = tree.real_leaf_count(),
                    "generated network tree"
                );
                tree
            }
        };

        let tree = Arc::new(tree);
        self.cache().networks.insert(height, tree.clone());
        Ok(tree)
    }

    /// Delegate tree of the `account_index`-th account at `height`.
    pub fn delegate_tree(
        &self,
        height: u64,
        account_index: usize,
    ) -> Result<Arc<VotingTree>, ManagerError> {
        if let Some(tree) = self.cache().delegates.get(&(height, account_index)) {
            return Ok(tree.clone());
        }

        let network = self.network_tree(height)?;
        let snapshot = self.snapshot(height)?;
        let record = snapshot
            .records
            .get(account_index)
            .ok_or(TreeError::IndexOutOfRange {
                index: account_index as u64,
                node_count: snapshot.records.len() as u64,
            })?;
        let leaves = delegate_leaves(&snapshot.records, &record.account);
        let virtual_root = (network.leaf_count() + account_index) as u64;
        let tree = Arc::new(VotingTree::with_depth_per_round(
            &leaves,
            virtual_root,
            self.config.depth_per_round,
        )?);
        debug!(
            evt = "DELEGATE_TREE",
            height,
            account_index,
            virtual_root,
            "generated delegate tree"
        );
        self.cache()
            .delegates
            .insert((height, account_index), tree.clone());
        Ok(tree)
    }

    /// The tree that owns virtual index `virtual_index` at `height`.
    pub fn tree_for_index(
        &self,
        height: u64,
        virtual_index: u64,
    ) -> Result<Arc<VotingTree>, ManagerError> {
        let network = self.network_tree(height)?;
        let padded = network.leaf_count() as u64;
        if virtual_index == 0 {
            return Err(TreeError::IndexOutOfRange {
                index: 0,
                node_count: network.node_count(),
            }
            .into());
        }
        if virtual_index < padded {
            return Ok(network);
        }

        let ancestor = virtual_index >> (virtual_index.ilog2() - padded.ilog2());
        let account_index = (ancestor - padded) as usize;
        if account_index >= network.real_leaf_count() {
            return Err(TreeError::IndexOutOfRange {
                index: virtual_index,
                node_count: network.node_count(),
            }
            .into());
        }
        self.delegate_tree(height, account_index)
    }

    /// Proof of the challenged node and the pollard below it, for a response.
    pub fn response_artifacts(
        &self,
        height: u64,
        challenged_index: u64,
    ) -> Result<(Vec<VotingTreeNode>, Vec<VotingTreeNode>), ManagerError> {
        let tree = self.tree_for_index(height, challenged_index)?;
        let local = tree.local_index(challenged_index)?;
        let proof = tree.proof(local)?;
        let pollard = tree.pollard_for_challenge_response(challenged_index)?.to_vec();
        Ok((proof, pollard))
    }

    /// Compares a submitted pollard rooted at `root_index` with the local tree.
    pub fn challengeable_artifacts(
        &self,
        height: u64,
        root_index: u64,
        submitted: &[VotingTreeNode],
    ) -> Result<Option<ChallengeArtifacts>, ManagerError> {
        let tree = self.tree_for_index(height, root_index)?;
        Ok(compare_pollards(&tree, root_index, submitted)?)
    }

    /// Delegated power and network-tree proof for `account` at `height`.
    pub fn voting_artifacts(
        &self,
        height: u64,
        account: &AccountId,
    ) -> Result<VotingArtifacts, ManagerError> {
        let snapshot = self.snapshot(height)?;
        let account_index = snapshot
            .records
            .iter()
            .position(|record| &record.account == account)
            .ok_or(ManagerError::UnknownAccount {
                account: *account,
                height,
            })?;
        let network = self.network_tree(height)?;
        let delegate = self.delegate_tree(height, account_index)?;
        let proof = network.proof(network.leaf_local_index(account_index)?)?;
        Ok(VotingArtifacts {
            account_index,
            total_delegated_power: delegate.root().sum,
            proof,
        })
    }

    fn load_artifact(&self, height: u64) -> Option<VotingTree> {
        let store = self.store.as_ref()?;
        match store.load(height) {
            Ok(Some(tree)) if tree.depth_per_round() == self.config.depth_per_round => Some(tree),
            Ok(Some(_)) => {
                warn!(evt = "ARTIFACT_STALE", height, "depth per round changed; regenerating");
                None
            }
            Ok(None) => None,
            Err(err) => {
                warn!(evt = "ARTIFACT_INVALID", height, error = %err, "regenerating network tree");
                None
            }
        }
    }

    fn cache(&self) -> MutexGuard<'_, TreeCache> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
