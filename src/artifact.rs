//! Persisted network tree artifacts.
//!
//! A network tree for a given height never changes, so it is written once as
//! `network-tree-<height>.json` with a `network-tree-<height>.json.keccak`
//! sidecar holding the hex keccak256 of the file bytes. Loading checks the
//! sidecar, the network name and the root before trusting the leaves.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::TreeError;
use crate::node::VotingTreeNode;
use crate::tree::VotingTree;

const ARTIFACT_SCHEMA: &str = "voting_pollard.network_tree.v1";

/// Errors raised while reading or writing artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O error: {0}")]
    /// Reading or writing a file failed.
    Io(String),
    #[error("failed to encode artifact: {0}")]
    /// The tree could not be serialized.
    Encode(String),
    #[error("failed to decode artifact: {0}")]
    /// The artifact body could not be decoded.
    Decode(String),
    #[error("unexpected artifact schema: {0}")]
    /// The schema tag is not one this crate writes.
    InvalidSchema(String),
    #[error("artifact checksum mismatch: sidecar {expected}, computed {actual}")]
    /// The file does not match its sidecar.
    ChecksumMismatch {
        /// Digest recorded in the sidecar.
        expected: String,
        /// Digest of the bytes on disk.
        actual: String,
    },
    #[error("artifact belongs to network {found}, expected {expected}")]
    /// The artifact was generated for another network.
    NetworkMismatch {
        /// Network this store serves.
        expected: String,
        /// Network recorded in the file.
        found: String,
    },
    #[error("artifact records height {found}, expected {expected}")]
    /// The artifact's height disagrees with its file name.
    HeightMismatch {
        /// Height requested.
        expected: u64,
        /// Height recorded in the file.
        found: u64,
    },
    #[error("artifact root does not match its leaves")]
    /// Rebuilding the tree from the stored leaves gave a different root.
    RootMismatch,
    #[error("artifact leaves are invalid: {0}")]
    /// The stored leaves cannot form a tree.
    Tree(#[from] TreeError),
}

/// Serialized form of a network tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTreeArtifact {
    /// Schema tag.
    pub schema: String,
    /// Version of the crate that wrote the file.
    pub version: String,
    /// Network the snapshot was taken on.
    pub network: String,
    /// Snapshot height.
    pub height: u64,
    /// Virtual index of the tree root.
    pub virtual_root_index: u64,
    /// Levels revealed per challenge round.
    pub depth_per_round: u32,
    /// Unpadded leaf row.
    pub leaves: Vec<VotingTreeNode>,
    /// Root node.
    pub root: VotingTreeNode,
}

impl NetworkTreeArtifact {
    /// Captures `tree` for persistence.
    pub fn from_tree(network: &str, height: u64, tree: &VotingTree) -> Self {
        Self {
            schema: ARTIFACT_SCHEMA.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            network: network.to_string(),
            height,
            virtual_root_index: tree.virtual_root_index(),
            depth_per_round: tree.depth_per_round(),
            leaves: tree.leaves()[..tree.real_leaf_count()].to_vec(),
            root: tree.root().clone(),
        }
    }

    /// Rebuilds the tree and checks it against the recorded root.
    pub fn into_tree(self) -> Result<VotingTree, ArtifactError> {
        if self.schema != ARTIFACT_SCHEMA {
            return Err(ArtifactError::InvalidSchema(self.schema));
        }
        let tree = VotingTree::with_depth_per_round(
            &self.leaves,
            self.virtual_root_index,
            self.depth_per_round,
        )?;
        if !tree.root().same_commitment(&self.root) {
            return Err(ArtifactError::RootMismatch);
        }
        Ok(tree)
    }
}

/// Directory of network tree artifacts for one network.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    network: String,
}

impl ArtifactStore {
    /// Store rooted at `dir` for `network`.
    pub fn new(dir: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            network: network.into(),
        }
    }

    /// Path of the artifact for `height`.
    pub fn artifact_path(&self, height: u64) -> PathBuf {
        self.dir.join(format!("network-tree-{height}.json"))
    }

    /// Path of the checksum sidecar for `height`.
    pub fn checksum_path(&self, height: u64) -> PathBuf {
        self.dir.join(format!("network-tree-{height}.json.keccak"))
    }

    /// Writes the artifact and its sidecar, replacing any previous pair.
    pub fn save(&self, height: u64, tree: &VotingTree) -> Result<PathBuf, ArtifactError> {
        fs::create_dir_all(&self.dir).map_err(|err| ArtifactError::Io(err.to_string()))?;
        let artifact = NetworkTreeArtifact::from_tree(&self.network, height, tree);
        let contents = serde_json::to_vec_pretty(&artifact)
            .map_err(|err| ArtifactError::Encode(err.to_string()))?;

        let path = self.artifact_path(height);
        write_atomic(&path, &contents)?;
        write_atomic(&self.checksum_path(height), checksum_hex(&contents).as_bytes())?;
        info!(evt = "ARTIFACT_SAVED", height, path = %path.display(), "saved network tree");
        Ok(path)
    }

    /// Loads and verifies the artifact for `height`; `Ok(None)` if it was never written.
    pub fn load(&self, height: u64) -> Result<Option<VotingTree>, ArtifactError> {
        let path = self.artifact_path(height);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ArtifactError::Io(err.to_string())),
        };
        let expected = fs::read_to_string(self.checksum_path(height))
            .map_err(|err| ArtifactError::Io(err.to_string()))?;
        let expected = expected.trim().to_string();
        let actual = checksum_hex(&contents);
        if expected != actual {
            warn!(evt = "ARTIFACT_CHECKSUM", height, "artifact checksum mismatch");
            return Err(ArtifactError::ChecksumMismatch { expected, actual });
        }

        let artifact: NetworkTreeArtifact = serde_json::from_slice(&contents)
            .map_err(|err| ArtifactError::Decode(err.to_string()))?;
        if artifact.network != self.network {
            return Err(ArtifactError::NetworkMismatch {
                expected: self.network.clone(),
                found: artifact.network,
            });
        }
        if artifact.height != height {
            return Err(ArtifactError::HeightMismatch {
                expected: height,
                found: artifact.height,
            });
        }
        artifact.into_tree().map(Some)
    }
}

fn checksum_hex(bytes: &[u8]) -> String {
    hex::encode(Keccak256::digest(bytes))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ArtifactError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents).map_err(|err| ArtifactError::Io(err.to_string()))?;
    fs::rename(&tmp, path).map_err(|err| ArtifactError::Io(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("{name}_{ts}"));
        p
    }

    fn sample_tree() -> VotingTree {
        let leaves: Vec<_> = [5u64, 0, 9, 2, 1]
            .iter()
            .map(|s| VotingTreeNode::leaf(U256::from(*s)))
            .collect();
        VotingTree::from_leaves(&leaves, 1).unwrap()
    }

    #[test]
    fn saved_tree_loads_back_identically() {
        let dir = temp_path("artifacts_roundtrip");
        let store = ArtifactStore::new(&dir, "testnet");
        let tree = sample_tree();
        let path = store.save(77, &tree).unwrap();
        assert!(path.ends_with("network-tree-77.json"));
        assert!(store.checksum_path(77).exists());

        let loaded = store.load(77).unwrap().unwrap();
        assert_eq!(loaded, tree);
        assert_eq!(loaded.depth(), 2);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_artifact_is_not_an_error() {
        let store = ArtifactStore::new(temp_path("artifacts_missing"), "testnet");
        assert!(store.load(1).unwrap().is_none());
    }

    #[test]
    fn tampered_file_fails_the_checksum() {
        let dir = temp_path("artifacts_tampered");
        let store = ArtifactStore::new(&dir, "testnet");
        let path = store.save(3, &sample_tree()).unwrap();
        let mut contents = fs::read(&path).unwrap();
        contents.push(b'\n');
        fs::write(&path, contents).unwrap();
        assert!(matches!(
            store.load(3),
            Err(ArtifactError::ChecksumMismatch { .. })
        ));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unreadable_body_is_a_decode_error() {
        let dir = temp_path("artifacts_garbage");
        let store = ArtifactStore::new(&dir, "testnet");
        fs::create_dir_all(&dir).unwrap();
        let body = b"{\"schema\": 7}";
        fs::write(store.artifact_path(4), body).unwrap();
        fs::write(store.checksum_path(4), checksum_hex(body)).unwrap();
        let err = store.load(4).unwrap_err();
        assert!(matches!(err, ArtifactError::Decode(_)));
        assert!(err.to_string().starts_with("failed to decode artifact"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn other_network_is_rejected() {
        let dir = temp_path("artifacts_network");
        ArtifactStore::new(&dir, "mainnet")
            .save(9, &sample_tree())
            .unwrap();
        let err = ArtifactStore::new(&dir, "testnet").load(9).unwrap_err();
        assert!(matches!(err, ArtifactError::NetworkMismatch { .. }));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn forged_root_is_rejected() {
        let mut artifact = NetworkTreeArtifact::from_tree("testnet", 1, &sample_tree());
        artifact.root = VotingTreeNode::leaf(U256::from(1u64));
        assert!(matches!(artifact.into_tree(), Err(ArtifactError::RootMismatch)));
    }
}
