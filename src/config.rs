//! Runtime configuration for the challenge tasks.
//!
//! Values come from defaults, an optional JSON file, then `VP_*` environment
//! overrides, in that order.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collect::{CollectConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY};
use crate::pollard::DEPTH_PER_ROUND;

/// Blocks per event log query.
pub const DEFAULT_EVENT_LOG_INTERVAL: u64 = 1000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    /// The config file could not be read.
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    /// The config file is not valid JSON for [`VotingConfig`].
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    /// An environment override could not be parsed.
    Env {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    #[error("invalid config: {0}")]
    /// A value is out of range.
    Invalid(String),
}

/// Settings shared by the defender, the verifier and tree generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Network name, stamped into persisted artifacts.
    pub network: String,
    /// Records per collection batch.
    pub batch_size: usize,
    /// Collection batches in flight.
    pub concurrency: usize,
    /// Blocks per event log query.
    pub event_log_interval: u64,
    /// Levels revealed per challenge round.
    pub depth_per_round: u32,
    /// Where network tree artifacts are persisted; `None` disables persistence.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            event_log_interval: DEFAULT_EVENT_LOG_INTERVAL,
            depth_per_round: DEPTH_PER_ROUND,
            artifact_dir: None,
        }
    }
}

impl VotingConfig {
    /// Loads `path`, applies the process environment and validates the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `VP_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(network) = lookup("VP_NETWORK") {
            self.network = network;
        }
        if let Some(value) = parse_override(&lookup, "VP_BATCH_SIZE")? {
            self.batch_size = value;
        }
        if let Some(value) = parse_override(&lookup, "VP_CONCURRENCY")? {
            self.concurrency = value;
        }
        if let Some(value) = parse_override(&lookup, "VP_EVENT_LOG_INTERVAL")? {
            self.event_log_interval = value;
        }
        if let Some(value) = parse_override(&lookup, "VP_DEPTH_PER_ROUND")? {
            self.depth_per_round = value;
        }
        if let Some(dir) = lookup("VP_ARTIFACT_DIR") {
            self.artifact_dir = if dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }
        Ok(())
    }

    /// Rejects values the tasks cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.is_empty() {
            return Err(ConfigError::Invalid("network must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.event_log_interval == 0 {
            return Err(ConfigError::Invalid(
                "event_log_interval must be at least 1".into(),
            ));
        }
        if self.depth_per_round == 0 || self.depth_per_round > 63 {
            return Err(ConfigError::Invalid(
                "depth_per_round must be between 1 and 63".into(),
            ));
        }
        Ok(())
    }

    /// Collection parameters.
    pub fn collect(&self) -> CollectConfig {
        CollectConfig {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
        }
    }
}

fn parse_override<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { key, value }),
    }
}
