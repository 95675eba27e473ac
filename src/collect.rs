//! Batched, bounded-concurrency collection of account records.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::leaves::AccountRecord;
use crate::sources::{SourceError, VotingPowerSource};

/// Records requested per call.
pub const DEFAULT_BATCH_SIZE: usize = 250;
/// Batches in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Batching parameters for [`collect_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Records per batch.
    pub batch_size: usize,
    /// Worker threads.
    pub concurrency: usize,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Every eligible account's voting data at one height, in snapshot order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSnapshot {
    /// Height the records were read at.
    pub height: u64,
    /// One record per eligible account.
    pub records: Vec<AccountRecord>,
}

/// Failures while collecting a snapshot.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("voting power source failed: {0}")]
    /// The data source returned an error.
    Source(#[from] SourceError),
    #[error("batch at {start} returned {received} records, expected {expected}")]
    /// A batch came back with the wrong number of records.
    ShortBatch {
        /// First record index of the batch.
        start: u64,
        /// Records requested.
        expected: usize,
        /// Records received.
        received: usize,
    },
    #[error("invalid collection config: {0}")]
    /// Batch size or concurrency was zero.
    InvalidConfig(&'static str),
    #[error("failed to start collection workers: {0}")]
    /// The worker pool could not be built.
    Pool(String),
}

/// Reads every eligible account at `height` from `source`.
///
/// Batches run on a dedicated pool of `config.concurrency` threads, each writing
/// its own slice of the preallocated output. The first failing batch fails the
/// whole collection.
pub fn collect_snapshot(
    source: &dyn VotingPowerSource,
    height: u64,
    config: &CollectConfig,
) -> Result<VotingSnapshot, CollectError> {
    if config.batch_size == 0 {
        return Err(CollectError::InvalidConfig("batch_size must be at least 1"));
    }
    if config.concurrency == 0 {
        return Err(CollectError::InvalidConfig("concurrency must be at least 1"));
    }

    let count = source.eligible_account_count(height)?;
    let mut records = vec![AccountRecord::default(); count as usize];
    if records.is_empty() {
        return Ok(VotingSnapshot { height, records });
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.concurrency)
        .build()
        .map_err(|err| CollectError::Pool(err.to_string()))?;

    let batch_size = config.batch_size;
    pool.install(|| {
        records
            .par_chunks_mut(batch_size)
            .enumerate()
            .try_for_each(|(batch, chunk)| {
                let start = (batch * batch_size) as u64;
                let fetched = source.account_records(height, start, chunk.len() as u64)?;
                if fetched.len() != chunk.len() {
                    return Err(CollectError::ShortBatch {
                        start,
                        expected: chunk.len(),
                        received: fetched.len(),
                    });
                }
                chunk.clone_from_slice(&fetched);
                debug!(evt = "BATCH", height, start, len = chunk.len(), "collected batch");
                Ok(())
            })
    })?;

    info!(evt = "SNAPSHOT", height, accounts = count, "collected voting snapshot");
    Ok(VotingSnapshot { height, records })
}
