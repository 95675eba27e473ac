//! Plumbing shared by the defender and the verifier: the incremental
//! block-window cursor, chunked event fetching, the one-cycle-at-a-time phase
//! gate and the cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::sources::{BlockTimeSource, ChainView, SourceError};

/// Cooperative cancellation shared between a task and whoever drives it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag; running cycles stop at their next checkpoint.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lowers the flag so the task can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether the flag is raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mutex-guarded task phase admitting one cycle at a time.
#[derive(Debug)]
pub struct TaskPhase<P> {
    current: Mutex<P>,
    idle: P,
}

impl<P: Copy + PartialEq> TaskPhase<P> {
    /// A gate resting in `idle`.
    pub fn new(idle: P) -> Self {
        Self {
            current: Mutex::new(idle),
            idle,
        }
    }

    /// Phase the task is in right now.
    pub fn current(&self) -> P {
        *self.lock()
    }

    /// Moves from idle to `phase`; `None` if a cycle is already running.
    pub fn try_begin(&self, phase: P) -> Option<PhaseGuard<'_, P>> {
        let mut current = self.lock();
        if *current != self.idle {
            return None;
        }
        *current = phase;
        Some(PhaseGuard { gate: self })
    }

    fn lock(&self) -> MutexGuard<'_, P> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holds a [`TaskPhase`] out of idle; dropping it returns the gate to idle.
#[derive(Debug)]
pub struct PhaseGuard<'a, P: Copy + PartialEq> {
    gate: &'a TaskPhase<P>,
}

impl<P: Copy + PartialEq> PhaseGuard<'_, P> {
    /// Moves the running cycle to `phase`.
    pub fn set(&self, phase: P) {
        *self.gate.lock() = phase;
    }
}

impl<P: Copy + PartialEq> Drop for PhaseGuard<'_, P> {
    fn drop(&mut self) {
        *self.gate.lock() = self.gate.idle;
    }
}

/// Remembers how far a task has scanned.
///
/// The first window starts at the block of the slot in which the earliest
/// relevant proposal was created; every later window starts one block past
/// the last one that was fully processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    last_scanned: Option<u64>,
}

impl ScanCursor {
    /// Last block whose events were fully processed.
    pub fn last_scanned(&self) -> Option<u64> {
        self.last_scanned
    }

    /// Inclusive block range to scan next, or `None` when nothing new was produced.
    pub fn window(
        &self,
        view: &ChainView,
        earliest_created: u64,
        block_time: &dyn BlockTimeSource,
    ) -> Result<Option<(u64, u64)>, SourceError> {
        let start = match self.last_scanned {
            Some(last) => last.saturating_add(1),
            None => {
                let slot = creation_slot(view, earliest_created)?;
                block_time.block_number_for_slot(slot)?
            }
        };
        let end = view.block_number;
        if start > end {
            return Ok(None);
        }
        Ok(Some((start, end)))
    }

    /// Marks everything up to `end` as processed.
    pub fn advance(&mut self, end: u64) {
        self.last_scanned = Some(end);
    }
}

/// Beacon slot containing unix time `created`.
pub fn creation_slot(view: &ChainView, created: u64) -> Result<u64, SourceError> {
    if view.seconds_per_slot == 0 {
        return Err(SourceError::DataSource(
            "beacon config reports zero seconds per slot".to_string(),
        ));
    }
    Ok(created.saturating_sub(view.genesis_time) / view.seconds_per_slot)
}

/// Calls `fetch` over `[from, to]` in sub-ranges of at most `interval` blocks.
pub fn fetch_chunked<T, F>(
    from: u64,
    to: u64,
    interval: u64,
    mut fetch: F,
) -> Result<Vec<T>, SourceError>
where
    F: FnMut(u64, u64) -> Result<Vec<T>, SourceError>,
{
    let interval = interval.max(1);
    let mut out = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(interval - 1).min(to);
        let mut batch = fetch(start, end)?;
        debug!(evt = "SCAN", from = start, to = end, events = batch.len(), "scanned block range");
        out.append(&mut batch);
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    Ok(out)
}
