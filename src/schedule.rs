#![cfg(feature = "net")]

//! Periodic driver for the defender and the verifier.
//!
//! Each tick fetches a fresh [`ChainView`] and runs one cycle on the blocking
//! pool. Shutdown raises the task's cancellation flag, waits for the running
//! cycle to reach its next checkpoint, and returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::defend::ChallengeDefender;
use crate::scan::CancelFlag;
use crate::sources::{ChainView, ChainViewSource};
use crate::verify::ChallengeVerifier;

/// A task that runs one cycle per tick.
pub trait ScheduledTask: Send + Sync + 'static {
    /// Failure of a single cycle.
    type Error: std::fmt::Display + Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs one cycle against `view`.
    fn run_cycle(&self, view: &ChainView) -> Result<(), Self::Error>;

    /// Flag that interrupts a running cycle.
    fn cancel_flag(&self) -> CancelFlag;
}

impl ScheduledTask for ChallengeDefender {
    type Error = crate::defend::DefendError;

    fn name(&self) -> &'static str {
        "defend"
    }

    fn run_cycle(&self, view: &ChainView) -> Result<(), Self::Error> {
        let report = self.run(view)?;
        if !report.responded.is_empty() {
            info!(evt = "CYCLE", task = "defend", responses = report.responded.len());
        }
        Ok(())
    }

    fn cancel_flag(&self) -> CancelFlag {
        ChallengeDefender::cancel_flag(self)
    }
}

impl ScheduledTask for ChallengeVerifier {
    type Error = crate::verify::VerifyError;

    fn name(&self) -> &'static str {
        "verify"
    }

    fn run_cycle(&self, view: &ChainView) -> Result<(), Self::Error> {
        let report = self.run(view)?;
        if !report.challenged.is_empty() {
            info!(evt = "CYCLE", task = "verify", challenges = report.challenged.len());
        }
        Ok(())
    }

    fn cancel_flag(&self) -> CancelFlag {
        ChallengeVerifier::cancel_flag(self)
    }
}

/// Runs `task` every `period` until `shutdown` turns `true` or its sender is dropped.
///
/// Cycle failures are logged and the loop carries on. A cycle running at
/// shutdown is cancelled and awaited; the task's cancellation flag is lowered
/// again on return so the task can be scheduled anew. Returns the number of
/// cycles started.
pub async fn run_task_loop<T: ScheduledTask>(
    task: Arc<T>,
    views: Arc<dyn ChainViewSource>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let cancel = task.cancel_flag();
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = 0u64;
    info!(evt = "START", task = task.name(), period_ms = period.as_millis() as u64);

    loop {
        select! {
            _ = ticker.tick() => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }

        cycles += 1;
        let worker = task.clone();
        let source = views.clone();
        let mut handle = tokio::task::spawn_blocking(move || -> Result<(), String> {
            let view = source.chain_view().map_err(|err| err.to_string())?;
            worker.run_cycle(&view).map_err(|err| err.to_string())
        });

        let mut stopping = false;
        let outcome = select! {
            outcome = &mut handle => outcome,
            _ = shutdown_requested(&mut shutdown) => {
                cancel.cancel();
                stopping = true;
                handle.await
            }
        };
        match outcome {
            Ok(Ok(())) => debug!(evt = "CYCLE_DONE", task = task.name(), cycle = cycles),
            Ok(Err(err)) => warn!(evt = "CYCLE_FAILED", task = task.name(), cycle = cycles, error = %err),
            Err(err) => warn!(evt = "CYCLE_PANICKED", task = task.name(), cycle = cycles, error = %err),
        }
        if stopping {
            break;
        }
    }

    cancel.reset();
    info!(evt = "STOP", task = task.name(), cycles);
    cycles
}

/// Runs `task` until Ctrl-C.
pub async fn run_until_ctrl_c<T: ScheduledTask>(
    task: Arc<T>,
    views: Arc<dyn ChainViewSource>,
    period: Duration,
) -> u64 {
    let (tx, rx) = watch::channel(false);
    let runner = tokio::spawn(run_task_loop(task, views, period, rx));
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(evt = "SIGNAL", error = %err, "failed to listen for ctrl-c; stopping");
    }
    let _ = tx.send(true);
    runner.await.unwrap_or(0)
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
