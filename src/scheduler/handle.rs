//! Background driver for a `SchedulerWorker`.
//!
//! `WorkerHandle::start` spawns two tasks: the run loop (interval ticks and
//! manual triggers) and an independent heartbeat. Manual triggers go through
//! a one-slot channel, so any number of triggers while a pass runs collapse
//! into a single follow-up pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::worker::{PassResult, RunTrigger, SchedulerWorker};
use crate::domain::{GenerationRun, WorkerStatus};
use crate::error::Result;

/// Result of `WorkerHandle::trigger_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    Queued,
    /// A trigger is already waiting; this one was folded into it.
    AlreadyPending,
    Stopped,
}

pub struct WorkerHandle {
    worker: Arc<SchedulerWorker>,
    trigger_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    run_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Mark the instance running and spawn its tasks.
    pub fn start(worker: Arc<SchedulerWorker>) -> Result<Self> {
        if worker.config().start_paused {
            worker.set_global_pause(true)?;
        }
        worker.mark_running(true)?;

        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let run_task = tokio::spawn(run_loop(worker.clone(), trigger_rx, cancel.clone()));
        let heartbeat_task = tokio::spawn(heartbeat_loop(worker.clone(), cancel.clone()));

        tracing::info!(
            instance = %worker.instance_id(),
            interval_secs = worker.config().interval_secs,
            "Scheduler worker started"
        );
        Ok(Self {
            worker,
            trigger_tx,
            cancel,
            run_task,
            heartbeat_task,
        })
    }

    pub fn worker(&self) -> &Arc<SchedulerWorker> {
        &self.worker
    }

    /// Ask for a pass as soon as the current one (if any) finishes.
    pub fn trigger_run(&self) -> TriggerResult {
        if self.cancel.is_cancelled() {
            return TriggerResult::Stopped;
        }
        match self.trigger_tx.try_send(()) {
            Ok(()) => TriggerResult::Queued,
            Err(TrySendError::Full(())) => TriggerResult::AlreadyPending,
            Err(TrySendError::Closed(())) => TriggerResult::Stopped,
        }
    }

    pub fn pause(&self) -> Result<WorkerStatus> {
        self.worker.set_instance_paused(true)
    }

    pub fn resume(&self) -> Result<WorkerStatus> {
        self.worker.set_instance_paused(false)
    }

    pub fn status(&self) -> Result<WorkerStatus> {
        self.worker.status()
    }

    pub fn history(&self, limit: usize) -> Result<Vec<GenerationRun>> {
        self.worker.history(limit)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled by `shutdown`; also cancels an in-flight pass.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel, wait for both tasks, then mark the instance stopped.
    pub async fn shutdown(self) -> Result<WorkerStatus> {
        tracing::info!(instance = %self.worker.instance_id(), "Stopping scheduler worker");
        self.cancel.cancel();
        if let Err(e) = self.run_task.await {
            tracing::error!(error = ?e, "Run loop task panicked");
        }
        if let Err(e) = self.heartbeat_task.await {
            tracing::error!(error = ?e, "Heartbeat task panicked");
        }
        self.worker.mark_running(false)
    }
}

async fn run_loop(worker: Arc<SchedulerWorker>, mut trigger_rx: mpsc::Receiver<()>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(worker.config().interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let trigger = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(()) = trigger_rx.recv() => RunTrigger::Manual,
            _ = ticker.tick() => RunTrigger::Interval,
        };

        match worker.run_pass(trigger, &cancel).await {
            Ok(PassResult::Completed(run)) => {
                tracing::debug!(run_id = %run.run_id, outcome = run.outcome.as_str(), "Pass recorded");
            }
            Ok(PassResult::Paused(scope)) => {
                tracing::debug!(%scope, "Pass skipped while paused");
            }
            Ok(PassResult::Busy) => {}
            Err(e) => {
                tracing::error!(instance = %worker.instance_id(), error = %e, "Pass failed to update worker status");
            }
        }
    }
    tracing::debug!(instance = %worker.instance_id(), "Run loop exited");
}

async fn heartbeat_loop(worker: Arc<SchedulerWorker>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(worker.config().heartbeat_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = worker.heartbeat() {
                    tracing::warn!(instance = %worker.instance_id(), error = %e, "Heartbeat failed");
                }
            }
        }
    }
}
