//! Scheduler worker status and generation run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted status of one scheduler instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub instance_id: String,
    pub is_running: bool,
    pub is_paused: bool,
    pub current_activity: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_run_start: Option<DateTime<Utc>>,
    pub last_run_finish: Option<DateTime<Utc>>,
    pub last_run_error: Option<String>,
    pub total_items_generated: u64,
    pub total_runs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerStatus {
    pub fn new(instance_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            is_running: false,
            is_paused: false,
            current_activity: activity::IDLE.to_string(),
            last_heartbeat: None,
            last_run_start: None,
            last_run_finish: None,
            last_run_error: None,
            total_items_generated: 0,
            total_runs: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_activity(&mut self, activity: &str) {
        self.current_activity = activity.to_string();
        self.updated_at = Utc::now();
    }

    /// Healthy means a heartbeat arrived within `max_age_secs`.
    pub fn is_healthy(&self, now: DateTime<Utc>, max_age_secs: u64) -> bool {
        match self.last_heartbeat {
            Some(beat) => (now - beat).num_seconds() <= max_age_secs as i64,
            None => false,
        }
    }
}

/// Activity labels written to `WorkerStatus::current_activity`.
pub mod activity {
    pub const IDLE: &str = "idle";
    pub const STARTING: &str = "starting";
    pub const CHECKING: &str = "checking pause state";
    pub const SCORING: &str = "refreshing priority scores";
    pub const ANALYZING: &str = "analyzing coverage gaps";
    pub const GENERATING: &str = "generating items";
    pub const PAUSED: &str = "paused";
    pub const STOPPED: &str = "stopped";
}

/// How a generation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Partial,
    Failure,
    Skipped,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Partial => "partial",
            RunOutcome::Failure => "failure",
            RunOutcome::Skipped => "skipped",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// One scheduler pass, as recorded in run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRun {
    pub run_id: String,
    pub instance_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: RunOutcome,
    pub subjects_scored: usize,
    pub scores_updated: usize,
    pub gaps_found: usize,
    pub items_requested: usize,
    pub items_generated: usize,
    pub calls_attempted: usize,
    pub calls_succeeded: usize,
    pub calls_failed: usize,
    pub gaps_skipped_paused: usize,
    pub gaps_skipped_backoff: usize,
    pub rate_limited: bool,
    pub details: Vec<String>,
}
