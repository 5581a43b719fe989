//! Collaborator traits the scheduler core reads and writes through.
//!
//! The host application owns persistence; the core only sees these seams.
//! `SqliteStore` implements all of them for the CLI and the tests.

use chrono::{DateTime, Utc};

use crate::domain::{
    GenerationHint, GenerationRun, Item, ItemId, LearningPreferences, PerformanceHistory, PriorityScore, SubjectId,
    SubjectProfile, TopicKey, TopicPerformance, WorkerStatus,
};
use crate::error::Result;

/// Settings key for the system-wide pause flag.
pub const GLOBAL_PAUSE_KEY: &str = "global_pause";

/// Persistence of priority scores, keyed by `(subject_id, item_id)`.
pub trait ScoreStore: Send + Sync {
    /// Insert or replace the score for `(subject_id, item_id)`.
    fn upsert_score(&self, score: &PriorityScore) -> Result<()>;

    fn get_score(&self, subject_id: SubjectId, item_id: ItemId) -> Result<Option<PriorityScore>>;

    fn scores_for_subject(&self, subject_id: SubjectId) -> Result<Vec<PriorityScore>>;

    fn all_scores(&self) -> Result<Vec<PriorityScore>>;

    /// Bulk clear used by the host when a subject resets progress.
    fn clear_subject(&self, subject_id: SubjectId) -> Result<usize>;
}

/// Read access to a subject's answer history.
pub trait PerformanceSource: Send + Sync {
    fn performance_history(&self, subject_id: SubjectId, item_id: ItemId) -> Result<Option<PerformanceHistory>>;

    fn topic_performance(&self, subject_id: SubjectId) -> Result<Vec<TopicPerformance>>;
}

/// Read access to per-subject learning preferences.
pub trait PreferenceSource: Send + Sync {
    fn preferences(&self, subject_id: SubjectId) -> Result<Option<LearningPreferences>>;

    fn all_preferences(&self) -> Result<Vec<(SubjectId, LearningPreferences)>>;
}

/// The host's item inventory and the set of subjects to generate for.
pub trait ItemCatalog: Send + Sync {
    /// Subjects with generation enabled.
    fn active_subjects(&self) -> Result<Vec<SubjectProfile>>;

    fn subject_profile(&self, subject_id: SubjectId) -> Result<Option<SubjectProfile>>;

    /// Items visible to `subject_id` in the `key` bucket.
    fn items_in_bucket(&self, subject_id: SubjectId, key: &TopicKey) -> Result<Vec<Item>>;

    fn item(&self, item_id: ItemId) -> Result<Option<Item>>;
}

/// Where generated items are handed back to the host.
pub trait ItemSink: Send + Sync {
    /// Persist `items` for `subject_id`, returning how many were saved.
    fn save_generated_items(&self, items: &[Item], subject_id: SubjectId) -> Result<usize>;
}

/// Key/value settings holding the pause flags.
pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str) -> Result<Option<String>>;

    fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// A flag is set when its value parses as `true` or `1`.
    fn flag(&self, key: &str) -> Result<bool> {
        Ok(self
            .get_setting(key)?
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false))
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        self.set_setting(key, if value { "true" } else { "false" })
    }
}

/// Short-lived per-subject requests to fill a bucket early.
pub trait GenerationHintStore: Send + Sync {
    /// Create a hint, or bump its weight and push its expiry out.
    fn upsert_hint(&self, subject_id: SubjectId, key: &TopicKey, expires_at: DateTime<Utc>) -> Result<()>;

    /// Hints that have not expired at `now`, oldest first.
    fn active_hints(&self, subject_id: SubjectId, now: DateTime<Utc>) -> Result<Vec<GenerationHint>>;

    fn clear_hint(&self, subject_id: SubjectId, key: &TopicKey) -> Result<()>;
}

/// One status row per scheduler instance, plus the lease that keeps passes
/// on one instance exclusive across processes.
pub trait WorkerStatusStore: Send + Sync {
    fn get_worker_status(&self, instance_id: &str) -> Result<Option<WorkerStatus>>;

    fn upsert_worker_status(&self, status: &WorkerStatus) -> Result<()>;

    /// Read, modify and write the instance's row atomically, creating it if
    /// needed. Returns the row as written.
    fn update_worker_status(
        &self,
        instance_id: &str,
        apply: &mut dyn FnMut(&mut WorkerStatus),
    ) -> Result<WorkerStatus>;

    /// Touch only the heartbeat column, creating the row if needed.
    fn heartbeat(&self, instance_id: &str, at: DateTime<Utc>) -> Result<()>;

    fn list_worker_statuses(&self) -> Result<Vec<WorkerStatus>>;

    /// Take or extend the pass lease for `instance_id`. Succeeds when the
    /// lease is free, expired at `now`, or already held by `holder`.
    fn try_acquire_pass(
        &self,
        instance_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Push out the expiry of a lease `holder` still owns. False when the
    /// lease is gone or owned by someone else.
    fn renew_pass(&self, instance_id: &str, holder: &str, expires_at: DateTime<Utc>) -> Result<bool>;

    /// Drop the lease if `holder` still owns it.
    fn release_pass(&self, instance_id: &str, holder: &str) -> Result<()>;
}

/// Bounded history of generation runs per instance.
pub trait RunHistoryStore: Send + Sync {
    /// Append `run`, trimming the instance's history to `max_history` entries.
    fn append_run(&self, run: &GenerationRun, max_history: usize) -> Result<()>;

    /// Most recent runs first.
    fn recent_runs(&self, instance_id: &str, limit: usize) -> Result<Vec<GenerationRun>>;

    /// Most recent runs across every instance.
    fn latest_runs(&self, limit: usize) -> Result<Vec<GenerationRun>>;
}
