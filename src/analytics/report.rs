//! Serializable views returned by the analytics aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ItemId, ItemKind, RunOutcome, ScoreDistribution, SubjectId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighPriorityItem {
    pub subject_id: SubjectId,
    pub item_id: ItemId,
    pub language: String,
    pub level: String,
    pub kind: ItemKind,
    pub topic: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakArea {
    pub topic: String,
    pub total_attempts: u32,
    pub correct_attempts: u32,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPerformanceSummary {
    pub subject_id: SubjectId,
    pub distribution: ScoreDistribution,
    pub weak_areas: Vec<WeakArea>,
    pub high_priority_items: Vec<HighPriorityItem>,
    pub last_calculated: Option<DateTime<Utc>>,
}

/// One row of a cross-subject comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub subject_id: SubjectId,
    pub distribution: ScoreDistribution,
    pub weak_areas: Vec<WeakArea>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub calculations_per_second: f64,
    pub avg_calculation_time_ms: f64,
    pub avg_query_time_ms: f64,
    pub avg_score: f64,
    pub last_calculation: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundJobs {
    /// Scores recalculated within the last hour.
    pub priority_updates: usize,
    /// Active subjects with no score calculated within the last hour.
    pub queue_size: usize,
    /// Finish time of the latest generation run on any instance, else the
    /// newest score calculation.
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_outcome: Option<RunOutcome>,
    /// `"idle"` before any run, `"stale"` when the latest run is too old,
    /// `"degraded"` when it failed, otherwise `"healthy"`.
    pub status: String,
}

impl Default for BackgroundJobs {
    fn default() -> Self {
        Self {
            priority_updates: 0,
            queue_size: 0,
            last_update: None,
            last_run_outcome: None,
            status: "idle".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub instance_id: String,
    pub healthy: bool,
    pub is_running: bool,
    pub is_paused: bool,
    pub current_activity: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub total_items_generated: u64,
    pub last_run_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub performance: PerformanceMetrics,
    pub background_jobs: BackgroundJobs,
    pub workers: Vec<WorkerHealth>,
}

/// A bucket that looks thin on items or on high-priority items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSuggestion {
    pub language: String,
    pub level: String,
    pub kind: ItemKind,
    pub available: usize,
    pub high_priority: usize,
    pub avg_priority: f64,
}

/// Averages across all stored learning preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesUsage {
    pub total_subjects: usize,
    /// True when most subjects focus on weak areas.
    pub focus_on_weak_areas: bool,
    pub fresh_question_ratio: f64,
    pub known_item_penalty: f64,
    pub weak_area_boost: f64,
    pub review_interval_days: f64,
}
