//! Stored priority scores, coverage gaps and generation hints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::{ItemId, SubjectId, TopicKey};

/// How urgently one item should be practiced by one subject.
///
/// At most one row exists per `(subject_id, item_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub subject_id: SubjectId,
    pub item_id: ItemId,
    pub score: f64,
    pub last_calculated_at: DateTime<Utc>,
}

/// A bucket lacking fresh items relative to the subject's target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicGap {
    pub key: TopicKey,
    /// `None` for a system-wide gap merged across subjects.
    pub subject_id: Option<SubjectId>,
    pub provider: Option<String>,
    pub total_items: usize,
    pub fresh_items: usize,
    pub fresh_ratio: f64,
    pub target_ratio: f64,
    pub severity: f64,
    pub suggested_count: usize,
    pub subjects_affected: usize,
    /// Weak topics the generated items should concentrate on, weakest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub focus_topics: Vec<String>,
    /// An active generation hint forced this bucket.
    #[serde(default)]
    pub hinted: bool,
}

/// Counts of stored scores per bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub average: f64,
    pub total: usize,
}

/// Short-lived request to generate for one bucket ahead of its turn.
///
/// Re-hinting an active bucket bumps `priority_weight` and extends the expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationHint {
    pub subject_id: SubjectId,
    pub key: TopicKey,
    pub priority_weight: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
