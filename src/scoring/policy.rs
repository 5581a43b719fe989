//! Score formula.
//!
//! Four normalized signals feed a `ScoringPolicy`:
//! - Recency: days since last review over the recency horizon, capped at 1;
//!   never-seen items take the ceiling
//! - Difficulty: historical error rate, 0.5 when there is no data
//! - Known-item penalty: multiplier while a known item is inside its review
//!   interval, floored so it never reaches zero
//! - Weak-area boost: multiplier for items in a weak topic

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;
use crate::domain::{LearningPreferences, PerformanceHistory};

/// Difficulty used when a subject has never attempted an item.
pub const NEUTRAL_DIFFICULTY: f64 = 0.5;

const SECS_PER_DAY: f64 = 86_400.0;

/// Everything a policy may look at for one `(subject, item)` pair.
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    pub history: &'a PerformanceHistory,
    pub preferences: &'a LearningPreferences,
    pub in_weak_topic: bool,
    pub now: DateTime<Utc>,
}

/// Turns scoring inputs into a clamped priority score.
pub trait ScoringPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, inputs: &ScoreInputs<'_>) -> f64;
}

/// Days between `then` and `now`, never negative.
pub fn days_between(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - then).num_seconds() as f64 / SECS_PER_DAY).max(0.0)
}

/// Recency signal in `[0, 1]`.
pub fn recency_signal(history: &PerformanceHistory, now: DateTime<Utc>, horizon_days: f64) -> f64 {
    match history.last_seen {
        None => 1.0,
        Some(_) if horizon_days <= 0.0 => 1.0,
        Some(seen) => (days_between(seen, now) / horizon_days).min(1.0),
    }
}

/// Difficulty signal in `[0, 1]`.
pub fn difficulty_signal(history: &PerformanceHistory) -> f64 {
    history.error_rate().unwrap_or(NEUTRAL_DIFFICULTY)
}

/// Multiplier applied to known items still inside their review interval.
pub fn known_multiplier(
    history: &PerformanceHistory,
    preferences: &LearningPreferences,
    now: DateTime<Utc>,
    floor: f64,
) -> f64 {
    if !history.marked_known {
        return 1.0;
    }
    let within_interval = match history.last_touched() {
        Some(touched) => days_between(touched, now) < preferences.review_interval_days as f64,
        None => true,
    };
    if within_interval {
        preferences.known_item_penalty.max(floor)
    } else {
        1.0
    }
}

/// Multiplier applied to items in one of the subject's weak topics.
pub fn weak_multiplier(preferences: &LearningPreferences, in_weak_topic: bool) -> f64 {
    if in_weak_topic && preferences.focus_on_weak_areas {
        preferences.weak_area_boost.max(1.0)
    } else {
        1.0
    }
}

/// `base * (1 + w_r * recency + w_c * difficulty) * known * boost`, clamped.
#[derive(Debug, Clone)]
pub struct WeightedPolicy {
    pub base_score: f64,
    pub recency_weight: f64,
    pub difficulty_weight: f64,
    pub recency_horizon_days: f64,
    pub known_penalty_floor: f64,
    pub min_score: f64,
    pub max_score: f64,
}

impl WeightedPolicy {
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            base_score: config.base_score,
            recency_weight: config.recency_weight,
            difficulty_weight: config.difficulty_weight,
            recency_horizon_days: config.recency_horizon_days,
            known_penalty_floor: config.known_penalty_floor,
            min_score: config.min_score,
            max_score: config.max_score,
        }
    }
}

impl Default for WeightedPolicy {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default())
    }
}

impl ScoringPolicy for WeightedPolicy {
    fn name(&self) -> &str {
        "weighted"
    }

    fn score(&self, inputs: &ScoreInputs<'_>) -> f64 {
        let recency = recency_signal(inputs.history, inputs.now, self.recency_horizon_days);
        let difficulty = difficulty_signal(inputs.history);
        let known = known_multiplier(inputs.history, inputs.preferences, inputs.now, self.known_penalty_floor);
        let boost = weak_multiplier(inputs.preferences, inputs.in_weak_topic);

        let raw = self.base_score
            * (1.0 + self.recency_weight * recency + self.difficulty_weight * difficulty)
            * known
            * boost;

        if raw.is_nan() {
            return self.min_score;
        }
        raw.clamp(self.min_score, self.max_score)
    }
}
