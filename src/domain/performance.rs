//! Learner performance history and learning preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DrillrError, Result};

/// A subject's record against one item. `Default` means never seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHistory {
    pub attempts: u32,
    pub correct: u32,
    pub last_seen: Option<DateTime<Utc>>,
    pub marked_known: bool,
    pub marked_known_at: Option<DateTime<Utc>>,
}

impl PerformanceHistory {
    pub fn never_seen() -> Self {
        Self::default()
    }

    pub fn is_fresh(&self) -> bool {
        self.attempts == 0
    }

    /// Fraction of incorrect attempts, `None` without attempts.
    pub fn error_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            return None;
        }
        let correct = self.correct.min(self.attempts);
        Some(1.0 - correct as f64 / self.attempts as f64)
    }

    /// The later of the last review and the moment the item was marked known.
    pub fn last_touched(&self) -> Option<DateTime<Utc>> {
        match (self.last_seen, self.marked_known_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Aggregate accuracy for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicPerformance {
    pub topic: String,
    pub attempts: u32,
    pub correct: u32,
}

impl TopicPerformance {
    pub fn accuracy(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.correct.min(self.attempts) as f64 / self.attempts as f64
    }
}

/// Per-subject tuning of scoring and generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningPreferences {
    pub focus_on_weak_areas: bool,
    pub fresh_question_ratio: f64,
    pub known_item_penalty: f64,
    pub review_interval_days: u32,
    pub weak_area_boost: f64,
}

impl Default for LearningPreferences {
    fn default() -> Self {
        Self {
            focus_on_weak_areas: true,
            fresh_question_ratio: 0.3,
            known_item_penalty: 0.1,
            review_interval_days: 7,
            weak_area_boost: 2.0,
        }
    }
}

impl LearningPreferences {
    pub const REVIEW_INTERVAL_MIN: u32 = 1;
    pub const REVIEW_INTERVAL_MAX: u32 = 60;
    pub const WEAK_BOOST_MIN: f64 = 1.0;
    pub const WEAK_BOOST_MAX: f64 = 5.0;

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fresh_question_ratio) {
            return Err(DrillrError::InvalidPreferences(format!(
                "fresh_question_ratio {} not in [0, 1]",
                self.fresh_question_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.known_item_penalty) {
            return Err(DrillrError::InvalidPreferences(format!(
                "known_item_penalty {} not in [0, 1]",
                self.known_item_penalty
            )));
        }
        if !(Self::REVIEW_INTERVAL_MIN..=Self::REVIEW_INTERVAL_MAX).contains(&self.review_interval_days) {
            return Err(DrillrError::InvalidPreferences(format!(
                "review_interval_days {} not in [{}, {}]",
                self.review_interval_days,
                Self::REVIEW_INTERVAL_MIN,
                Self::REVIEW_INTERVAL_MAX
            )));
        }
        if !(Self::WEAK_BOOST_MIN..=Self::WEAK_BOOST_MAX).contains(&self.weak_area_boost) {
            return Err(DrillrError::InvalidPreferences(format!(
                "weak_area_boost {} not in [{}, {}]",
                self.weak_area_boost,
                Self::WEAK_BOOST_MIN,
                Self::WEAK_BOOST_MAX
            )));
        }
        Ok(())
    }

    /// Clamp every field into range. NaN falls back to the default value.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let clamp = |v: f64, lo: f64, hi: f64, fallback: f64| if v.is_nan() { fallback } else { v.clamp(lo, hi) };
        Self {
            focus_on_weak_areas: self.focus_on_weak_areas,
            fresh_question_ratio: clamp(self.fresh_question_ratio, 0.0, 1.0, defaults.fresh_question_ratio),
            known_item_penalty: clamp(self.known_item_penalty, 0.0, 1.0, defaults.known_item_penalty),
            review_interval_days: self
                .review_interval_days
                .clamp(Self::REVIEW_INTERVAL_MIN, Self::REVIEW_INTERVAL_MAX),
            weak_area_boost: clamp(
                self.weak_area_boost,
                Self::WEAK_BOOST_MIN,
                Self::WEAK_BOOST_MAX,
                defaults.weak_area_boost,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_error_rate() {
        let history = PerformanceHistory {
            attempts: 4,
            correct: 1,
            ..Default::default()
        };
        assert_eq!(history.error_rate(), Some(0.75));
        assert_eq!(PerformanceHistory::never_seen().error_rate(), None);
    }

    #[test]
    fn test_error_rate_tolerates_inconsistent_counts() {
        let history = PerformanceHistory {
            attempts: 2,
            correct: 5,
            ..Default::default()
        };
        assert_eq!(history.error_rate(), Some(0.0));
    }

    #[test]
    fn test_last_touched_prefers_latest() {
        let now = Utc::now();
        let history = PerformanceHistory {
            attempts: 1,
            correct: 1,
            last_seen: Some(now - Duration::days(3)),
            marked_known: true,
            marked_known_at: Some(now - Duration::days(1)),
        };
        assert_eq!(history.last_touched(), Some(now - Duration::days(1)));
    }

    #[test]
    fn test_default_preferences() {
        let prefs = LearningPreferences::default();
        assert!(prefs.focus_on_weak_areas);
        assert_eq!(prefs.fresh_question_ratio, 0.3);
        assert_eq!(prefs.known_item_penalty, 0.1);
        assert_eq!(prefs.review_interval_days, 7);
        assert_eq!(prefs.weak_area_boost, 2.0);
        assert!(prefs.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let prefs = LearningPreferences {
            review_interval_days: 90,
            ..Default::default()
        };
        let err = prefs.validate().unwrap_err();
        assert!(err.to_string().contains("review_interval_days"));

        let prefs = LearningPreferences {
            weak_area_boost: 0.5,
            ..Default::default()
        };
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn test_sanitized_clamps() {
        let prefs = LearningPreferences {
            focus_on_weak_areas: false,
            fresh_question_ratio: 1.7,
            known_item_penalty: -0.2,
            review_interval_days: 0,
            weak_area_boost: f64::NAN,
        };
        let clean = prefs.sanitized();
        assert!(!clean.focus_on_weak_areas);
        assert_eq!(clean.fresh_question_ratio, 1.0);
        assert_eq!(clean.known_item_penalty, 0.0);
        assert_eq!(clean.review_interval_days, 1);
        assert_eq!(clean.weak_area_boost, 2.0);
        assert!(clean.validate().is_ok());
    }

    #[test]
    fn test_topic_accuracy() {
        let topic = TopicPerformance {
            topic: "verbs".to_string(),
            attempts: 10,
            correct: 4,
        };
        assert_eq!(topic.accuracy(), 0.4);
    }
}
