//! Priority scoring engine.
//!
//! Computes and persists per-item scores, derives weak topics, and reports
//! coverage gaps and score distributions. Missing or unreadable collaborator
//! data falls back to neutral defaults; only score writes report errors.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::TimingRecorder;
use crate::config::ScoringConfig;
use crate::domain::{
    Item, LearningPreferences, PerformanceHistory, PriorityScore, ScoreDistribution, SubjectId, SubjectProfile,
    TopicGap, TopicKey,
};
use crate::error::{DrillrError, Result};
use crate::scoring::distribution::bucket_scores;
use crate::scoring::gaps::{BucketCoverage, bucket_gap, hinted_gap, merge_system_wide, sort_gaps};
use crate::scoring::policy::{ScoreInputs, ScoringPolicy, WeightedPolicy};
use crate::store::Stores;

/// Upper bound on a single gap's suggestion when none is configured.
pub const DEFAULT_MAX_SUGGESTED: usize = 20;

/// Outcome of refreshing scores for one or more subjects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub subjects: usize,
    pub scored: usize,
    pub failed: usize,
}

impl RefreshSummary {
    fn absorb(&mut self, other: RefreshSummary) {
        self.subjects += other.subjects;
        self.scored += other.scored;
        self.failed += other.failed;
    }
}

pub struct ScoringEngine {
    config: ScoringConfig,
    max_suggested_per_gap: usize,
    policy: Arc<dyn ScoringPolicy>,
    stores: Stores,
    timings: Arc<TimingRecorder>,
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("policy", &self.policy.name())
            .field("max_suggested_per_gap", &self.max_suggested_per_gap)
            .finish_non_exhaustive()
    }
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig, stores: Stores) -> Self {
        let policy = Arc::new(WeightedPolicy::from_config(&config));
        Self {
            config,
            max_suggested_per_gap: DEFAULT_MAX_SUGGESTED,
            policy,
            stores,
            timings: Arc::new(TimingRecorder::new()),
        }
    }

    /// Swap the score formula.
    pub fn with_policy(mut self, policy: Arc<dyn ScoringPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timings(mut self, timings: Arc<TimingRecorder>) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_max_suggested(mut self, max: usize) -> Self {
        self.max_suggested_per_gap = max.max(1);
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn timings(&self) -> Arc<TimingRecorder> {
        self.timings.clone()
    }

    /// Stored preferences, sanitized; defaults when absent or unreadable.
    pub fn preferences_for(&self, subject_id: SubjectId) -> LearningPreferences {
        match self.stores.preferences.preferences(subject_id) {
            Ok(Some(prefs)) => prefs.sanitized(),
            Ok(None) => LearningPreferences::default(),
            Err(e) => {
                tracing::warn!(subject = %subject_id, error = %e, "Failed to read preferences, using defaults");
                LearningPreferences::default()
            }
        }
    }

    fn history_for(&self, subject_id: SubjectId, item: &Item) -> PerformanceHistory {
        match self.stores.performance.performance_history(subject_id, item.id) {
            Ok(history) => history.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(subject = %subject_id, item = %item.id, error = %e, "Failed to read history, treating as never seen");
                PerformanceHistory::never_seen()
            }
        }
    }

    /// Topics with enough attempts and low accuracy, weakest first.
    pub fn weak_topics(&self, subject_id: SubjectId) -> Vec<String> {
        let topics = match self.stores.performance.topic_performance(subject_id) {
            Ok(topics) => topics,
            Err(e) => {
                tracing::warn!(subject = %subject_id, error = %e, "Failed to read topic performance");
                return Vec::new();
            }
        };
        let mut weak: Vec<_> = topics
            .into_iter()
            .filter(|t| t.attempts >= self.config.weak_min_attempts && t.accuracy() < self.config.weak_accuracy_threshold)
            .collect();
        weak.sort_by(|a, b| {
            a.accuracy()
                .partial_cmp(&b.accuracy())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        weak.into_iter()
            .take(self.config.weak_topic_limit)
            .map(|t| t.topic)
            .collect()
    }

    /// Compute, store and return the score for `item` as of now.
    pub fn compute_score(&self, subject_id: SubjectId, item: &Item) -> Result<f64> {
        self.compute_score_at(subject_id, item, Utc::now())
    }

    /// Compute, store and return the score for `item` as of `now`.
    pub fn compute_score_at(&self, subject_id: SubjectId, item: &Item, now: DateTime<Utc>) -> Result<f64> {
        let prefs = self.preferences_for(subject_id);
        let weak: HashSet<String> = self.weak_topics(subject_id).into_iter().collect();
        self.score_with(subject_id, item, &prefs, &weak, now)
    }

    fn score_with(
        &self,
        subject_id: SubjectId,
        item: &Item,
        prefs: &LearningPreferences,
        weak: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let started = Instant::now();
        let history = self.history_for(subject_id, item);
        let in_weak_topic = item.topic.as_ref().is_some_and(|t| weak.contains(t));
        let score = self.policy.score(&ScoreInputs {
            history: &history,
            preferences: prefs,
            in_weak_topic,
            now,
        });

        self.stores.scores.upsert_score(&PriorityScore {
            subject_id,
            item_id: item.id,
            score,
            last_calculated_at: now,
        })?;
        self.timings.record_calculation(started.elapsed());
        Ok(score)
    }

    /// Rescore every item in the subject's buckets.
    pub fn refresh_subject(&self, profile: &SubjectProfile) -> RefreshSummary {
        self.refresh_subject_at(profile, Utc::now())
    }

    pub fn refresh_subject_at(&self, profile: &SubjectProfile, now: DateTime<Utc>) -> RefreshSummary {
        let subject_id = profile.subject_id;
        let prefs = self.preferences_for(subject_id);
        let weak: HashSet<String> = self.weak_topics(subject_id).into_iter().collect();
        let mut summary = RefreshSummary {
            subjects: 1,
            ..Default::default()
        };

        for key in profile.buckets(&self.config.item_kinds) {
            let items = match self.stores.catalog.items_in_bucket(subject_id, &key) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(subject = %subject_id, bucket = %key, error = %e, "Failed to list bucket items");
                    continue;
                }
            };
            for item in &items {
                match self.score_with(subject_id, item, &prefs, &weak, now) {
                    Ok(_) => summary.scored += 1,
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(subject = %subject_id, item = %item.id, error = %e, "Failed to store score");
                    }
                }
            }
        }

        tracing::debug!(
            subject = %subject_id,
            scored = summary.scored,
            failed = summary.failed,
            "Refreshed subject scores"
        );
        summary
    }

    /// Refresh subjects in parallel. One subject failing never fails the batch.
    pub async fn refresh_subjects(self: &Arc<Self>, profiles: &[SubjectProfile]) -> RefreshSummary {
        let tasks = profiles.iter().cloned().map(|profile| {
            let engine = Arc::clone(self);
            tokio::task::spawn_blocking(move || engine.refresh_subject(&profile))
        });

        let mut total = RefreshSummary::default();
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok(summary) => total.absorb(summary),
                Err(e) => {
                    total.subjects += 1;
                    total.failed += 1;
                    tracing::error!(error = %e, "Score refresh task panicked");
                }
            }
        }
        total
    }

    /// Item counts per bucket for one subject. A bucket that can't be read
    /// is left out rather than reported as empty.
    pub fn bucket_coverage(&self, profile: &SubjectProfile) -> Vec<BucketCoverage> {
        let subject_id = profile.subject_id;
        profile
            .buckets(&self.config.item_kinds)
            .into_iter()
            .filter_map(|key| match self.stores.catalog.items_in_bucket(subject_id, &key) {
                Ok(items) => {
                    let fresh = items
                        .iter()
                        .filter(|item| self.history_for(subject_id, item).is_fresh())
                        .count();
                    Some(BucketCoverage {
                        key,
                        total: items.len(),
                        fresh,
                    })
                }
                Err(e) => {
                    tracing::warn!(subject = %subject_id, bucket = %key, error = %e, "Failed to read bucket");
                    None
                }
            })
            .collect()
    }

    /// Buckets with an unexpired generation hint.
    pub fn hinted_buckets(&self, subject_id: SubjectId, now: DateTime<Utc>) -> BTreeSet<TopicKey> {
        match self.stores.hints.active_hints(subject_id, now) {
            Ok(hints) => hints.into_iter().map(|h| h.key).collect(),
            Err(e) => {
                tracing::warn!(subject = %subject_id, error = %e, "Failed to read generation hints");
                BTreeSet::new()
            }
        }
    }

    /// Gaps for one subject, hinted buckets first, then most severe.
    pub fn subject_gaps(&self, profile: &SubjectProfile) -> Vec<TopicGap> {
        self.subject_gaps_at(profile, Utc::now())
    }

    pub fn subject_gaps_at(&self, profile: &SubjectProfile, now: DateTime<Utc>) -> Vec<TopicGap> {
        let subject_id = profile.subject_id;
        let prefs = self.preferences_for(subject_id);
        let hinted = self.hinted_buckets(subject_id, now);
        let focus_topics = if prefs.focus_on_weak_areas {
            self.weak_topics(subject_id)
        } else {
            Vec::new()
        };

        let cap = self.max_suggested_per_gap;
        let target = prefs.fresh_question_ratio;
        let mut gaps: Vec<TopicGap> = self
            .bucket_coverage(profile)
            .iter()
            .filter_map(|coverage| {
                if hinted.contains(&coverage.key) {
                    Some(hinted_gap(profile, coverage, target, cap))
                } else {
                    bucket_gap(profile, coverage, target, cap)
                }
            })
            .map(|gap| TopicGap {
                focus_topics: focus_topics.clone(),
                ..gap
            })
            .collect();
        sort_gaps(&mut gaps);
        gaps
    }

    /// Gap analysis for one subject, or system-wide when `subject_id` is `None`.
    pub fn gap_analysis(&self, subject_id: Option<SubjectId>) -> Result<Vec<TopicGap>> {
        match subject_id {
            Some(id) => {
                let profile = self
                    .stores
                    .catalog
                    .subject_profile(id)?
                    .ok_or_else(|| DrillrError::NotFound(format!("subject {}", id)))?;
                Ok(self.subject_gaps(&profile))
            }
            None => {
                let subjects = self.stores.catalog.active_subjects()?;
                let gaps = subjects.iter().flat_map(|p| self.subject_gaps(p)).collect();
                Ok(merge_system_wide(gaps))
            }
        }
    }

    /// Bucket stored scores for one subject, or all subjects.
    pub fn distribution(&self, subject_id: Option<SubjectId>) -> Result<ScoreDistribution> {
        let scores = match subject_id {
            Some(id) => self.stores.scores.scores_for_subject(id)?,
            None => self.stores.scores.all_scores()?,
        };
        let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
        Ok(bucket_scores(&values, &self.config.distribution))
    }
}
