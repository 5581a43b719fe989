//! Read-side views over stored scores, performance, preferences, worker
//! status and run history. Every view tolerates missing data by returning
//! zeroed structures.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};

use super::report::{
    BackgroundJobs, GenerationSuggestion, HighPriorityItem, PerformanceMetrics, PreferencesUsage, ScoreSummary,
    SystemHealth, UserPerformanceSummary, WeakArea, WorkerHealth,
};
use super::timing::TimingRecorder;
use crate::domain::{
    GenerationRun, ItemId, LearningPreferences, PriorityScore, RunOutcome, SubjectId, TopicKey, TopicPerformance,
};
use crate::error::Result;
use crate::scoring::{ScoringEngine, resolve_cuts};
use crate::store::Stores;

/// Window for "recent" score activity.
const RECENT_WINDOW_SECS: i64 = 3600;
/// Buckets with fewer items than this are suggested for generation.
const SUGGEST_BELOW_AVAILABLE: usize = 50;
/// Buckets with fewer high-priority items than this are suggested.
const SUGGEST_BELOW_HIGH_PRIORITY: usize = 10;
/// Weak areas shown per subject in summaries and comparisons.
const SUMMARY_WEAK_AREAS: usize = 3;
const SUMMARY_HIGH_PRIORITY: usize = 10;
const DEFAULT_STALE_AFTER_SECS: u64 = 3600;

pub struct Analytics {
    engine: Arc<ScoringEngine>,
    stores: Stores,
    timings: Arc<TimingRecorder>,
    healthy_heartbeat_secs: u64,
    stale_after_secs: u64,
}

impl std::fmt::Debug for Analytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analytics")
            .field("healthy_heartbeat_secs", &self.healthy_heartbeat_secs)
            .field("stale_after_secs", &self.stale_after_secs)
            .finish_non_exhaustive()
    }
}

impl Analytics {
    /// Shares the engine's timing recorder.
    pub fn new(engine: Arc<ScoringEngine>, stores: Stores, healthy_heartbeat_secs: u64) -> Self {
        let timings = engine.timings();
        Self {
            engine,
            stores,
            timings,
            healthy_heartbeat_secs,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }

    /// Report background jobs as stale when no run finished within `secs`.
    pub fn with_stale_after(mut self, secs: u64) -> Self {
        self.stale_after_secs = secs;
        self
    }

    fn timed<T>(&self, query: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let result = query();
        self.timings.record_query(started.elapsed());
        result
    }

    /// Distribution, weak areas and top items for one subject.
    pub fn user_performance_summary(&self, subject_id: SubjectId) -> Result<UserPerformanceSummary> {
        let distribution = self.engine.distribution(Some(subject_id))?;
        let weak_areas = self.weak_areas(Some(subject_id), SUMMARY_WEAK_AREAS)?;
        let high_priority_items = self.high_priority_items(SUMMARY_HIGH_PRIORITY, Some(subject_id))?;
        let last_calculated = self.timed(|| {
            let scores = self.stores.scores.scores_for_subject(subject_id)?;
            Ok(scores.iter().map(|s| s.last_calculated_at).max())
        })?;
        Ok(UserPerformanceSummary {
            subject_id,
            distribution,
            weak_areas,
            high_priority_items,
            last_calculated,
        })
    }

    pub fn system_health(&self) -> Result<SystemHealth> {
        self.system_health_at(Utc::now())
    }

    pub fn system_health_at(&self, now: DateTime<Utc>) -> Result<SystemHealth> {
        let (recent, last_update) = self.timed(|| {
            let scores = self.stores.scores.all_scores()?;
            let since = now - Duration::seconds(RECENT_WINDOW_SECS);
            let last_update = scores.iter().map(|s| s.last_calculated_at).max();
            let recent: Vec<PriorityScore> = scores.into_iter().filter(|s| s.last_calculated_at > since).collect();
            Ok((recent, last_update))
        })?;
        let queue_size = self.timed(|| {
            let fresh: BTreeSet<SubjectId> = recent.iter().map(|s| s.subject_id).collect();
            let subjects = self.stores.catalog.active_subjects()?;
            Ok(subjects.iter().filter(|p| !fresh.contains(&p.subject_id)).count())
        })?;
        let latest_run = self.timed(|| Ok(self.stores.runs.latest_runs(1)?.into_iter().next()))?;
        let workers = self.worker_health_at(now)?;

        let timing = self.timings.snapshot();
        let avg_score = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|s| s.score).sum::<f64>() / recent.len() as f64
        };
        let performance = PerformanceMetrics {
            calculations_per_second: timing.calculations_last_hour as f64 / RECENT_WINDOW_SECS as f64,
            avg_calculation_time_ms: timing.avg_calculation_ms,
            avg_query_time_ms: timing.avg_query_ms,
            avg_score,
            last_calculation: timing.last_calculation.or(last_update),
        };
        let background_jobs = BackgroundJobs {
            priority_updates: recent.len(),
            queue_size,
            last_update: latest_run.as_ref().map(|r| r.finished_at).or(last_update),
            last_run_outcome: latest_run.as_ref().map(|r| r.outcome),
            status: self.jobs_status(latest_run.as_ref(), now).to_string(),
        };
        Ok(SystemHealth {
            performance,
            background_jobs,
            workers,
        })
    }

    fn jobs_status(&self, latest_run: Option<&GenerationRun>, now: DateTime<Utc>) -> &'static str {
        let Some(run) = latest_run else {
            return "idle";
        };
        if run.finished_at < now - Duration::seconds(self.stale_after_secs as i64) {
            "stale"
        } else if run.outcome == RunOutcome::Failure {
            "degraded"
        } else {
            "healthy"
        }
    }

    /// Distribution and weakest topics per subject, in the order given.
    pub fn comparison(&self, subject_ids: &[SubjectId]) -> Result<Vec<ScoreSummary>> {
        subject_ids
            .iter()
            .map(|&subject_id| {
                Ok(ScoreSummary {
                    subject_id,
                    distribution: self.engine.distribution(Some(subject_id))?,
                    weak_areas: self.weak_areas(Some(subject_id), SUMMARY_WEAK_AREAS)?,
                })
            })
            .collect()
    }

    /// Highest-band scores joined with their items, highest first.
    pub fn high_priority_items(&self, limit: usize, subject_id: Option<SubjectId>) -> Result<Vec<HighPriorityItem>> {
        self.timed(|| {
            let scores = match subject_id {
                Some(id) => self.stores.scores.scores_for_subject(id)?,
                None => self.stores.scores.all_scores()?,
            };
            let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
            let cuts = resolve_cuts(&values, &self.engine.config().distribution);

            let mut high: Vec<PriorityScore> = scores.into_iter().filter(|s| s.score > cuts.high_above).collect();
            high.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

            let mut items = Vec::new();
            for score in high {
                if items.len() >= limit {
                    break;
                }
                let Some(item) = self.stores.catalog.item(score.item_id)? else {
                    continue;
                };
                items.push(HighPriorityItem {
                    subject_id: score.subject_id,
                    item_id: score.item_id,
                    language: item.language,
                    level: item.level,
                    kind: item.kind,
                    topic: item.topic,
                    score: score.score,
                });
            }
            Ok(items)
        })
    }

    /// Topics with attempts, lowest accuracy first. Without a subject the
    /// topics of every active subject are summed.
    pub fn weak_areas(&self, subject_id: Option<SubjectId>, limit: usize) -> Result<Vec<WeakArea>> {
        self.timed(|| {
            let topics = match subject_id {
                Some(id) => self.stores.performance.topic_performance(id)?,
                None => {
                    let mut merged: BTreeMap<String, TopicPerformance> = BTreeMap::new();
                    for profile in self.stores.catalog.active_subjects()? {
                        for topic in self.stores.performance.topic_performance(profile.subject_id)? {
                            let entry = merged.entry(topic.topic.clone()).or_insert_with(|| TopicPerformance {
                                topic: topic.topic.clone(),
                                attempts: 0,
                                correct: 0,
                            });
                            entry.attempts += topic.attempts;
                            entry.correct += topic.correct;
                        }
                    }
                    merged.into_values().collect()
                }
            };
            let mut areas: Vec<WeakArea> = topics
                .into_iter()
                .filter(|t| t.attempts > 0)
                .map(|t| WeakArea {
                    accuracy: t.accuracy(),
                    topic: t.topic,
                    total_attempts: t.attempts,
                    correct_attempts: t.correct,
                })
                .collect();
            areas.sort_by(|a, b| {
                a.accuracy
                    .partial_cmp(&b.accuracy)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.topic.cmp(&b.topic))
            });
            areas.truncate(limit);
            Ok(areas)
        })
    }

    /// Buckets of active subjects that are short on items or on
    /// high-priority items; fewest items first.
    pub fn generation_suggestions(&self) -> Result<Vec<GenerationSuggestion>> {
        self.timed(|| {
            let subjects = self.stores.catalog.active_subjects()?;
            let scores = self.stores.scores.all_scores()?;
            let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
            let cuts = resolve_cuts(&values, &self.engine.config().distribution);
            let mut by_item: HashMap<ItemId, Vec<f64>> = HashMap::new();
            for score in &scores {
                by_item.entry(score.item_id).or_default().push(score.score);
            }

            let mut buckets: BTreeMap<TopicKey, BTreeSet<ItemId>> = BTreeMap::new();
            for profile in &subjects {
                for key in profile.buckets(&self.engine.config().item_kinds) {
                    let items = self.stores.catalog.items_in_bucket(profile.subject_id, &key)?;
                    buckets.entry(key).or_default().extend(items.iter().map(|i| i.id));
                }
            }

            let mut suggestions: Vec<GenerationSuggestion> = buckets
                .into_iter()
                .filter_map(|(key, items)| {
                    let bucket_scores: Vec<f64> = items
                        .iter()
                        .filter_map(|id| by_item.get(id))
                        .flatten()
                        .copied()
                        .collect();
                    let high_priority = bucket_scores.iter().filter(|&&s| s > cuts.low_below).count();
                    if items.len() >= SUGGEST_BELOW_AVAILABLE && high_priority >= SUGGEST_BELOW_HIGH_PRIORITY {
                        return None;
                    }
                    let avg_priority = if bucket_scores.is_empty() {
                        0.0
                    } else {
                        bucket_scores.iter().sum::<f64>() / bucket_scores.len() as f64
                    };
                    Some(GenerationSuggestion {
                        language: key.language,
                        level: key.level,
                        kind: key.kind,
                        available: items.len(),
                        high_priority,
                        avg_priority,
                    })
                })
                .collect();
            suggestions.sort_by(|a, b| {
                a.available.cmp(&b.available).then_with(|| {
                    b.avg_priority
                        .partial_cmp(&a.avg_priority)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            });
            Ok(suggestions)
        })
    }

    /// Averages over stored preferences; defaults when none are stored.
    pub fn learning_preferences_usage(&self) -> Result<PreferencesUsage> {
        self.timed(|| {
            let all = self.stores.preferences.all_preferences()?;
            let defaults = LearningPreferences::default();
            if all.is_empty() {
                return Ok(PreferencesUsage {
                    total_subjects: 0,
                    focus_on_weak_areas: false,
                    fresh_question_ratio: defaults.fresh_question_ratio,
                    known_item_penalty: defaults.known_item_penalty,
                    weak_area_boost: defaults.weak_area_boost,
                    review_interval_days: defaults.review_interval_days as f64,
                });
            }
            let n = all.len() as f64;
            let mean = |f: fn(&LearningPreferences) -> f64| all.iter().map(|(_, p)| f(p)).sum::<f64>() / n;
            let focused = all.iter().filter(|(_, p)| p.focus_on_weak_areas).count();
            Ok(PreferencesUsage {
                total_subjects: all.len(),
                focus_on_weak_areas: focused as f64 / n > 0.5,
                fresh_question_ratio: mean(|p| p.fresh_question_ratio),
                known_item_penalty: mean(|p| p.known_item_penalty),
                weak_area_boost: mean(|p| p.weak_area_boost),
                review_interval_days: mean(|p| p.review_interval_days as f64),
            })
        })
    }

    pub fn worker_health(&self) -> Result<Vec<WorkerHealth>> {
        self.worker_health_at(Utc::now())
    }

    fn worker_health_at(&self, now: DateTime<Utc>) -> Result<Vec<WorkerHealth>> {
        self.timed(|| {
            let statuses = self.stores.workers.list_worker_statuses()?;
            Ok(statuses
                .into_iter()
                .map(|s| WorkerHealth {
                    healthy: s.is_healthy(now, self.healthy_heartbeat_secs),
                    instance_id: s.instance_id,
                    is_running: s.is_running,
                    is_paused: s.is_paused,
                    current_activity: s.current_activity,
                    last_heartbeat: s.last_heartbeat,
                    total_runs: s.total_runs,
                    total_items_generated: s.total_items_generated,
                    last_run_error: s.last_run_error,
                })
                .collect())
        })
    }
}
