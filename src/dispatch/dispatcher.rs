//! Bounded fan-out of backend calls over a gap list.
//!
//! A permit is acquired before each call is spawned, so excess work waits on
//! the semaphore instead of piling up as queued tasks. Pause flags are checked
//! after the permit is granted, immediately before the call.
//!
//! A successful call for a hinted gap clears the hint. Retryable failures
//! back the subject off exponentially; rejected requests back it off for the
//! full cap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::backend::{GenerationOutcome, GenerationSpec, GenerativeBackend};
use crate::config::DispatchConfig;
use crate::dispatch::backoff::SubjectBackoff;
use crate::dispatch::pause::PauseGate;
use crate::dispatch::rate_limit::ProviderLimits;
use crate::domain::{SubjectId, TopicGap, TopicKey};
use crate::store::{GenerationHintStore, ItemSink};

/// Error messages kept per dispatch.
const MAX_ERRORS: usize = 20;

/// Counters for one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub calls_attempted: usize,
    pub calls_succeeded: usize,
    pub calls_failed: usize,
    pub calls_rate_limited: usize,
    pub calls_abandoned: usize,
    pub items_requested: usize,
    pub items_generated: usize,
    pub gaps_skipped_paused: usize,
    pub gaps_skipped_backoff: usize,
    pub rate_limited: bool,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl DispatchResult {
    fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(message);
        }
    }
}

#[derive(Debug)]
enum CallResult {
    Saved {
        subject_id: SubjectId,
        provider: String,
        saved: usize,
        key: TopicKey,
        hinted: bool,
    },
    SaveFailed {
        subject_id: SubjectId,
        reason: String,
    },
    Failed {
        subject_id: SubjectId,
        reason: String,
        retryable: bool,
    },
    RateLimited {
        provider: String,
        retry_after: Duration,
    },
}

pub struct Dispatcher {
    config: DispatchConfig,
    backend: Arc<dyn GenerativeBackend>,
    sink: Arc<dyn ItemSink>,
    hints: Option<Arc<dyn GenerationHintStore>>,
    gate: PauseGate,
    semaphore: Arc<Semaphore>,
    limits: Arc<Mutex<ProviderLimits>>,
    backoff: Arc<Mutex<SubjectBackoff>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_concurrent_calls", &self.config.max_concurrent_calls)
            .field("available_permits", &self.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        backend: Arc<dyn GenerativeBackend>,
        sink: Arc<dyn ItemSink>,
        gate: PauseGate,
    ) -> Self {
        let max_backoff = Duration::from_secs(config.subject_backoff_max_secs);
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls.max(1))),
            limits: Arc::new(Mutex::new(ProviderLimits::new(max_backoff))),
            backoff: Arc::new(Mutex::new(SubjectBackoff::new(max_backoff))),
            config,
            backend,
            sink,
            hints: None,
            gate,
        }
    }

    /// Clear generation hints once their bucket has been filled.
    pub fn with_hints(mut self, hints: Arc<dyn GenerationHintStore>) -> Self {
        self.hints = Some(hints);
        self
    }

    fn limits(&self) -> MutexGuard<'_, ProviderLimits> {
        self.limits.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn backoff(&self) -> MutexGuard<'_, SubjectBackoff> {
        self.backoff.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn gate(&self) -> &PauseGate {
        &self.gate
    }

    /// Configured override first, then the backend's own limit.
    pub fn batch_size(&self, provider: &str) -> usize {
        self.config
            .provider_batch_sizes
            .get(provider)
            .copied()
            .unwrap_or_else(|| self.backend.batch_size(provider))
            .max(1)
    }

    pub fn provider_for(&self, gap: &TopicGap) -> String {
        gap.provider.clone().unwrap_or_else(|| self.config.default_provider.clone())
    }

    pub fn is_provider_limited(&self, provider: &str) -> bool {
        self.limits().is_rate_limited(provider)
    }

    pub fn limited_providers(&self) -> Vec<String> {
        self.limits().limited_providers()
    }

    pub fn is_subject_backing_off(&self, subject_id: SubjectId) -> bool {
        self.backoff().is_backing_off(subject_id)
    }

    /// Request items for `gaps` in the given order.
    ///
    /// A rate-limited response stops further calls for this dispatch; calls
    /// already in flight drain. Cancellation abandons in-flight calls.
    pub async fn dispatch(&self, gaps: &[TopicGap], cancel: &CancellationToken) -> DispatchResult {
        let mut result = DispatchResult::default();
        let halted = Arc::new(AtomicBool::new(false));
        let mut tasks: JoinSet<CallResult> = JoinSet::new();
        let call_timeout = Duration::from_millis(self.config.call_timeout_ms);

        'gaps: for gap in gaps {
            if halted.load(Ordering::SeqCst) {
                break;
            }
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let Some(subject_id) = gap.subject_id else {
                tracing::debug!(bucket = %gap.key, "Skipping gap without a subject");
                continue;
            };
            let provider = self.provider_for(gap);
            if self.is_provider_limited(&provider) {
                result.gaps_skipped_backoff += 1;
                continue;
            }
            if self.is_subject_backing_off(subject_id) {
                let remaining = self.backoff().remaining(subject_id);
                tracing::debug!(subject = %subject_id, remaining_secs = remaining.as_secs(), "Skipping gap, subject backing off");
                result.gaps_skipped_backoff += 1;
                continue;
            }

            let batch = self.batch_size(&provider);
            let mut remaining = gap.suggested_count;
            while remaining > 0 {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        result.cancelled = true;
                        break 'gaps;
                    }
                    permit = self.semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'gaps,
                    },
                };

                while let Some(joined) = tasks.try_join_next() {
                    self.absorb(joined, &mut result);
                }
                if halted.load(Ordering::SeqCst) {
                    break 'gaps;
                }
                if let Some(scope) = self.gate.call_pause(subject_id) {
                    tracing::info!(subject = %subject_id, bucket = %gap.key, %scope, "Skipping paused gap");
                    result.gaps_skipped_paused += 1;
                    continue 'gaps;
                }

                let count = remaining.min(batch);
                remaining -= count;
                result.calls_attempted += 1;
                result.items_requested += count;

                let backend = self.backend.clone();
                let sink = self.sink.clone();
                let halted = halted.clone();
                let provider = provider.clone();
                let hinted = gap.hinted;
                let spec = GenerationSpec {
                    subject_id,
                    key: gap.key.clone(),
                    focus_topics: gap.focus_topics.clone(),
                };
                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome =
                        match tokio::time::timeout(call_timeout, backend.generate_items(&provider, count, &spec)).await {
                            Ok(outcome) => outcome,
                            Err(_) => GenerationOutcome::transient(format!(
                                "call timed out after {}ms",
                                call_timeout.as_millis()
                            )),
                        };
                    match outcome {
                        GenerationOutcome::Success(items) => match sink.save_generated_items(&items, subject_id) {
                            Ok(saved) => CallResult::Saved {
                                subject_id,
                                provider,
                                saved,
                                key: spec.key,
                                hinted,
                            },
                            Err(e) => CallResult::SaveFailed {
                                subject_id,
                                reason: e.to_string(),
                            },
                        },
                        GenerationOutcome::RateLimited { retry_after } => {
                            halted.store(true, Ordering::SeqCst);
                            CallResult::RateLimited { provider, retry_after }
                        }
                        GenerationOutcome::Failed { reason, retryable } => CallResult::Failed {
                            subject_id,
                            reason,
                            retryable,
                        },
                    }
                });
            }
        }

        if result.cancelled {
            tasks.abort_all();
        }
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !result.cancelled => {
                    result.cancelled = true;
                    tasks.abort_all();
                }
                joined = tasks.join_next() => match joined {
                    Some(joined) => self.absorb(joined, &mut result),
                    None => break,
                },
            }
        }

        tracing::info!(
            attempted = result.calls_attempted,
            succeeded = result.calls_succeeded,
            failed = result.calls_failed,
            generated = result.items_generated,
            skipped_paused = result.gaps_skipped_paused,
            rate_limited = result.rate_limited,
            cancelled = result.cancelled,
            "Dispatch finished"
        );
        result
    }

    fn absorb(&self, joined: std::result::Result<CallResult, JoinError>, result: &mut DispatchResult) {
        match joined {
            Ok(CallResult::Saved {
                subject_id,
                provider,
                saved,
                key,
                hinted,
            }) => {
                result.calls_succeeded += 1;
                result.items_generated += saved;
                self.backoff().record_success(subject_id);
                self.limits().record_success(&provider);
                if hinted && saved > 0 {
                    self.clear_hint(subject_id, &key);
                }
            }
            Ok(CallResult::SaveFailed { subject_id, reason }) => {
                result.calls_failed += 1;
                tracing::warn!(subject = %subject_id, error = %reason, "Failed to save generated items");
                result.push_error(format!("subject {}: save failed: {}", subject_id, reason));
            }
            Ok(CallResult::Failed {
                subject_id,
                reason,
                retryable,
            }) => {
                result.calls_failed += 1;
                let delay = if retryable {
                    self.backoff().record_failure(subject_id)
                } else {
                    self.backoff().record_rejection(subject_id)
                };
                tracing::warn!(
                    subject = %subject_id,
                    error = %reason,
                    retryable,
                    backoff_secs = delay.as_secs(),
                    "Generation call failed"
                );
                result.push_error(format!("subject {}: {}", subject_id, reason));
            }
            Ok(CallResult::RateLimited { provider, retry_after }) => {
                result.calls_rate_limited += 1;
                result.rate_limited = true;
                self.limits().record_rate_limit(&provider, retry_after);
                result.push_error(format!("provider {} rate limited", provider));
            }
            Err(e) if e.is_cancelled() => {
                result.calls_abandoned += 1;
            }
            Err(e) => {
                result.calls_failed += 1;
                tracing::error!(error = %e, "Generation task panicked");
                result.push_error(format!("task failed: {}", e));
            }
        }
    }

    fn clear_hint(&self, subject_id: SubjectId, key: &TopicKey) {
        let Some(hints) = &self.hints else {
            return;
        };
        match hints.clear_hint(subject_id, key) {
            Ok(()) => tracing::debug!(subject = %subject_id, bucket = %key, "Cleared generation hint"),
            Err(e) => tracing::warn!(subject = %subject_id, bucket = %key, error = %e, "Failed to clear generation hint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockBehavior};
    use crate::domain::{ItemKind, SubjectProfile, TopicKey};
    use crate::scoring::gaps::{BucketCoverage, bucket_gap, hinted_gap};
    use crate::store::{GenerationHintStore, SettingsStore, SqliteStore};

    fn gap(subject: i64, suggested_total: usize) -> TopicGap {
        let profile = SubjectProfile::new(SubjectId(subject), "it", "A1");
        let mut gap = bucket_gap(
            &profile,
            &BucketCoverage {
                key: TopicKey::new("it", "A1", ItemKind::Vocabulary),
                total: 0,
                fresh: 0,
            },
            0.3,
            20,
        )
        .unwrap();
        gap.suggested_count = suggested_total;
        gap
    }

    fn dispatcher(store: &Arc<SqliteStore>, backend: Arc<MockBackend>, max_concurrent: usize) -> Dispatcher {
        let config = DispatchConfig {
            max_concurrent_calls: max_concurrent,
            ..Default::default()
        };
        let gate = PauseGate::new("w1", store.clone(), store.clone());
        Dispatcher::new(config, backend, store.clone(), gate)
    }

    #[tokio::test]
    async fn test_large_gap_splits_into_batches() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::new().with_batch_size(3));
        let dispatcher = dispatcher(&store, backend.clone(), 4);

        let result = dispatcher.dispatch(&[gap(1, 7)], &CancellationToken::new()).await;
        assert_eq!(result.calls_attempted, 3);
        assert_eq!(result.calls_succeeded, 3);
        assert_eq!(result.items_generated, 7);
        let mut counts: Vec<usize> = backend.calls().iter().map(|c| c.count).collect();
        counts.sort();
        assert_eq!(counts, vec![1, 3, 3]);
        assert_eq!(store.count_items_for(SubjectId(1)).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_config_batch_override_wins() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::new().with_batch_size(3));
        let mut config = DispatchConfig::default();
        config.provider_batch_sizes.insert("default".to_string(), 5);
        let gate = PauseGate::new("w1", store.clone(), store.clone());
        let dispatcher = Dispatcher::new(config, backend, store.clone(), gate);
        assert_eq!(dispatcher.batch_size("default"), 5);
        assert_eq!(dispatcher.batch_size("other"), 3);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(
            MockBackend::new()
                .with_batch_size(1)
                .with_delay(Duration::from_millis(20)),
        );
        let dispatcher = dispatcher(&store, backend.clone(), 2);
        let gaps: Vec<TopicGap> = (1..=4).map(|s| gap(s, 3)).collect();

        let result = dispatcher.dispatch(&gaps, &CancellationToken::new()).await;
        assert_eq!(result.calls_succeeded, 12);
        assert!(backend.max_in_flight() <= 2);
        assert!(backend.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_subject_pause_skips_only_that_subject() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.set_flag("pause_2", true).unwrap();
        let backend = Arc::new(MockBackend::new());
        let dispatcher = dispatcher(&store, backend.clone(), 2);

        let result = dispatcher.dispatch(&[gap(1, 2), gap(2, 2)], &CancellationToken::new()).await;
        assert_eq!(result.gaps_skipped_paused, 1);
        assert_eq!(backend.calls_for(SubjectId(1)), 1);
        assert_eq!(backend.calls_for(SubjectId(2)), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_halts_dispatch() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(
            MockBackend::new()
                .with_batch_size(1)
                .with_fallback(MockBehavior::RateLimit(Duration::from_secs(30))),
        );
        let dispatcher = dispatcher(&store, backend.clone(), 1);

        let result = dispatcher.dispatch(&[gap(1, 3), gap(2, 3)], &CancellationToken::new()).await;
        assert!(result.rate_limited);
        assert_eq!(backend.call_count(), 1);
        assert!(dispatcher.is_provider_limited("default"));

        // The next dispatch skips the limited provider entirely.
        let again = dispatcher.dispatch(&[gap(3, 1)], &CancellationToken::new()).await;
        assert_eq!(again.calls_attempted, 0);
        assert_eq!(again.gaps_skipped_backoff, 1);
    }

    #[tokio::test]
    async fn test_failure_counts_and_backs_off_subject() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::new().with_fallback(MockBehavior::Fail("upstream 500".to_string())));
        let dispatcher = dispatcher(&store, backend.clone(), 2);

        let result = dispatcher.dispatch(&[gap(1, 1)], &CancellationToken::new()).await;
        assert_eq!(result.calls_failed, 1);
        assert_eq!(result.items_generated, 0);
        assert!(result.errors[0].contains("upstream 500"));
        assert!(dispatcher.is_subject_backing_off(SubjectId(1)));
        assert_eq!(dispatcher.backoff().failures(SubjectId(1)), 1);
    }

    #[tokio::test]
    async fn test_rejected_request_backs_off_for_the_cap() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::new().with_script(vec![
            MockBehavior::Fail("upstream 500".to_string()),
            MockBehavior::Reject("unknown kind".to_string()),
        ]));
        let config = DispatchConfig {
            max_concurrent_calls: 1,
            subject_backoff_max_secs: 3600,
            ..Default::default()
        };
        let gate = PauseGate::new("w1", store.clone(), store.clone());
        let dispatcher = Dispatcher::new(config, backend, store.clone(), gate);

        let result = dispatcher.dispatch(&[gap(1, 1), gap(2, 1)], &CancellationToken::new()).await;
        assert_eq!(result.calls_failed, 2);

        // Retryable: first step of the exponential schedule
        assert!(dispatcher.backoff().remaining(SubjectId(1)) <= Duration::from_secs(2));
        // Rejected: straight to the cap
        assert!(dispatcher.backoff().remaining(SubjectId(2)) > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn test_focus_topics_reach_the_backend() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::new());
        let dispatcher = dispatcher(&store, backend.clone(), 1);
        let mut focused = gap(1, 1);
        focused.focus_topics = vec!["verbs".to_string(), "food".to_string()];

        let result = dispatcher.dispatch(&[focused], &CancellationToken::new()).await;
        assert_eq!(result.items_generated, 1);
        let calls = backend.calls();
        assert_eq!(calls[0].spec.focus_topics, vec!["verbs".to_string(), "food".to_string()]);
        assert_eq!(calls[0].spec.primary_topic().as_deref(), Some("verbs"));
    }

    #[tokio::test]
    async fn test_success_clears_hint_and_failure_keeps_it() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let key = TopicKey::new("it", "A1", ItemKind::Vocabulary);
        let expires = chrono::Utc::now() + chrono::Duration::hours(1);
        store.upsert_hint(SubjectId(1), &key, expires).unwrap();
        store.upsert_hint(SubjectId(2), &key, expires).unwrap();

        // One call per gap, in order: subject 1 succeeds, subject 2 fails
        let backend = Arc::new(MockBackend::new().with_batch_size(5).with_script(vec![
            MockBehavior::Succeed,
            MockBehavior::Fail("upstream 500".to_string()),
        ]));
        let config = DispatchConfig {
            max_concurrent_calls: 1,
            ..Default::default()
        };
        let gate = PauseGate::new("w1", store.clone(), store.clone());
        let dispatcher = Dispatcher::new(config, backend, store.clone(), gate).with_hints(store.clone());

        let full = BucketCoverage {
            key: key.clone(),
            total: 10,
            fresh: 10,
        };
        let gaps = vec![
            hinted_gap(&SubjectProfile::new(SubjectId(1), "it", "A1"), &full, 0.3, 20),
            hinted_gap(&SubjectProfile::new(SubjectId(2), "it", "A1"), &full, 0.3, 20),
        ];
        let result = dispatcher.dispatch(&gaps, &CancellationToken::new()).await;
        assert_eq!(result.items_generated, 5);

        let now = chrono::Utc::now();
        assert!(store.active_hints(SubjectId(1), now).unwrap().is_empty());
        assert_eq!(store.active_hints(SubjectId(2), now).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(200)));
        let config = DispatchConfig {
            call_timeout_ms: 10,
            ..Default::default()
        };
        let gate = PauseGate::new("w1", store.clone(), store.clone());
        let dispatcher = Dispatcher::new(config, backend, store.clone(), gate);

        let result = dispatcher.dispatch(&[gap(1, 1)], &CancellationToken::new()).await;
        assert_eq!(result.calls_failed, 1);
        assert!(result.errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::new());
        let dispatcher = dispatcher(&store, backend.clone(), 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = dispatcher.dispatch(&[gap(1, 3)], &cancel).await;
        assert!(result.cancelled);
        assert_eq!(backend.call_count(), 0);
    }
}
