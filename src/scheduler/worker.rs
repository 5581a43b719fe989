//! One scheduler instance and its pass logic.
//!
//! A pass: heartbeat, pause check, refresh scores for the next batch of
//! active subjects, compute their gaps, dispatch generation, then record the
//! run and update `WorkerStatus`.
//!
//! Passes on one instance are exclusive at two levels: an in-process mutex,
//! then a lease row in the store that every process sharing the database
//! honors. A trigger that finds either held gets `PassResult::Busy`. The
//! heartbeat renews the lease while a pass runs; an abandoned lease expires
//! after `pass_lease_secs`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::analytics::TimingRecorder;
use crate::backend::GenerativeBackend;
use crate::config::{Config, SchedulerConfig};
use crate::dispatch::{DispatchResult, Dispatcher, PauseGate, PauseScope};
use crate::domain::{
    GenerationHint, GenerationRun, ItemKind, RunOutcome, SubjectId, SubjectProfile, TopicGap, TopicKey, WorkerStatus,
    activity,
};
use crate::error::{DrillrError, Result};
use crate::id::{generate_lease_holder, generate_run_id, subject_pause_key};
use crate::scoring::{RefreshSummary, ScoringEngine, sort_gaps};
use crate::store::{GLOBAL_PAUSE_KEY, Stores, WorkerStatusStore};

/// What woke the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Interval,
    Manual,
}

/// Result of asking for a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PassResult {
    /// The pass ran and was recorded.
    Completed(GenerationRun),
    /// Another pass on this instance, in this process or another, is running.
    Busy,
    /// The worker is paused at this scope; nothing was recorded.
    Paused(PauseScope),
}

/// State owned by whoever holds the pass lock.
#[derive(Debug, Default)]
pub struct PassState {
    /// Round-robin position in the active subject list.
    pub cursor: usize,
    pub passes: u64,
}

impl PassState {
    /// Take the next `batch_size` subjects, wrapping around.
    pub fn next_batch(&mut self, subjects: &[SubjectProfile], batch_size: usize) -> Vec<SubjectProfile> {
        if subjects.is_empty() {
            self.cursor = 0;
            return Vec::new();
        }
        if subjects.len() <= batch_size {
            self.cursor = 0;
            return subjects.to_vec();
        }
        let start = self.cursor % subjects.len();
        let batch = subjects
            .iter()
            .cycle()
            .skip(start)
            .take(batch_size)
            .cloned()
            .collect();
        self.cursor = (start + batch_size) % subjects.len();
        batch
    }
}

pub struct SchedulerWorker {
    config: SchedulerConfig,
    engine: Arc<ScoringEngine>,
    dispatcher: Dispatcher,
    stores: Stores,
    gate: PauseGate,
    pass: tokio::sync::Mutex<PassState>,
    lease_holder: String,
}

/// Releases the pass lease when the pass ends, however it ends.
struct LeaseGuard<'a> {
    workers: &'a dyn WorkerStatusStore,
    instance_id: &'a str,
    holder: &'a str,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.workers.release_pass(self.instance_id, self.holder) {
            tracing::warn!(instance = %self.instance_id, error = %e, "Failed to release pass lease");
        }
    }
}

impl std::fmt::Debug for SchedulerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerWorker")
            .field("instance_id", &self.config.instance_id)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl SchedulerWorker {
    /// Wire engine, dispatcher and pause gate from a full config.
    pub fn new(config: &Config, stores: Stores, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self::with_timings(config, stores, backend, Arc::new(TimingRecorder::new()))
    }

    pub fn with_timings(
        config: &Config,
        stores: Stores,
        backend: Arc<dyn GenerativeBackend>,
        timings: Arc<TimingRecorder>,
    ) -> Self {
        let engine = Arc::new(
            ScoringEngine::new(config.scoring.clone(), stores.clone())
                .with_max_suggested(config.dispatch.max_suggested_per_gap)
                .with_timings(timings),
        );
        let gate = PauseGate::new(
            config.scheduler.instance_id.clone(),
            stores.settings.clone(),
            stores.workers.clone(),
        );
        let dispatcher =
            Dispatcher::new(config.dispatch.clone(), backend, stores.sink.clone(), gate).with_hints(stores.hints.clone());
        Self::from_parts(config.scheduler.clone(), engine, dispatcher, stores)
    }

    pub fn from_parts(config: SchedulerConfig, engine: Arc<ScoringEngine>, dispatcher: Dispatcher, stores: Stores) -> Self {
        let gate = dispatcher.gate().clone();
        Self {
            config,
            engine,
            dispatcher,
            stores,
            gate,
            pass: tokio::sync::Mutex::new(PassState::default()),
            lease_holder: generate_lease_holder(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<ScoringEngine> {
        self.engine.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// True while a pass in this process holds the instance lock.
    pub fn is_pass_running(&self) -> bool {
        self.pass.try_lock().is_err()
    }

    pub fn lease_holder(&self) -> &str {
        &self.lease_holder
    }

    /// Read-modify-write of this instance's status row, atomic in the store.
    fn update_status<F: FnOnce(&mut WorkerStatus)>(&self, apply: F) -> Result<WorkerStatus> {
        let mut apply = Some(apply);
        self.stores
            .workers
            .update_worker_status(&self.config.instance_id, &mut |status| {
                if let Some(apply) = apply.take() {
                    apply(status);
                }
            })
    }

    /// Take or renew the pass lease until `now + pass_lease_secs`.
    fn acquire_lease(&self, now: DateTime<Utc>) -> Result<bool> {
        let expires_at = now + chrono::Duration::seconds(self.config.pass_lease_secs as i64);
        self.stores
            .workers
            .try_acquire_pass(&self.config.instance_id, &self.lease_holder, now, expires_at)
    }

    /// Current status, or a fresh idle one if the row does not exist yet.
    pub fn status(&self) -> Result<WorkerStatus> {
        Ok(self
            .stores
            .workers
            .get_worker_status(&self.config.instance_id)?
            .unwrap_or_else(|| WorkerStatus::new(self.config.instance_id.clone())))
    }

    pub fn history(&self, limit: usize) -> Result<Vec<GenerationRun>> {
        self.stores.runs.recent_runs(&self.config.instance_id, limit)
    }

    pub fn heartbeat(&self) -> Result<()> {
        self.heartbeat_at(Utc::now())
    }

    /// Record liveness and keep a running pass's lease from expiring.
    pub fn heartbeat_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.stores.workers.heartbeat(&self.config.instance_id, at)?;
        if self.is_pass_running() {
            let expires_at = at + chrono::Duration::seconds(self.config.pass_lease_secs as i64);
            let renewed = self
                .stores
                .workers
                .renew_pass(&self.config.instance_id, &self.lease_holder, expires_at)?;
            if !renewed && self.is_pass_running() {
                tracing::warn!(instance = %self.config.instance_id, holder = %self.lease_holder, "Pass lease lost");
            }
        }
        Ok(())
    }

    pub fn mark_running(&self, running: bool) -> Result<WorkerStatus> {
        let now = Utc::now();
        self.update_status(|s| {
            s.is_running = running;
            s.last_heartbeat = Some(now);
            s.set_activity(if running { activity::STARTING } else { activity::STOPPED });
        })
    }

    pub fn set_instance_paused(&self, paused: bool) -> Result<WorkerStatus> {
        tracing::info!(instance = %self.config.instance_id, paused, "Instance pause changed");
        self.update_status(|s| {
            s.is_paused = paused;
            s.set_activity(if paused { activity::PAUSED } else { activity::IDLE });
        })
    }

    pub fn set_global_pause(&self, paused: bool) -> Result<()> {
        tracing::info!(paused, "Global pause changed");
        self.stores.settings.set_flag(GLOBAL_PAUSE_KEY, paused)
    }

    pub fn set_subject_pause(&self, subject_id: SubjectId, paused: bool) -> Result<()> {
        tracing::info!(subject = %subject_id, paused, "Subject pause changed");
        self.stores.settings.set_flag(&subject_pause_key(subject_id.0), paused)
    }

    /// Ask upcoming passes to fill one of a subject's buckets ahead of its
    /// turn. The hint lapses after `ttl` or once items are generated.
    pub fn hint_generation(&self, subject_id: SubjectId, kind: ItemKind, ttl: chrono::Duration) -> Result<GenerationHint> {
        let profile = self
            .stores
            .catalog
            .subject_profile(subject_id)?
            .ok_or_else(|| DrillrError::NotFound(format!("subject {}", subject_id)))?;
        let key = TopicKey::new(profile.language, profile.level, kind);
        let now = Utc::now();
        self.stores.hints.upsert_hint(subject_id, &key, now + ttl)?;
        tracing::info!(subject = %subject_id, bucket = %key, ttl_secs = ttl.num_seconds(), "Generation hint added");
        self.stores
            .hints
            .active_hints(subject_id, now)?
            .into_iter()
            .find(|hint| hint.key == key)
            .ok_or_else(|| DrillrError::NotFound(format!("hint for {}", key)))
    }

    /// Run one pass unless another is already running on this instance.
    ///
    /// Only a failure to reach the lease or write `WorkerStatus` is returned
    /// as an error; every other failure is folded into the recorded run.
    pub async fn run_pass(&self, trigger: RunTrigger, cancel: &CancellationToken) -> Result<PassResult> {
        let Ok(mut state) = self.pass.try_lock() else {
            tracing::debug!(instance = %self.config.instance_id, ?trigger, "Pass already running");
            return Ok(PassResult::Busy);
        };
        if !self.acquire_lease(Utc::now())? {
            tracing::info!(instance = %self.config.instance_id, ?trigger, "Pass lease held by another worker");
            return Ok(PassResult::Busy);
        }
        let _lease = LeaseGuard {
            workers: self.stores.workers.as_ref(),
            instance_id: &self.config.instance_id,
            holder: &self.lease_holder,
        };
        self.run_leased_pass(&mut state, trigger, cancel).await
    }

    async fn run_leased_pass(
        &self,
        state: &mut PassState,
        trigger: RunTrigger,
        cancel: &CancellationToken,
    ) -> Result<PassResult> {
        let started = Instant::now();
        let started_at = Utc::now();
        self.update_status(|s| {
            s.last_heartbeat = Some(started_at);
            s.set_activity(activity::CHECKING);
        })?;

        if let Some(scope) = self.gate.worker_pause() {
            tracing::info!(instance = %self.config.instance_id, %scope, "Worker paused, skipping pass");
            self.update_status(|s| s.set_activity(activity::PAUSED))?;
            return Ok(PassResult::Paused(scope));
        }

        state.passes += 1;
        self.update_status(|s| {
            s.last_run_start = Some(started_at);
            s.set_activity(activity::SCORING);
        })?;
        tracing::info!(instance = %self.config.instance_id, ?trigger, pass = state.passes, "Starting generation pass");

        let mut run = GenerationRun {
            run_id: generate_run_id(),
            instance_id: self.config.instance_id.clone(),
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            outcome: RunOutcome::Success,
            subjects_scored: 0,
            scores_updated: 0,
            gaps_found: 0,
            items_requested: 0,
            items_generated: 0,
            calls_attempted: 0,
            calls_succeeded: 0,
            calls_failed: 0,
            gaps_skipped_paused: 0,
            gaps_skipped_backoff: 0,
            rate_limited: false,
            details: Vec::new(),
        };

        let subjects = match self.stores.catalog.active_subjects() {
            Ok(subjects) => subjects,
            Err(e) => {
                let message = format!("failed to list active subjects: {}", e);
                return self.finish(run, RunOutcome::Failure, Some(message), started);
            }
        };
        let batch = state.next_batch(&subjects, self.config.subject_batch_size);
        if batch.is_empty() {
            run.details.push("no active subjects".to_string());
            return self.finish(run, RunOutcome::Skipped, None, started);
        }

        let refresh = self.engine.refresh_subjects(&batch).await;
        run.subjects_scored = refresh.subjects;
        run.scores_updated = refresh.scored;
        if refresh.failed > 0 {
            run.details.push(format!("{} score writes failed", refresh.failed));
        }
        if cancel.is_cancelled() {
            return self.finish(run, RunOutcome::Cancelled, None, started);
        }

        self.update_status(|s| s.set_activity(activity::ANALYZING))?;
        let gaps = match self.collect_gaps(batch).await {
            Ok(gaps) => gaps,
            Err(message) => return self.finish(run, RunOutcome::Failure, Some(message), started),
        };
        run.gaps_found = gaps.len();

        self.update_status(|s| s.set_activity(activity::GENERATING))?;
        let dispatch = self.dispatcher.dispatch(&gaps, cancel).await;
        run.items_requested = dispatch.items_requested;
        run.items_generated = dispatch.items_generated;
        run.calls_attempted = dispatch.calls_attempted;
        run.calls_succeeded = dispatch.calls_succeeded;
        run.calls_failed = dispatch.calls_failed + dispatch.calls_rate_limited;
        run.gaps_skipped_paused = dispatch.gaps_skipped_paused;
        run.gaps_skipped_backoff = dispatch.gaps_skipped_backoff;
        run.rate_limited = dispatch.rate_limited;
        if dispatch.calls_abandoned > 0 {
            run.details.push(format!("{} calls abandoned", dispatch.calls_abandoned));
        }
        run.details.extend(dispatch.errors.iter().cloned());

        let outcome = classify(&dispatch, &refresh);
        let error = match outcome {
            RunOutcome::Failure | RunOutcome::Partial => dispatch.errors.first().cloned(),
            _ => None,
        };
        self.finish(run, outcome, error, started)
    }

    async fn collect_gaps(&self, batch: Vec<SubjectProfile>) -> std::result::Result<Vec<TopicGap>, String> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut gaps: Vec<TopicGap> = batch.iter().flat_map(|p| engine.subject_gaps(p)).collect();
            sort_gaps(&mut gaps);
            gaps
        })
        .await
        .map_err(|e| format!("gap analysis failed: {}", e))
    }

    fn finish(
        &self,
        mut run: GenerationRun,
        outcome: RunOutcome,
        error: Option<String>,
        started: Instant,
    ) -> Result<PassResult> {
        run.outcome = outcome;
        run.finished_at = Utc::now();
        run.duration_ms = started.elapsed().as_millis() as u64;
        if let Some(message) = &error {
            if !run.details.contains(message) {
                run.details.push(message.clone());
            }
        }

        let generated = run.items_generated as u64;
        let finished_at = run.finished_at;
        self.update_status(|s| {
            s.total_runs += 1;
            s.total_items_generated += generated;
            s.last_run_finish = Some(finished_at);
            s.last_run_error = error;
            s.set_activity(activity::IDLE);
        })?;

        if let Err(e) = self.stores.runs.append_run(&run, self.config.max_history) {
            tracing::warn!(run_id = %run.run_id, error = %e, "Failed to record generation run");
        }

        tracing::info!(
            instance = %self.config.instance_id,
            run_id = %run.run_id,
            outcome = run.outcome.as_str(),
            gaps = run.gaps_found,
            generated = run.items_generated,
            duration_ms = run.duration_ms,
            "Generation pass finished"
        );
        Ok(PassResult::Completed(run))
    }
}

/// Map dispatch and refresh counters to a run outcome.
pub fn classify(dispatch: &DispatchResult, refresh: &RefreshSummary) -> RunOutcome {
    if dispatch.cancelled {
        return RunOutcome::Cancelled;
    }
    let call_problems = dispatch.calls_failed + dispatch.calls_rate_limited + dispatch.calls_abandoned;
    if dispatch.calls_attempted == 0 {
        if refresh.failed > 0 && refresh.scored == 0 {
            return RunOutcome::Failure;
        }
        return if refresh.failed > 0 || dispatch.rate_limited {
            RunOutcome::Partial
        } else {
            RunOutcome::Success
        };
    }
    if dispatch.calls_succeeded == 0 && call_problems > 0 {
        return RunOutcome::Failure;
    }
    if call_problems > 0 || dispatch.rate_limited || refresh.failed > 0 {
        return RunOutcome::Partial;
    }
    RunOutcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockBehavior};
    use crate::store::{SettingsStore, SqliteStore, WorkerStatusStore};
    use std::time::Duration;

    fn profiles(n: i64) -> Vec<SubjectProfile> {
        (1..=n).map(|i| SubjectProfile::new(SubjectId(i), "it", "A1")).collect()
    }

    fn worker_with(backend: MockBackend, config: Config) -> (Arc<SqliteStore>, Arc<MockBackend>, SchedulerWorker) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(backend);
        let worker = SchedulerWorker::new(&config, Stores::from_sqlite(store.clone()), backend.clone());
        (store, backend, worker)
    }

    #[test]
    fn test_next_batch_round_robin() {
        let subjects = profiles(5);
        let mut state = PassState::default();
        let ids = |b: Vec<SubjectProfile>| b.iter().map(|p| p.subject_id.0).collect::<Vec<_>>();

        assert_eq!(ids(state.next_batch(&subjects, 2)), vec![1, 2]);
        assert_eq!(ids(state.next_batch(&subjects, 2)), vec![3, 4]);
        assert_eq!(ids(state.next_batch(&subjects, 2)), vec![5, 1]);
        assert_eq!(ids(state.next_batch(&subjects, 10)).len(), 5);
        assert!(state.next_batch(&[], 2).is_empty());
    }

    #[test]
    fn test_classify() {
        let refresh = RefreshSummary::default();
        let mut dispatch = DispatchResult::default();
        assert_eq!(classify(&dispatch, &refresh), RunOutcome::Success);

        dispatch.calls_attempted = 2;
        dispatch.calls_succeeded = 1;
        dispatch.calls_failed = 1;
        assert_eq!(classify(&dispatch, &refresh), RunOutcome::Partial);

        dispatch.calls_succeeded = 0;
        dispatch.calls_failed = 2;
        assert_eq!(classify(&dispatch, &refresh), RunOutcome::Failure);

        dispatch.cancelled = true;
        assert_eq!(classify(&dispatch, &refresh), RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_pass_without_subjects_is_skipped() {
        let (_store, backend, worker) = worker_with(MockBackend::new(), Config::default());
        let result = worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap();
        match result {
            PassResult::Completed(run) => assert_eq!(run.outcome, RunOutcome::Skipped),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(backend.call_count(), 0);
        assert_eq!(worker.status().unwrap().total_runs, 1);
    }

    #[tokio::test]
    async fn test_pass_fills_empty_buckets() {
        let (store, backend, worker) = worker_with(MockBackend::new(), Config::default());
        store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "A1")).unwrap();

        let result = worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap();
        let PassResult::Completed(run) = result else {
            panic!("expected a completed pass");
        };
        assert_eq!(run.outcome, RunOutcome::Success);
        assert_eq!(run.gaps_found, 4);
        assert_eq!(run.items_generated, 4);
        assert_eq!(backend.call_count(), 4);

        let status = worker.status().unwrap();
        assert_eq!(status.total_runs, 1);
        assert_eq!(status.total_items_generated, 4);
        assert_eq!(status.current_activity, activity::IDLE);
        assert!(status.last_run_finish.is_some());
        assert_eq!(worker.history(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_global_pause_blocks_pass() {
        let (store, backend, worker) = worker_with(MockBackend::new(), Config::default());
        store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "A1")).unwrap();
        worker.set_global_pause(true).unwrap();

        let result = worker.run_pass(RunTrigger::Interval, &CancellationToken::new()).await.unwrap();
        assert_eq!(result, PassResult::Paused(PauseScope::Global));
        assert_eq!(backend.call_count(), 0);
        assert_eq!(worker.status().unwrap().total_runs, 0);
        assert!(store.flag(GLOBAL_PAUSE_KEY).unwrap());
    }

    #[tokio::test]
    async fn test_instance_pause_and_resume() {
        let (store, backend, worker) = worker_with(MockBackend::new(), Config::default());
        store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "A1")).unwrap();

        worker.set_instance_paused(true).unwrap();
        let result = worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap();
        assert_eq!(result, PassResult::Paused(PauseScope::Instance));

        worker.set_instance_paused(false).unwrap();
        let result = worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap();
        assert!(matches!(result, PassResult::Completed(_)));
        assert!(backend.call_count() > 0);
    }

    #[tokio::test]
    async fn test_failed_calls_record_error() {
        let backend = MockBackend::new().with_fallback(MockBehavior::Fail("backend down".to_string()));
        let (store, _backend, worker) = worker_with(backend, Config::default());
        store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "A1")).unwrap();

        let PassResult::Completed(run) = worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap()
        else {
            panic!("expected a completed pass");
        };
        assert_eq!(run.outcome, RunOutcome::Failure);
        let status = worker.status().unwrap();
        assert!(status.last_run_error.unwrap().contains("backend down"));
        assert_eq!(status.total_items_generated, 0);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_once() {
        let backend = MockBackend::new().with_delay(Duration::from_millis(50));
        let (store, _backend, worker) = worker_with(backend, Config::default());
        store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "A1")).unwrap();
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            worker.run_pass(RunTrigger::Manual, &cancel),
            worker.run_pass(RunTrigger::Manual, &cancel)
        );
        let results = [a.unwrap(), b.unwrap()];
        assert_eq!(results.iter().filter(|r| **r == PassResult::Busy).count(), 1);
        assert_eq!(worker.status().unwrap().total_runs, 1);
    }

    #[tokio::test]
    async fn test_lease_held_elsewhere_reports_busy() {
        let (store, backend, worker) = worker_with(MockBackend::new(), Config::default());
        store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "A1")).unwrap();
        let now = Utc::now();
        assert!(
            store
                .try_acquire_pass("default", "other-process", now, now + chrono::Duration::minutes(10))
                .unwrap()
        );

        let result = worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap();
        assert_eq!(result, PassResult::Busy);
        assert_eq!(backend.call_count(), 0);
        assert_eq!(worker.status().unwrap().total_runs, 0);

        store.release_pass("default", "other-process").unwrap();
        let result = worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap();
        assert!(matches!(result, PassResult::Completed(_)));
    }

    #[tokio::test]
    async fn test_lease_is_released_after_pass() {
        let (_store, _backend, worker) = worker_with(MockBackend::new(), Config::default());
        worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap();

        let now = Utc::now();
        let taken = worker
            .stores
            .workers
            .try_acquire_pass("default", "someone-else", now, now + chrono::Duration::minutes(1))
            .unwrap();
        assert!(taken);
        assert_ne!(worker.lease_holder(), "someone-else");
    }

    #[test]
    fn test_hint_generation_uses_subject_bucket() {
        let (store, _backend, worker) = worker_with(MockBackend::new(), Config::default());
        store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "B2")).unwrap();

        let hint = worker
            .hint_generation(SubjectId(1), ItemKind::FillInBlank, chrono::Duration::minutes(30))
            .unwrap();
        assert_eq!(hint.key, TopicKey::new("it", "B2", ItemKind::FillInBlank));
        assert_eq!(hint.priority_weight, 1);

        let again = worker
            .hint_generation(SubjectId(1), ItemKind::FillInBlank, chrono::Duration::minutes(30))
            .unwrap();
        assert_eq!(again.priority_weight, 2);

        let missing = worker.hint_generation(SubjectId(9), ItemKind::Vocabulary, chrono::Duration::minutes(30));
        assert!(matches!(missing, Err(DrillrError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let mut config = Config::default();
        config.scheduler.max_history = 2;
        let (_store, _backend, worker) = worker_with(MockBackend::new(), config);
        for _ in 0..4 {
            worker.run_pass(RunTrigger::Manual, &CancellationToken::new()).await.unwrap();
        }
        assert_eq!(worker.history(10).unwrap().len(), 2);
        assert_eq!(worker.status().unwrap().total_runs, 4);
    }
}
