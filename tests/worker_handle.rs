//! Background worker integration tests
//!
//! Start a `WorkerHandle`, drive it with triggers and pause flags, and shut
//! it down.

use std::sync::Arc;
use std::time::Duration;

use drillr::analytics::Analytics;
use drillr::backend::MockBackend;
use drillr::config::Config;
use drillr::domain::{RunOutcome, SubjectId, SubjectProfile, WorkerStatus, activity};
use drillr::error::Result;
use drillr::scheduler::{SchedulerWorker, TriggerResult, WorkerHandle};
use drillr::store::{SqliteStore, Stores};

fn quiet_config() -> Config {
    let mut config = Config::default();
    config.scheduler.instance_id = "it-worker".to_string();
    config.scheduler.interval_secs = 3600;
    config.scheduler.heartbeat_interval_secs = 3600;
    config
}

fn start(store: Arc<SqliteStore>, backend: Arc<MockBackend>, config: &Config) -> Result<WorkerHandle> {
    let worker = Arc::new(SchedulerWorker::new(config, Stores::from_sqlite(store), backend));
    WorkerHandle::start(worker)
}

async fn wait_until(handle: &WorkerHandle, done: impl Fn(&WorkerStatus) -> bool) -> WorkerStatus {
    for _ in 0..300 {
        let status = handle.status().unwrap();
        if done(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("worker never reached the expected state");
}

#[tokio::test]
async fn test_triggers_coalesce_while_pending() -> Result<()> {
    let store = Arc::new(SqliteStore::open_in_memory()?);
    let handle = start(store, Arc::new(MockBackend::new()), &quiet_config())?;

    // The run loop hasn't been polled yet, so the second trigger finds the slot taken
    assert_eq!(handle.trigger_run(), TriggerResult::Queued);
    assert_eq!(handle.trigger_run(), TriggerResult::AlreadyPending);

    // One manual pass plus the startup tick
    let status = wait_until(&handle, |s| s.total_runs >= 2).await;
    assert_eq!(status.current_activity, activity::IDLE);

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_paused_instance_skips_until_resumed() -> Result<()> {
    let store = Arc::new(SqliteStore::open_in_memory()?);
    store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "A1"))?;
    let backend = Arc::new(MockBackend::new());
    let handle = start(store, backend.clone(), &quiet_config())?;
    wait_until(&handle, |s| s.total_runs >= 1).await;
    let calls_after_first = backend.call_count();

    assert!(handle.pause()?.is_paused);
    assert_ne!(handle.trigger_run(), TriggerResult::Stopped);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.status()?.current_activity, activity::PAUSED);
    assert_eq!(backend.call_count(), calls_after_first);
    assert_eq!(handle.status()?.total_runs, 1);

    handle.resume()?;
    handle.trigger_run();
    let status = wait_until(&handle, |s| s.total_runs >= 2).await;
    assert!(!status.is_paused);

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_abandons_slow_calls() -> Result<()> {
    let store = Arc::new(SqliteStore::open_in_memory()?);
    store.add_subject(&SubjectProfile::new(SubjectId(1), "it", "A1"))?;
    let backend = Arc::new(MockBackend::new().with_delay(Duration::from_secs(30)));
    let handle = start(store.clone(), backend.clone(), &quiet_config())?;

    for _ in 0..300 {
        if backend.call_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(backend.call_count() > 0);

    let worker = handle.worker().clone();
    let status = tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown should not wait for slow calls")?;
    assert!(!status.is_running);
    assert_eq!(status.current_activity, activity::STOPPED);

    let runs = worker.history(1)?;
    assert_eq!(runs[0].outcome, RunOutcome::Cancelled);
    Ok(())
}

#[tokio::test]
async fn test_worker_health_reports_running_instance() -> Result<()> {
    let store = Arc::new(SqliteStore::open_in_memory()?);
    let config = quiet_config();
    let handle = start(store.clone(), Arc::new(MockBackend::new()), &config)?;
    wait_until(&handle, |s| s.last_heartbeat.is_some()).await;

    let analytics = Analytics::new(handle.worker().engine(), Stores::from_sqlite(store), 300);
    let workers = analytics.worker_health()?;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].instance_id, "it-worker");
    assert!(workers[0].healthy);
    assert!(workers[0].is_running);

    handle.shutdown().await?;
    Ok(())
}
