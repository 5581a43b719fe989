//! Background generation scheduler.
//!
//! This module provides:
//! - **SchedulerWorker**: one instance's pass (score refresh, gap analysis,
//!   dispatch, run recording) with instance-scoped mutual exclusion
//! - **WorkerHandle**: the interval/trigger run loop, heartbeat, pause
//!   controls and graceful shutdown
//!
//! # Example
//!
//! ```ignore
//! let worker = Arc::new(SchedulerWorker::new(&config, stores, backend));
//! let handle = WorkerHandle::start(worker)?;
//! handle.trigger_run();
//! handle.shutdown().await?;
//! ```

mod handle;
mod worker;

pub use handle::{TriggerResult, WorkerHandle};
pub use worker::{PassResult, PassState, RunTrigger, SchedulerWorker, classify};
