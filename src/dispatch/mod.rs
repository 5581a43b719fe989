//! Generation dispatch.
//!
//! This module provides:
//! - **Dispatcher**: semaphore-bounded backend calls over a severity-ordered
//!   gap list, split by per-provider batch size
//! - **Pause gate**: global, instance and subject pause checks
//! - **Rate limiting**: provider backoff that outlives a single pass
//! - **Subject backoff**: exponential skip window after failed calls

mod backoff;
mod dispatcher;
mod pause;
mod rate_limit;

pub use backoff::SubjectBackoff;
pub use dispatcher::{DispatchResult, Dispatcher};
pub use pause::{PauseGate, PauseScope};
pub use rate_limit::{ProviderLimits, RateLimitState};
