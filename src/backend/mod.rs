//! Generative backend seam.
//!
//! This module provides:
//! - `GenerativeBackend`: the async call contract used by the dispatcher
//! - `GenerationOutcome`: tagged success / rate-limited / failed result
//! - `HttpBackend`: reqwest client for a JSON generation service
//! - `MockBackend`: scripted, instrumented backend for tests

mod http;
mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Item, SubjectId, TopicKey};

pub use http::{HttpBackend, HttpBackendConfig};
pub use mock::{MockBackend, MockBehavior, MockCall};

/// What to generate: the bucket, the subject it is for, and the subject's
/// weak topics to steer content toward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub subject_id: SubjectId,
    pub key: TopicKey,
    #[serde(default)]
    pub focus_topics: Vec<String>,
}

impl GenerationSpec {
    /// Topic to label items with when the backend leaves it blank.
    pub fn primary_topic(&self) -> Option<String> {
        self.focus_topics.first().cloned()
    }
}

/// Result of one backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Success(Vec<Item>),
    RateLimited {
        retry_after: Duration,
    },
    /// `retryable` is false when repeating the same request cannot succeed
    /// (bad request, missing credentials, unusable response).
    Failed {
        reason: String,
        retryable: bool,
    },
}

impl GenerationOutcome {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GenerationOutcome::RateLimited { .. })
    }

    /// A failure worth retrying on the normal backoff schedule.
    pub fn transient(reason: impl Into<String>) -> Self {
        GenerationOutcome::Failed {
            reason: reason.into(),
            retryable: true,
        }
    }
}

/// Errors raised inside a backend before they are folded into an outcome.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },
}

impl BackendError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, BackendError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::RateLimited { .. } => true,
            BackendError::ApiError { status, .. } => *status >= 500,
            BackendError::Network(_) => true,
            BackendError::InvalidResponse(_) => false,
            BackendError::MissingApiKey { .. } => false,
        }
    }
}

impl From<BackendError> for GenerationOutcome {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited { retry_after } => GenerationOutcome::RateLimited { retry_after },
            other => GenerationOutcome::Failed {
                retryable: other.is_retryable(),
                reason: other.to_string(),
            },
        }
    }
}

/// Opaque item generator with a per-provider batch limit.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Ask `provider` for up to `count` items matching `spec`.
    async fn generate_items(&self, provider: &str, count: usize, spec: &GenerationSpec) -> GenerationOutcome;

    /// Largest `count` a single call to `provider` may request.
    fn batch_size(&self, provider: &str) -> usize;
}
