//! HTTP client for a JSON item-generation service.
//!
//! Request: `POST {endpoint}` with `{provider, count, subject_id, language,
//! level, kind, topic, focus_topics}`. Response:
//! `{"items": [{"topic": ..., "content": ...}]}`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{BackendError, GenerationOutcome, GenerationSpec, GenerativeBackend};
use crate::config::{BackendConfig, DispatchConfig};
use crate::domain::Item;
use crate::error::{DrillrError, Result};

/// Retry delay assumed when a 429 carries no usable `retry-after` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub default_batch_size: usize,
    pub provider_batch_sizes: HashMap<String, usize>,
}

impl HttpBackendConfig {
    /// Build from config; the API key is read from the configured env var.
    pub fn from_config(backend: &BackendConfig, dispatch: &DispatchConfig) -> Self {
        Self {
            endpoint: backend.endpoint.clone(),
            api_key: std::env::var(&backend.api_key_env).ok(),
            timeout: Duration::from_millis(backend.timeout_ms),
            default_batch_size: dispatch.default_batch_size,
            provider_batch_sizes: dispatch.provider_batch_sizes.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedItem {
    #[serde(default)]
    topic: Option<String>,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    items: Vec<GeneratedItem>,
}

pub struct HttpBackend {
    client: Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DrillrError::Backend(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn request(&self, provider: &str, count: usize, spec: &GenerationSpec) -> std::result::Result<Vec<Item>, BackendError> {
        let body = json!({
            "provider": provider,
            "count": count,
            "subject_id": spec.subject_id,
            "language": spec.key.language,
            "level": spec.key.level,
            "kind": spec.key.kind,
            "topic": spec.primary_topic(),
            "focus_topics": spec.focus_topics,
        });

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(BackendError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        if parsed.items.is_empty() {
            return Err(BackendError::InvalidResponse("response contained no items".to_string()));
        }

        Ok(parsed
            .items
            .into_iter()
            .take(count)
            .map(|g| Item::unsaved(&spec.key, g.topic.or_else(|| spec.primary_topic()), g.content))
            .collect())
    }
}

#[async_trait]
impl GenerativeBackend for HttpBackend {
    async fn generate_items(&self, provider: &str, count: usize, spec: &GenerationSpec) -> GenerationOutcome {
        match self.request(provider, count, spec).await {
            Ok(items) => GenerationOutcome::Success(items),
            Err(e) => {
                if !e.is_rate_limit() {
                    tracing::warn!(provider, retryable = e.is_retryable(), error = %e, "Generation request failed");
                }
                e.into()
            }
        }
    }

    fn batch_size(&self, provider: &str) -> usize {
        self.config
            .provider_batch_sizes
            .get(provider)
            .copied()
            .unwrap_or(self.config.default_batch_size)
            .max(1)
    }
}
