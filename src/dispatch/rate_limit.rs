//! Provider rate-limit backoff shared across scheduler passes.
//!
//! A 429 from a provider halts the current pass; this state keeps later
//! passes from calling that provider again until the backoff expires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Backoff for one provider.
#[derive(Debug, Default)]
pub struct RateLimitState {
    /// When calls may resume (None = no active limit).
    pub backoff_until: Option<Instant>,
    /// Consecutive rate-limit responses.
    pub consecutive_hits: u32,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_rate_limited(&self) -> bool {
        self.backoff_until.map(|until| Instant::now() < until).unwrap_or(false)
    }

    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.backoff_until.and_then(|until| {
            let now = Instant::now();
            if now < until { Some(until - now) } else { None }
        })
    }

    /// The delay is the larger of the provider's `retry_after` and
    /// `2^hits` seconds, capped at `max_backoff`.
    pub fn record_rate_limit(&mut self, retry_after: Duration, max_backoff: Duration) -> Duration {
        self.consecutive_hits = self.consecutive_hits.saturating_add(1);
        let exp_backoff = Duration::from_secs(2u64.pow(self.consecutive_hits.min(12)));
        let delay = retry_after.max(exp_backoff).min(max_backoff);
        self.backoff_until = Some(Instant::now() + delay);
        delay
    }

    pub fn record_success(&mut self) {
        self.consecutive_hits = 0;
        self.backoff_until = None;
    }
}

/// Rate-limit state keyed by provider name.
#[derive(Debug)]
pub struct ProviderLimits {
    max_backoff: Duration,
    providers: HashMap<String, RateLimitState>,
}

impl ProviderLimits {
    pub fn new(max_backoff: Duration) -> Self {
        Self {
            max_backoff,
            providers: HashMap::new(),
        }
    }

    pub fn is_rate_limited(&self, provider: &str) -> bool {
        self.providers.get(provider).is_some_and(|s| s.is_rate_limited())
    }

    pub fn remaining_backoff(&self, provider: &str) -> Option<Duration> {
        self.providers.get(provider).and_then(|s| s.remaining_backoff())
    }

    pub fn record_rate_limit(&mut self, provider: &str, retry_after: Duration) {
        let state = self.providers.entry(provider.to_string()).or_default();
        let delay = state.record_rate_limit(retry_after, self.max_backoff);
        tracing::warn!(
            provider,
            retry_after_secs = delay.as_secs(),
            consecutive_hits = state.consecutive_hits,
            "Provider rate limited, backing off"
        );
    }

    pub fn record_success(&mut self, provider: &str) {
        if let Some(state) = self.providers.get_mut(provider) {
            state.record_success();
        }
    }

    /// Providers currently backing off.
    pub fn limited_providers(&self) -> Vec<String> {
        let mut limited: Vec<String> = self
            .providers
            .iter()
            .filter(|(_, s)| s.is_rate_limited())
            .map(|(p, _)| p.clone())
            .collect();
        limited.sort();
        limited
    }
}
