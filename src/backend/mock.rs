//! Scripted backend that records every call and tracks peak concurrency.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{GenerationOutcome, GenerationSpec, GenerativeBackend};
use crate::domain::{Item, SubjectId};

/// What the mock does on a call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    Succeed,
    /// Retryable failure.
    Fail(String),
    /// Failure that repeating the request cannot fix.
    Reject(String),
    RateLimit(Duration),
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub provider: String,
    pub count: usize,
    pub spec: GenerationSpec,
}

pub struct MockBackend {
    delay: Duration,
    default_batch_size: usize,
    provider_batch_sizes: HashMap<String, usize>,
    script: Mutex<VecDeque<MockBehavior>>,
    fallback: MockBehavior,
    calls: Mutex<Vec<MockCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("delay", &self.delay)
            .field("calls", &self.call_count())
            .field("max_in_flight", &self.max_in_flight())
            .finish_non_exhaustive()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            default_batch_size: 3,
            provider_batch_sizes: HashMap::new(),
            script: Mutex::new(VecDeque::new()),
            fallback: MockBehavior::Succeed,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size;
        self
    }

    pub fn with_provider_batch_size(mut self, provider: impl Into<String>, size: usize) -> Self {
        self.provider_batch_sizes.insert(provider.into(), size);
        self
    }

    /// Behaviors consumed one per call, before falling back.
    pub fn with_script(self, script: Vec<MockBehavior>) -> Self {
        if let Ok(mut queue) = self.script.lock() {
            queue.extend(script);
        }
        self
    }

    /// Behavior once the script is exhausted.
    pub fn with_fallback(mut self, behavior: MockBehavior) -> Self {
        self.fallback = behavior;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, subject_id: SubjectId) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|call| call.spec.subject_id == subject_id).count())
            .unwrap_or(0)
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_behavior(&self) -> MockBehavior {
        self.script
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl GenerativeBackend for MockBackend {
    async fn generate_items(&self, provider: &str, count: usize, spec: &GenerationSpec) -> GenerationOutcome {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                provider: provider.to_string(),
                count,
                spec: spec.clone(),
            });
        }
        let behavior = self.next_behavior();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match behavior {
            MockBehavior::Succeed => GenerationOutcome::Success(
                (0..count)
                    .map(|n| {
                        Item::unsaved(
                            &spec.key,
                            spec.primary_topic(),
                            serde_json::json!({
                                "prompt": format!("{} #{}", spec.key, n + 1),
                                "provider": provider,
                            }),
                        )
                    })
                    .collect(),
            ),
            MockBehavior::Fail(reason) => GenerationOutcome::transient(reason),
            MockBehavior::Reject(reason) => GenerationOutcome::Failed {
                reason,
                retryable: false,
            },
            MockBehavior::RateLimit(retry_after) => GenerationOutcome::RateLimited { retry_after },
        }
    }

    fn batch_size(&self, provider: &str) -> usize {
        self.provider_batch_sizes
            .get(provider)
            .copied()
            .unwrap_or(self.default_batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemKind, TopicKey};

    fn spec() -> GenerationSpec {
        GenerationSpec {
            subject_id: SubjectId(1),
            key: TopicKey::new("it", "A1", ItemKind::Vocabulary),
            focus_topics: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_success_generates_requested_count() {
        let mock = MockBackend::new();
        match mock.generate_items("default", 3, &spec()).await {
            GenerationOutcome::Success(items) => assert_eq!(items.len(), 3),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.calls_for(SubjectId(1)), 1);
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let mock = MockBackend::new()
            .with_script(vec![MockBehavior::Fail("boom".to_string())])
            .with_fallback(MockBehavior::RateLimit(Duration::from_secs(5)));
        assert_eq!(
            mock.generate_items("default", 1, &spec()).await,
            GenerationOutcome::transient("boom")
        );
        assert!(mock.generate_items("default", 1, &spec()).await.is_rate_limited());
    }

    #[test]
    fn test_provider_batch_sizes() {
        let mock = MockBackend::new().with_batch_size(4).with_provider_batch_size("gemini", 2);
        assert_eq!(mock.batch_size("gemini"), 2);
        assert_eq!(mock.batch_size("other"), 4);
    }
}
