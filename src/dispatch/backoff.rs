//! Per-subject failure backoff: `2^failures` seconds, capped, cleared on success.
//! A rejected request backs off for the full cap at once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::SubjectId;

#[derive(Debug, Clone, Copy)]
struct Entry {
    failures: u32,
    until: Instant,
}

#[derive(Debug)]
pub struct SubjectBackoff {
    max_delay: Duration,
    entries: HashMap<SubjectId, Entry>,
}

impl SubjectBackoff {
    pub fn new(max_delay: Duration) -> Self {
        Self {
            max_delay,
            entries: HashMap::new(),
        }
    }

    pub fn delay_for(failures: u32, max_delay: Duration) -> Duration {
        Duration::from_secs(2u64.saturating_pow(failures.min(32))).min(max_delay)
    }

    pub fn is_backing_off(&self, subject_id: SubjectId) -> bool {
        self.entries
            .get(&subject_id)
            .is_some_and(|entry| Instant::now() < entry.until)
    }

    /// Time left before `subject_id` may be called again.
    pub fn remaining(&self, subject_id: SubjectId) -> Duration {
        self.entries
            .get(&subject_id)
            .map(|entry| entry.until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn failures(&self, subject_id: SubjectId) -> u32 {
        self.entries.get(&subject_id).map(|e| e.failures).unwrap_or(0)
    }

    pub fn record_failure(&mut self, subject_id: SubjectId) -> Duration {
        let failures = self.failures(subject_id).saturating_add(1);
        let delay = Self::delay_for(failures, self.max_delay);
        self.entries.insert(
            subject_id,
            Entry {
                failures,
                until: Instant::now() + delay,
            },
        );
        tracing::debug!(subject = %subject_id, failures, delay_secs = delay.as_secs(), "Subject backing off");
        delay
    }

    /// The backend refused the request outright; retrying sooner cannot help.
    pub fn record_rejection(&mut self, subject_id: SubjectId) -> Duration {
        let failures = self.failures(subject_id).saturating_add(1);
        self.entries.insert(
            subject_id,
            Entry {
                failures,
                until: Instant::now() + self.max_delay,
            },
        );
        tracing::debug!(subject = %subject_id, failures, delay_secs = self.max_delay.as_secs(), "Subject request rejected");
        self.max_delay
    }

    pub fn record_success(&mut self, subject_id: SubjectId) {
        self.entries.remove(&subject_id);
    }
}
