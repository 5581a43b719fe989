//! Pause flags checked before every pass and every backend call.
//!
//! Three scopes: the `global_pause` setting, the instance's
//! `WorkerStatus::is_paused`, and the per-subject `pause_<id>` setting.
//! Unreadable flags are logged and treated as not paused.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::SubjectId;
use crate::id::subject_pause_key;
use crate::store::{GLOBAL_PAUSE_KEY, SettingsStore, WorkerStatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseScope {
    Global,
    Instance,
    Subject,
}

impl fmt::Display for PauseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseScope::Global => f.write_str("global"),
            PauseScope::Instance => f.write_str("instance"),
            PauseScope::Subject => f.write_str("subject"),
        }
    }
}

#[derive(Clone)]
pub struct PauseGate {
    instance_id: String,
    settings: Arc<dyn SettingsStore>,
    workers: Arc<dyn WorkerStatusStore>,
}

impl fmt::Debug for PauseGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseGate")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl PauseGate {
    pub fn new(
        instance_id: impl Into<String>,
        settings: Arc<dyn SettingsStore>,
        workers: Arc<dyn WorkerStatusStore>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            settings,
            workers,
        }
    }

    fn read_flag(&self, key: &str) -> bool {
        self.settings.flag(key).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "Failed to read pause flag");
            false
        })
    }

    pub fn global_paused(&self) -> bool {
        self.read_flag(GLOBAL_PAUSE_KEY)
    }

    pub fn instance_paused(&self) -> bool {
        match self.workers.get_worker_status(&self.instance_id) {
            Ok(status) => status.is_some_and(|s| s.is_paused),
            Err(e) => {
                tracing::warn!(instance = %self.instance_id, error = %e, "Failed to read worker status");
                false
            }
        }
    }

    pub fn subject_paused(&self, subject_id: SubjectId) -> bool {
        self.read_flag(&subject_pause_key(subject_id.0))
    }

    /// Global or instance pause, whichever applies first.
    pub fn worker_pause(&self) -> Option<PauseScope> {
        if self.global_paused() {
            Some(PauseScope::Global)
        } else if self.instance_paused() {
            Some(PauseScope::Instance)
        } else {
            None
        }
    }

    /// Any pause that blocks a call for `subject_id`.
    pub fn call_pause(&self, subject_id: SubjectId) -> Option<PauseScope> {
        self.worker_pause().or_else(|| {
            if self.subject_paused(subject_id) {
                Some(PauseScope::Subject)
            } else {
                None
            }
        })
    }
}
