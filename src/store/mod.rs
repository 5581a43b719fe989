//! Persistence seams for the scheduler core.
//!
//! - `traits`: the collaborator traits (scores, performance, preferences,
//!   catalog, sink, settings, hints, worker status, run history)
//! - `sqlite`: one rusqlite implementation of all of them
//! - `Stores`: the bundle of trait objects handed to the engine, dispatcher,
//!   scheduler and analytics

mod sqlite;
mod traits;

use std::sync::Arc;

pub use sqlite::SqliteStore;
pub use traits::{
    GLOBAL_PAUSE_KEY, GenerationHintStore, ItemCatalog, ItemSink, PerformanceSource, PreferenceSource,
    RunHistoryStore, ScoreStore, SettingsStore, WorkerStatusStore,
};

/// Every collaborator the core talks to.
#[derive(Clone)]
pub struct Stores {
    pub scores: Arc<dyn ScoreStore>,
    pub performance: Arc<dyn PerformanceSource>,
    pub preferences: Arc<dyn PreferenceSource>,
    pub catalog: Arc<dyn ItemCatalog>,
    pub sink: Arc<dyn ItemSink>,
    pub settings: Arc<dyn SettingsStore>,
    pub hints: Arc<dyn GenerationHintStore>,
    pub workers: Arc<dyn WorkerStatusStore>,
    pub runs: Arc<dyn RunHistoryStore>,
}

impl Stores {
    /// Back every seam with the same SQLite store.
    pub fn from_sqlite(store: Arc<SqliteStore>) -> Self {
        Self {
            scores: store.clone(),
            performance: store.clone(),
            preferences: store.clone(),
            catalog: store.clone(),
            sink: store.clone(),
            settings: store.clone(),
            hints: store.clone(),
            workers: store.clone(),
            runs: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
