//! Status and analytics.
//!
//! This module provides:
//! - **Analytics**: read-only summaries, system health, comparisons,
//!   high-priority items, weak areas and generation suggestions
//! - **TimingRecorder**: rolling calculation and query timings shared with
//!   the scoring engine

mod aggregator;
mod report;
mod timing;

pub use aggregator::Analytics;
pub use report::{
    BackgroundJobs, GenerationSuggestion, HighPriorityItem, PerformanceMetrics, PreferencesUsage, ScoreSummary,
    SystemHealth, UserPerformanceSummary, WeakArea, WorkerHealth,
};
pub use timing::{TimingRecorder, TimingSnapshot};
