//! Priority scoring.
//!
//! This module provides:
//! - **Policy**: the pluggable score formula (`ScoringPolicy`, `WeightedPolicy`)
//! - **Engine**: computes and stores scores, finds weak topics and coverage gaps
//! - **Gaps**: the fresh-ratio arithmetic behind gap suggestions
//! - **Distribution**: high / medium / low bucketing derived on read

pub mod distribution;
pub mod engine;
pub mod gaps;
pub mod policy;

pub use distribution::{Band, Cuts, bucket_scores, resolve_cuts};
pub use engine::{DEFAULT_MAX_SUGGESTED, RefreshSummary, ScoringEngine};
pub use gaps::{BucketCoverage, hinted_gap, merge_system_wide, sort_gaps, suggested_count};
pub use policy::{NEUTRAL_DIFFICULTY, ScoreInputs, ScoringPolicy, WeightedPolicy};
