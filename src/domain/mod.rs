//! Domain types for Drillr
//!
//! This module contains the core domain types:
//! - Item, ItemKind, TopicKey: practice units and the buckets they belong to
//! - SubjectId, SubjectProfile: learners as seen by the scheduler
//! - PerformanceHistory, LearningPreferences: scoring inputs
//! - PriorityScore, TopicGap, ScoreDistribution: scoring outputs
//! - GenerationHint: host requests to fill a bucket early
//! - WorkerStatus, GenerationRun: scheduler bookkeeping

pub mod item;
pub mod performance;
pub mod score;
pub mod worker;

pub use item::{Item, ItemId, ItemKind, SubjectId, SubjectProfile, TopicKey};
pub use performance::{LearningPreferences, PerformanceHistory, TopicPerformance};
pub use score::{GenerationHint, PriorityScore, ScoreDistribution, TopicGap};
pub use worker::{GenerationRun, RunOutcome, WorkerStatus, activity};
