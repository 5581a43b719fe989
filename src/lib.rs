//! Drillr - adaptive practice-content generation scheduler
//!
//! Drillr scores every practice item per learner, finds topic buckets that are
//! running short on fresh items, and keeps a generative backend busy filling
//! them under concurrency, rate-limit and pause controls.

pub mod analytics;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod id;
pub mod scheduler;
pub mod scoring;
pub mod store;

pub use error::{DrillrError, Result};
