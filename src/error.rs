//! Error types for Drillr
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Drillr
#[derive(Debug, Error)]
pub enum DrillrError {
    /// Record not found in a collaborator store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Learning preferences outside their allowed ranges
    #[error("Invalid preferences: {0}")]
    InvalidPreferences(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generative backend error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Drillr operations
pub type Result<T> = std::result::Result<T, DrillrError>;
