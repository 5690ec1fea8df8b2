//! Error types for snapdiff

use thiserror::Error;

/// Result type alias using snapdiff Error
pub type Result<T> = std::result::Result<T, Error>;

/// Snapdiff error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Comparison error: {0}")]
    Compare(#[from] snapdiff_compare::CompareError),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Diff worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn snapshot_not_found(id: i64) -> Self {
        Error::NotFound {
            kind: "snapshot".to_string(),
            id: id.to_string(),
        }
    }
}
