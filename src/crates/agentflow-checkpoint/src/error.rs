//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// A stored checkpoint document could not be decoded
    #[error("Checkpoint '{id}' is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    /// The checkpoint does not belong to the graph it is being restored into
    #[error("Incompatible checkpoint: {0}")]
    Incompatible(String),

    /// Checkpoint ids double as file names, so separators are rejected
    #[error("Invalid checkpoint id: {0}")]
    InvalidId(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    pub fn corrupt(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}
