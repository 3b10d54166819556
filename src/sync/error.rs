//! Sync error types

use thiserror::Error;

/// Errors raised by a state store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Errors raised while reconciling
#[derive(Debug, Error)]
pub enum SyncError {
    /// The batch is structurally invalid and was rejected before processing
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Gave up after {attempts} concurrent modifications of {key}")]
    RetriesExhausted { key: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
