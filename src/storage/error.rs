//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, decoding, lookup).

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization error (instrument config, cursors).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid data in database (e.g., negative timestamps, bad enum value).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., failure to prepare the database directory).
    #[error("internal error: {0}")]
    Internal(String),
}
