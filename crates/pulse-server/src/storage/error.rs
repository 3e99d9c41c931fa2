//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `NotFound`: Requested record doesn't exist
//! - `Conflict`: Unique constraint violated
//! - `Serialization`: Failed to encode/decode data
//! - `Io`: Underlying storage system errors
//! - `Timeout`: Operation exceeded the I/O boundary's deadline

use std::time::Duration;

use pulse_core::AuthError;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Unique constraint violated (key-id, email, token hash)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation did not complete in time
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Constraint violations and corrupt records are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_))
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            StorageError::Conflict(what) => Self::Conflict(what),
            StorageError::Serialization(reason) => Self::Internal(reason),
            StorageError::Io(_) | StorageError::Timeout(_) => Self::StorageUnavailable(err.to_string()),
        }
    }
}
