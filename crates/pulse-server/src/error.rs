//! Errors from running the server process itself.
//!
//! Request-level failures are [`pulse_core::AuthError`]. These cover startup
//! and operator commands: bad configuration, unusable storage, I/O.

use pulse_core::AuthError;
use thiserror::Error;

use crate::storage::StorageError;

/// Process-level errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration rejected at startup
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Durable store could not be opened or failed an operator command
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// A core operation failed during an operator command
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// I/O error (signals, filesystem)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
