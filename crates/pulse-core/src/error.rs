//! Error types for the PULSE session core.
//!
//! One taxonomy for every failure a caller can observe. Each variant maps to a
//! fixed HTTP-equivalent status. `Display` carries the precise internal
//! reason for logs; [`AuthError::public_message`] is what may cross the outer
//! boundary.

use pulse_crypto::CryptoError;
use thiserror::Error;

/// Errors surfaced by the session-security core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Malformed input. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown or unverified principal, or a proof that did not check out
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Authenticated but not allowed
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Peer public key was malformed or an invalid point
    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    /// The key-id resolved to nothing. The client must re-run the handshake.
    #[error("session secret not found")]
    SecretNotFound,

    /// Integrity token failed AEAD verification in every tolerated window
    #[error("integrity verification failed")]
    IntegrityFailure,

    /// Integrity token salt was already presented
    #[error("replayed integrity token")]
    ReplayDetected,

    /// Device is locked or revoked. The refresh token is kept for unlock.
    #[error("device is locked")]
    DeviceLocked,

    /// Refresh token unknown, or lost a concurrent rotation
    #[error("invalid refresh token")]
    InvalidRefreshToken,

    /// Referenced record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Durable store timed out or failed after retries
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Too many attempts
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Bug or corrupted state
    #[error("internal error: {0}")]
    Internal(String),
}

/// Generic denial used for every credential failure at the outer boundary.
pub const ACCESS_DENIED: &str = "Access denied";

impl AuthError {
    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::KeyExchange(_) => 400,
            Self::Authentication(_) | Self::SecretNotFound | Self::InvalidRefreshToken => 401,
            Self::Forbidden(_) | Self::IntegrityFailure | Self::DeviceLocked => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::ReplayDetected => 409,
            Self::RateLimited(_) => 429,
            Self::Internal(_) => 500,
            Self::StorageUnavailable(_) => 503,
        }
    }

    /// Returns true if the same call may succeed on retry.
    ///
    /// Only storage availability is transient. Cryptographic and
    /// state-machine failures are deterministic: retrying them with the same
    /// inputs cannot succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// True when the client should discard its session and re-handshake.
    pub fn requires_handshake(&self) -> bool {
        matches!(self, Self::SecretNotFound)
    }

    /// Message safe to show outside the process.
    ///
    /// Credential failures are coalesced so a caller cannot tell a missing
    /// session from a forged token or an unknown account from a wrong proof.
    pub fn public_message(&self) -> String {
        match self {
            Self::Authentication(_)
            | Self::SecretNotFound
            | Self::IntegrityFailure
            | Self::InvalidRefreshToken => ACCESS_DENIED.to_string(),
            Self::StorageUnavailable(_) => "Service temporarily unavailable".to_string(),
            Self::Internal(_) => "Internal error".to_string(),
            Self::DeviceLocked => "This device is locked".to_string(),
            Self::ReplayDetected => "Request already processed".to_string(),
            Self::KeyExchange(_) => "Invalid public key".to_string(),
            Self::Validation(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::RateLimited(msg) => msg.clone(),
        }
    }
}

/// Only the key-exchange path maps crypto failures into the taxonomy
/// directly; integrity failures are reported as verdicts instead.
impl From<CryptoError> for AuthError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyExchange(msg) => Self::KeyExchange(msg),
            CryptoError::InvalidKeyLength { .. } => Self::KeyExchange(err.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}
