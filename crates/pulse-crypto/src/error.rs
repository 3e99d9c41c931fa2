//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Input was not valid hex/base64 or had an unexpected shape
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Key material had the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Buffer shorter than the fixed-width prefix it must contain
    #[error("truncated input: need at least {minimum} bytes, got {actual}")]
    Truncated {
        /// Minimum acceptable length
        minimum: usize,
        /// Actual length
        actual: usize,
    },

    /// Integer does not fit the requested width
    #[error("integer overflow: value needs {needed} bytes, width is {width}")]
    Overflow {
        /// Bytes needed to represent the value
        needed: usize,
        /// Requested width
        width: usize,
    },

    /// Diffie-Hellman exchange rejected the peer key
    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    /// AEAD authentication failed
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why decryption failed
        reason: String,
    },
}
