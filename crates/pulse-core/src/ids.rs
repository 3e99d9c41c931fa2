//! Identifiers.
//!
//! Records reference each other by id only; there are no embedded object
//! graphs between users, devices and session keys.

use std::fmt;

use pulse_crypto::{codec, keyed_hash};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Refresh-token row identifier. Stable across rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Size of a handshake identifier in bytes
pub const KEY_ID_SIZE: usize = 16;

/// Client-facing key-id (`kid`) naming a session secret.
///
/// Random, never derived from user input. The durable store does not key on
/// this value directly; see [`KeyId::storage_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(String);

impl KeyId {
    /// Mint from caller-provided random bytes.
    pub fn generate(random: [u8; KEY_ID_SIZE]) -> Self {
        Self(codec::to_hex(&random))
    }

    /// Parse a key-id received from a client.
    pub fn parse(input: &str) -> Result<Self, AuthError> {
        codec::from_hex_array::<KEY_ID_SIZE>(input)
            .map(|bytes| Self(codec::to_hex(&bytes)))
            .map_err(|_| AuthError::Validation("malformed key id".to_string()))
    }

    /// Hex form embedded in session tokens.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier under which the secret is persisted: `HMAC(pepper, kid)`.
    ///
    /// Someone holding a copy of the key table cannot map rows back to the
    /// bearer values clients present.
    pub fn storage_id(&self, pepper: &[u8]) -> String {
        keyed_hash(pepper, self.0.as_bytes())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
