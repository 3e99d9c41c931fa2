//! Persisted records.

use std::fmt;

use pulse_crypto::{TruncateMode, truncate};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    device::DeviceState,
    ids::{TokenId, UserId},
};

/// Longest device name kept, in characters
pub const MAX_DEVICE_NAME: usize = 64;

/// Longest user-agent summary kept, in characters
pub const MAX_USER_AGENT: usize = 128;

/// Privilege carried by a session or access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Ordinary signed-in access
    Base,
    /// Short-lived elevated access after a fresh step-up
    Sudo,
}

impl Role {
    /// Whether this role may perform an action requiring `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

/// Canonical form of an email address: trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account id
    pub id: UserId,
    /// Unique, case-folded
    pub email: String,
    /// Email ownership was proven
    pub verified: bool,
    /// Unix seconds
    pub created_at: u64,
}

impl User {
    /// Create with a normalized email.
    pub fn new(id: UserId, email: &str, verified: bool, now: u64) -> Self {
        Self { id, email: normalize_email(email), verified, created_at: now }
    }
}

/// A persisted session secret.
///
/// The secret is immutable for the record's lifetime. A new session gets a
/// new key-id; nothing ever rewrites a secret in place.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Peppered storage id (never the client-facing kid)
    pub key_id: String,
    /// Owner, when the handshake was tied to an account
    pub user_id: Option<UserId>,
    secret: [u8; 32],
    /// Unix seconds
    pub created_at: u64,
    /// Unix seconds of the last durable-store hit
    pub last_seen_at: u64,
}

impl KeyRecord {
    /// Create a record stamped at `now`.
    pub fn new(key_id: String, user_id: Option<UserId>, secret: [u8; 32], now: u64) -> Self {
        Self { key_id, user_id, secret, created_at: now, last_seen_at: now }
    }

    /// The normalized shared secret.
    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key_id", &self.key_id)
            .field("user_id", &self.user_id)
            .field("secret", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("last_seen_at", &self.last_seen_at)
            .finish()
    }
}

impl Drop for KeyRecord {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Where and how a device signed in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceContext {
    /// Human-readable device name
    pub device_name: String,
    /// Shortened user agent
    pub user_agent: String,
}

impl DeviceContext {
    /// Build from raw client-supplied strings, bounding their length.
    pub fn new(device_name: &str, user_agent: &str) -> Self {
        let name = device_name.trim();
        let name = if name.is_empty() { "Unknown device" } else { name };
        Self {
            device_name: truncate(name, MAX_DEVICE_NAME, TruncateMode::Smart),
            user_agent: truncate(user_agent.trim(), MAX_USER_AGENT, TruncateMode::Middle),
        }
    }
}

/// A device-bound refresh token row.
///
/// `id` is the device's identity and survives rotation; only `token_hash`
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Row id
    pub id: TokenId,
    /// Owner
    pub user_id: UserId,
    /// `HMAC(pepper, token)`, unique
    pub token_hash: String,
    /// Human-readable device name
    pub device_name: String,
    /// Shortened user agent
    pub user_agent: String,
    /// Trust state
    pub state: DeviceState,
    /// Unix seconds
    pub created_at: u64,
    /// Unix seconds of the last rotation or state change
    pub last_used_at: u64,
}

impl RefreshToken {
    /// Whether the token is withheld from yielding access tokens.
    pub fn is_revoked(&self) -> bool {
        self.state.is_revoked()
    }
}

/// A registered WebAuthn credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasskeyRecord {
    /// Base64url credential id, unique
    pub credential_id: String,
    /// Owner
    pub user_id: UserId,
    /// COSE public key, opaque to this crate
    pub public_key: Vec<u8>,
    /// Last accepted signature counter
    pub sign_count: u32,
    /// Human-readable name
    pub name: String,
    /// Unix seconds
    pub created_at: u64,
}
