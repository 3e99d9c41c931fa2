//! Signed session and access tokens.
//!
//! ```text
//! base64url(CBOR claims) "." base64url(HMAC-SHA256(token_secret, first part))
//! ```
//!
//! The signing key is a server secret independent of every handshake secret.
//! `purpose` keeps a session token from being accepted where an access token
//! is expected and vice versa.

use pulse_crypto::{
    codec,
    primitives::{hmac_sha256, verify_hmac_sha256},
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    error::AuthError,
    ids::{KeyId, UserId},
    records::Role,
};

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenPurpose {
    /// Long-lived, carries the handshake key-id, authenticates integrity calls
    Session,
    /// Short-lived, minted from a refresh token
    Access,
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account
    pub uid: UserId,
    /// Session key-id, present on session tokens
    pub kid: Option<KeyId>,
    /// Privilege
    pub role: Role,
    /// Session or access
    pub purpose: TokenPurpose,
    /// Issued at, Unix seconds
    pub iat: u64,
    /// Expires at, Unix seconds
    pub exp: u64,
}

/// Signs and verifies [`Claims`].
#[derive(Clone)]
pub struct TokenSigner {
    key: [u8; 32],
}

impl TokenSigner {
    /// Create from the server's token secret.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Sign claims into the wire form.
    pub fn sign(&self, claims: &Claims) -> String {
        let mut cbor = Vec::new();
        let Ok(()) = ciborium::into_writer(claims, &mut cbor) else {
            unreachable!("claims always serialize into a Vec");
        };

        let payload = codec::to_base64url(&cbor);
        let tag = hmac_sha256(&self.key, payload.as_bytes());
        format!("{payload}.{}", codec::to_base64url(&tag))
    }

    /// Verify signature, purpose and expiry.
    ///
    /// # Errors
    ///
    /// - `Authentication`: malformed, forged, expired, or wrong purpose
    pub fn verify(&self, token: &str, purpose: TokenPurpose, now: u64) -> Result<Claims, AuthError> {
        let invalid = || AuthError::Authentication("invalid token".to_string());

        let (payload, tag) = token.trim().split_once('.').ok_or_else(invalid)?;
        let tag = codec::from_base64url(tag).map_err(|_| invalid())?;
        if !verify_hmac_sha256(&self.key, payload.as_bytes(), &tag) {
            return Err(invalid());
        }

        let cbor = codec::from_base64url(payload).map_err(|_| invalid())?;
        let claims: Claims = ciborium::from_reader(cbor.as_slice()).map_err(|_| invalid())?;

        if claims.purpose != purpose {
            return Err(AuthError::Authentication("wrong token purpose".to_string()));
        }
        if now >= claims.exp {
            return Err(AuthError::Authentication("token expired".to_string()));
        }

        Ok(claims)
    }
}

impl Drop for TokenSigner {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
