//! Ephemeral X25519 key exchange.
//!
//! The server generates a fresh key pair for every handshake, combines it
//! with the client's public key, and never reuses it. The raw Diffie-Hellman
//! output is hashed before it is stored anywhere.
//!
//! ## Security Notes
//!
//! - Private keys are zeroized on drop
//! - Low-order peer points (all-zero shared secret) are rejected
//! - Randomness is supplied by the caller

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{CryptoError, codec, primitives};

/// Size of an X25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Ephemeral key pair for a single handshake.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Build a key pair from 32 bytes of caller-provided randomness.
    ///
    /// Caller MUST provide cryptographically secure random bytes in
    /// production.
    pub fn generate(mut random: [u8; 32]) -> Self {
        let secret = StaticSecret::from(random);
        random.zeroize();
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half as raw bytes.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Public half as lowercase hex, the handshake wire format.
    pub fn public_key_hex(&self) -> String {
        codec::to_hex(self.public.as_bytes())
    }

    /// Diffie-Hellman with a peer public key.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength`: peer key is not 32 bytes
    /// - `KeyExchange`: peer key is a low-order point
    pub fn derive_shared_secret(&self, peer_public: &[u8]) -> Result<RawSharedSecret, CryptoError> {
        let peer = <[u8; PUBLIC_KEY_SIZE]>::try_from(peer_public).map_err(|_| {
            CryptoError::InvalidKeyLength { expected: PUBLIC_KEY_SIZE, actual: peer_public.len() }
        })?;

        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchange("non-contributory peer public key".to_string()));
        }

        Ok(RawSharedSecret { bytes: shared.to_bytes() })
    }
}

/// Parse a hex-encoded peer public key.
///
/// # Errors
///
/// - `KeyExchange`: not hex, or not exactly 32 bytes
pub fn parse_public_key_hex(input: &str) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
    codec::from_hex_array::<PUBLIC_KEY_SIZE>(input.trim())
        .map_err(|e| CryptoError::KeyExchange(format!("malformed public key: {e}")))
}

/// Raw Diffie-Hellman output. Never stored; see [`RawSharedSecret::normalize`].
pub struct RawSharedSecret {
    bytes: [u8; SHARED_SECRET_SIZE],
}

impl RawSharedSecret {
    /// One-way normalization into the secret that is actually persisted.
    pub fn normalize(&self) -> [u8; SHARED_SECRET_SIZE] {
        primitives::sha256(&self.bytes)
    }

    /// Raw bytes, for tests comparing both sides of an exchange.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.bytes
    }
}

impl Drop for RawSharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
