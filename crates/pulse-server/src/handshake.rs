//! Server side of the ECDH handshake.
//!
//! ```text
//! Client                                   Server
//!   │ client_public_key (hex)                │
//!   │ ──────────────────────────────────────>│ generate ephemeral pair
//!   │                                        │ raw = X25519(server_priv, client_pub)
//!   │                                        │ secret = SHA-256(raw)
//!   │                                        │ kid = random 16 bytes
//!   │                                        │ KeyStore.set(kid, secret)
//!   │ server_public_key (hex), kid           │
//!   │ <──────────────────────────────────────│
//!   │ secret = SHA-256(X25519(client_priv,   │
//!   │                         server_pub))   │
//! ```
//!
//! The key-id is only revealed after the key store write succeeded, so no
//! client can present a kid whose secret is not yet durable.

use pulse_core::{AuthError, KeyId, UserId, env::Environment};
use pulse_crypto::{EphemeralKeyPair, SHARED_SECRET_SIZE, exchange::parse_public_key_hex};
use zeroize::Zeroizing;

use crate::{keystore::KeyStore, storage::Storage};

/// Result of a completed handshake.
pub struct HandshakeOutcome {
    /// Key-id to embed in the session token
    pub key_id: KeyId,
    /// Server's ephemeral public key, hex, for the client to finish its side
    pub server_public_key: String,
    secret: Zeroizing<[u8; SHARED_SECRET_SIZE]>,
}

impl HandshakeOutcome {
    /// The normalized shared secret.
    pub fn secret(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.secret
    }
}

/// A derived secret not yet persisted. The ephemeral private key is already
/// gone.
pub struct PreparedHandshake {
    server_public_key: String,
    secret: Zeroizing<[u8; SHARED_SECRET_SIZE]>,
}

/// Generates ephemeral key pairs and persists the resulting secrets.
#[derive(Clone)]
pub struct HandshakeEngine<S: Storage, E: Environment> {
    keystore: KeyStore<S, E>,
    env: E,
}

impl<S: Storage, E: Environment> HandshakeEngine<S, E> {
    /// Create over a key store.
    pub fn new(keystore: KeyStore<S, E>, env: E) -> Self {
        Self { keystore, env }
    }

    /// Fresh ephemeral key pair. Consumes randomness only.
    pub fn generate_key_pair(&self) -> EphemeralKeyPair {
        EphemeralKeyPair::generate(self.env.random_array())
    }

    /// Normalized shared secret between our private key and a hex peer key.
    ///
    /// # Errors
    ///
    /// - `KeyExchange`: peer key malformed or a low-order point
    pub fn derive_shared_secret(
        &self,
        pair: &EphemeralKeyPair,
        peer_public_hex: &str,
    ) -> Result<Zeroizing<[u8; SHARED_SECRET_SIZE]>, AuthError> {
        let peer = parse_public_key_hex(peer_public_hex)?;
        let raw = pair.derive_shared_secret(&peer)?;
        Ok(Zeroizing::new(raw.normalize()))
    }

    /// Validate the peer key and derive the secret without persisting it.
    ///
    /// # Errors
    ///
    /// - `KeyExchange`: peer key rejected
    pub fn prepare(&self, peer_public_hex: &str) -> Result<PreparedHandshake, AuthError> {
        let pair = self.generate_key_pair();
        let secret = self.derive_shared_secret(&pair, peer_public_hex).inspect_err(|err| {
            tracing::debug!(error = %err, "rejected peer public key");
        })?;

        Ok(PreparedHandshake { server_public_key: pair.public_key_hex(), secret })
    }

    /// Mint a key-id and persist a prepared secret under it.
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable`: secret could not be persisted; no kid is issued
    pub async fn commit(
        &self,
        prepared: PreparedHandshake,
        user_id: Option<UserId>,
    ) -> Result<HandshakeOutcome, AuthError> {
        let key_id = KeyId::generate(self.env.random_array());
        self.keystore.set(&key_id, &prepared.secret, user_id).await?;

        tracing::info!(kid = %key_id, user_id = ?user_id, "handshake complete");
        Ok(HandshakeOutcome {
            key_id,
            server_public_key: prepared.server_public_key,
            secret: prepared.secret,
        })
    }

    /// Run the server half of a handshake and persist the secret.
    ///
    /// # Errors
    ///
    /// - `KeyExchange`: peer key rejected; nothing is written
    /// - `StorageUnavailable`: secret could not be persisted; no kid is issued
    pub async fn complete_handshake(
        &self,
        peer_public_hex: &str,
        user_id: Option<UserId>,
    ) -> Result<HandshakeOutcome, AuthError> {
        let prepared = self.prepare(peer_public_hex)?;
        self.commit(prepared, user_id).await
    }
}

/// Client half: finish the exchange from the server's public key.
///
/// Gives the same normalized secret the server stored.
pub fn client_shared_secret(
    pair: &EphemeralKeyPair,
    server_public_hex: &str,
) -> Result<Zeroizing<[u8; SHARED_SECRET_SIZE]>, AuthError> {
    let server = parse_public_key_hex(server_public_hex)?;
    let raw = pair.derive_shared_secret(&server)?;
    Ok(Zeroizing::new(raw.normalize()))
}
