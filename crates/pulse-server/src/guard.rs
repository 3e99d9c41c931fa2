//! `X-Integrity` issuing and verification.
//!
//! Verification outcomes are verdicts, not errors: a forged token, a missing
//! session and a replay are all expected inputs. Only a storage failure while
//! resolving the secret is an `Err`.
//!
//! Order of checks:
//!
//! 1. Decode the header. Anything malformed is `Invalid`.
//! 2. Resolve the secret. Absent is `SecretNotFound`.
//! 3. AEAD-open under window shifts 0, -1, +1. All fail is `Invalid`.
//! 4. State-changing requests only, with replay protection on: atomically
//!    record `(kid, salt)`. Already seen is `ReplayDetected`.
//!
//! Replay is checked after the cryptography so an attacker cannot poison the
//! seen-set with salts of tokens they could not have produced.

use pulse_core::{AuthError, KeyId, env::Environment};
use pulse_crypto::{CHALLENGE_SIZE, IntegrityToken, RequestContext, SALT_SIZE};

use crate::{cache::TtlCache, keystore::KeyStore, storage::Storage};

/// Outcome of verifying an integrity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Authentic, fresh and not replayed
    Valid,
    /// Malformed, forged, bound to another request, or outside the window
    Invalid,
    /// The key-id names no stored secret; the client must re-handshake
    SecretNotFound,
    /// Authentic but already presented
    ReplayDetected,
}

impl Verdict {
    /// The error a request handler should surface, if any.
    pub fn into_result(self) -> Result<(), AuthError> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid => Err(AuthError::IntegrityFailure),
            Self::SecretNotFound => Err(AuthError::SecretNotFound),
            Self::ReplayDetected => Err(AuthError::ReplayDetected),
        }
    }
}

/// Guard settings.
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// Window length in seconds
    pub interval_secs: u64,
    /// Bind tokens to method, path and body
    pub bind_context: bool,
    /// Reject repeated salts on state-changing requests
    pub replay_protection: bool,
}

/// Issues and verifies integrity tokens.
#[derive(Clone)]
pub struct IntegrityGuard<S: Storage, E: Environment> {
    keystore: KeyStore<S, E>,
    seen: TtlCache<(String, [u8; SALT_SIZE]), ()>,
    config: GuardConfig,
    env: E,
}

impl<S: Storage, E: Environment> IntegrityGuard<S, E> {
    /// Create over a key store.
    pub fn new(keystore: KeyStore<S, E>, env: E, config: GuardConfig) -> Self {
        Self { keystore, seen: TtlCache::new(), config, env }
    }

    /// The replay seen-set, for registering with the sweeper.
    pub fn seen_salts(&self) -> &TtlCache<(String, [u8; SALT_SIZE]), ()> {
        &self.seen
    }

    fn associated_data(&self, ctx: &RequestContext<'_>) -> Vec<u8> {
        if self.config.bind_context { ctx.associated_data() } else { Vec::new() }
    }

    /// Build a token for an outgoing request. Stateless.
    pub fn issue(&self, secret: &[u8], ctx: &RequestContext<'_>) -> String {
        let salt = self.env.random_array::<SALT_SIZE>();
        let challenge = self.env.random_array::<CHALLENGE_SIZE>();
        let now = self.env.wall_clock_secs() as i64;

        IntegrityToken::seal(secret, salt, challenge, self.config.interval_secs, now, &self.associated_data(ctx))
            .encode()
    }

    /// Verify a token presented with `kid`.
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable`: the secret could not be resolved
    pub async fn verify(
        &self,
        kid: &KeyId,
        token: &str,
        ctx: &RequestContext<'_>,
    ) -> Result<Verdict, AuthError> {
        let Ok(token) = IntegrityToken::parse(token) else {
            tracing::debug!(%kid, "malformed integrity token");
            return Ok(Verdict::Invalid);
        };

        let Some(secret) = self.keystore.get(kid).await? else {
            return Ok(Verdict::SecretNotFound);
        };

        let now = self.env.wall_clock_secs();
        let aad = self.associated_data(ctx);
        let Some(shift) = token.open(secret.as_slice(), self.config.interval_secs, now as i64, &aad) else {
            tracing::debug!(%kid, path = ctx.path(), "integrity verification failed");
            return Ok(Verdict::Invalid);
        };

        if self.config.replay_protection && ctx.is_state_changing() {
            let ttl = self.config.interval_secs.saturating_mul(3);
            if !self.seen.insert_if_absent((kid.as_str().to_string(), *token.salt()), (), ttl, now) {
                tracing::warn!(%kid, method = ctx.method(), path = ctx.path(), "replayed integrity token");
                return Ok(Verdict::ReplayDetected);
            }
        }

        if shift != 0 {
            tracing::debug!(%kid, shift, "integrity token accepted in adjacent window");
        }
        Ok(Verdict::Valid)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::SimEnv;

    use super::*;
    use crate::{config::RetryPolicy, durable::DurableStore, storage::MemoryStorage};

    const INTERVAL: u64 = 120;

    async fn guard(env: &SimEnv, replay_protection: bool) -> (IntegrityGuard<MemoryStorage, SimEnv>, KeyId) {
        let durable =
            DurableStore::new(MemoryStorage::new(), env.clone(), Duration::from_secs(1), RetryPolicy::default());
        let keystore = KeyStore::new(durable, env.clone(), [5; 32], 3_600);
        let kid = KeyId::generate([1; 16]);
        keystore.set(&kid, &[9; 32], None).await.unwrap();

        let config = GuardConfig { interval_secs: INTERVAL, bind_context: true, replay_protection };
        (IntegrityGuard::new(keystore, env.clone(), config), kid)
    }

    #[tokio::test]
    async fn issued_token_verifies() {
        let env = SimEnv::new(1, 10_000);
        let (guard, kid) = guard(&env, true).await;
        let ctx = RequestContext::new("GET", "/me", b"");

        let token = guard.issue(&[9; 32], &ctx);
        assert_eq!(guard.verify(&kid, &token, &ctx).await.unwrap(), Verdict::Valid);
    }

    #[tokio::test]
    async fn replay_on_state_changing_call() {
        let env = SimEnv::new(1, 10_000);
        let (guard, kid) = guard(&env, true).await;
        let ctx = RequestContext::new("POST", "/transfer", b"{\"amount\":1}");

        let token = guard.issue(&[9; 32], &ctx);
        assert_eq!(guard.verify(&kid, &token, &ctx).await.unwrap(), Verdict::Valid);
        assert_eq!(guard.verify(&kid, &token, &ctx).await.unwrap(), Verdict::ReplayDetected);
    }

    #[tokio::test]
    async fn reads_are_not_replay_checked() {
        let env = SimEnv::new(1, 10_000);
        let (guard, kid) = guard(&env, true).await;
        let ctx = RequestContext::new("GET", "/me", b"");

        let token = guard.issue(&[9; 32], &ctx);
        for _ in 0..3 {
            assert_eq!(guard.verify(&kid, &token, &ctx).await.unwrap(), Verdict::Valid);
        }
        assert!(guard.seen_salts().is_empty());
    }

    #[tokio::test]
    async fn replay_protection_off() {
        let env = SimEnv::new(1, 10_000);
        let (guard, kid) = guard(&env, false).await;
        let ctx = RequestContext::new("DELETE", "/devices/1", b"");

        let token = guard.issue(&[9; 32], &ctx);
        assert_eq!(guard.verify(&kid, &token, &ctx).await.unwrap(), Verdict::Valid);
        assert_eq!(guard.verify(&kid, &token, &ctx).await.unwrap(), Verdict::Valid);
    }

    #[tokio::test]
    async fn bound_to_endpoint() {
        let env = SimEnv::new(1, 10_000);
        let (guard, kid) = guard(&env, true).await;

        let token = guard.issue(&[9; 32], &RequestContext::new("POST", "/a", b"body"));

        for other in [
            RequestContext::new("POST", "/b", b"body"),
            RequestContext::new("PUT", "/a", b"body"),
            RequestContext::new("POST", "/a", b"other"),
        ] {
            assert_eq!(guard.verify(&kid, &token, &other).await.unwrap(), Verdict::Invalid);
        }
    }

    #[tokio::test]
    async fn forged_token_does_not_poison_seen_set() {
        let env = SimEnv::new(1, 10_000);
        let (guard, kid) = guard(&env, true).await;
        let ctx = RequestContext::new("POST", "/a", b"");

        let forged = IntegrityToken::seal(&[1; 32], [3; SALT_SIZE], [0; CHALLENGE_SIZE], INTERVAL, 10_000, b"");
        assert_eq!(guard.verify(&kid, &forged.encode(), &ctx).await.unwrap(), Verdict::Invalid);
        assert!(guard.seen_salts().is_empty());
    }

    #[tokio::test]
    async fn unknown_kid_and_garbage() {
        let env = SimEnv::new(1, 10_000);
        let (guard, kid) = guard(&env, true).await;
        let ctx = RequestContext::new("GET", "/", b"");
        let token = guard.issue(&[9; 32], &ctx);

        let stranger = KeyId::generate([2; 16]);
        assert_eq!(guard.verify(&stranger, &token, &ctx).await.unwrap(), Verdict::SecretNotFound);
        assert_eq!(guard.verify(&kid, "!!not-base64!!", &ctx).await.unwrap(), Verdict::Invalid);
        assert_eq!(guard.verify(&kid, "AAAA", &ctx).await.unwrap(), Verdict::Invalid);
    }

    #[tokio::test]
    async fn expires_after_two_intervals() {
        let env = SimEnv::new(1, 10_000);
        let (guard, kid) = guard(&env, false).await;
        let ctx = RequestContext::new("GET", "/", b"");
        let token = guard.issue(&[9; 32], &ctx);

        env.advance_secs(2 * INTERVAL);
        assert_eq!(guard.verify(&kid, &token, &ctx).await.unwrap(), Verdict::Invalid);
    }

    #[test]
    fn verdict_errors() {
        assert_eq!(Verdict::Valid.into_result(), Ok(()));
        assert_eq!(Verdict::Invalid.into_result(), Err(AuthError::IntegrityFailure));
        assert_eq!(Verdict::SecretNotFound.into_result(), Err(AuthError::SecretNotFound));
        assert_eq!(Verdict::ReplayDetected.into_result(), Err(AuthError::ReplayDetected));
    }
}
