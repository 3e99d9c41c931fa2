//! Per-request authentication.
//!
//! Integrity-protected calls present a session token (carrying the key-id)
//! and an `X-Integrity` header. Management calls present an access token and
//! need a minimum [`Role`].

use std::sync::Arc;

use pulse_core::{AuthError, Claims, Role, TokenPurpose, TokenSigner, env::Environment};
use pulse_crypto::RequestContext;

use crate::{guard::IntegrityGuard, storage::Storage};

/// Checks session and access tokens on incoming requests.
#[derive(Clone)]
pub struct RequestAuthenticator<S: Storage, E: Environment> {
    guard: IntegrityGuard<S, E>,
    signer: Arc<TokenSigner>,
    env: E,
}

impl<S: Storage, E: Environment> RequestAuthenticator<S, E> {
    /// Create over the integrity guard and the token signer.
    pub fn new(guard: IntegrityGuard<S, E>, signer: Arc<TokenSigner>, env: E) -> Self {
        Self { guard, signer, env }
    }

    /// The integrity guard, for issuing tokens in tests and tools.
    pub fn guard(&self) -> &IntegrityGuard<S, E> {
        &self.guard
    }

    /// Verify a session token alone, without an integrity check.
    ///
    /// # Errors
    ///
    /// - `Authentication`: malformed, forged, expired or not a session token
    pub fn session(&self, session_token: &str) -> Result<Claims, AuthError> {
        self.signer.verify(session_token, TokenPurpose::Session, self.env.wall_clock_secs())
    }

    /// Authenticate an integrity-protected request.
    ///
    /// # Errors
    ///
    /// - `Authentication`: bad session token, or one without a key-id
    /// - `IntegrityFailure`: header missing, forged or stale
    /// - `SecretNotFound`: the session's secret is gone; re-handshake
    /// - `ReplayDetected`: header already used on a state-changing call
    pub async fn authenticate(
        &self,
        session_token: &str,
        integrity: Option<&str>,
        ctx: &RequestContext<'_>,
    ) -> Result<Claims, AuthError> {
        let claims = self.session(session_token)?;
        let Some(kid) = claims.kid.as_ref() else {
            return Err(AuthError::Authentication("session token carries no key id".to_string()));
        };
        let Some(header) = integrity else {
            tracing::debug!(%kid, path = ctx.path(), "missing integrity header");
            return Err(AuthError::IntegrityFailure);
        };

        self.guard.verify(kid, header, ctx).await?.into_result()?;
        Ok(claims)
    }

    /// Verify an access token and require at least `required`.
    ///
    /// # Errors
    ///
    /// - `Authentication`: malformed, forged, expired or not an access token
    /// - `Forbidden`: valid token with too little privilege
    pub fn authorize(&self, access_token: &str, required: Role) -> Result<Claims, AuthError> {
        let claims = self.signer.verify(access_token, TokenPurpose::Access, self.env.wall_clock_secs())?;
        if !claims.role.satisfies(required) {
            tracing::debug!(user_id = %claims.uid, role = ?claims.role, ?required, "insufficient role");
            return Err(AuthError::Forbidden("Insufficient privileges".to_string()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::{KeyId, SimEnv, UserId};

    use super::*;
    use crate::{
        config::RetryPolicy, durable::DurableStore, guard::GuardConfig, keystore::KeyStore,
        storage::MemoryStorage,
    };

    const NOW: u64 = 100_000;

    async fn authenticator(env: &SimEnv) -> (RequestAuthenticator<MemoryStorage, SimEnv>, KeyId) {
        let durable =
            DurableStore::new(MemoryStorage::new(), env.clone(), Duration::from_secs(1), RetryPolicy::default());
        let keystore = KeyStore::new(durable, env.clone(), [5; 32], 3_600);
        let kid = KeyId::generate([4; 16]);
        keystore.set(&kid, &[9; 32], Some(UserId(1))).await.unwrap();

        let config = GuardConfig { interval_secs: 120, bind_context: true, replay_protection: true };
        let guard = IntegrityGuard::new(keystore, env.clone(), config);
        (RequestAuthenticator::new(guard, Arc::new(TokenSigner::new([7; 32])), env.clone()), kid)
    }

    fn token(kid: Option<KeyId>, role: Role, purpose: TokenPurpose) -> String {
        TokenSigner::new([7; 32]).sign(&Claims { uid: UserId(1), kid, role, purpose, iat: NOW, exp: NOW + 600 })
    }

    #[tokio::test]
    async fn session_and_header_authenticate() {
        let env = SimEnv::new(1, NOW);
        let (auth, kid) = authenticator(&env).await;
        let ctx = RequestContext::new("POST", "/notes", b"{}");
        let header = auth.guard().issue(&[9; 32], &ctx);

        let claims =
            auth.authenticate(&token(Some(kid.clone()), Role::Base, TokenPurpose::Session), Some(&header), &ctx).await;
        assert_eq!(claims.unwrap().kid, Some(kid));
    }

    #[tokio::test]
    async fn missing_pieces_fail_distinctly() {
        let env = SimEnv::new(1, NOW);
        let (auth, kid) = authenticator(&env).await;
        let ctx = RequestContext::new("GET", "/", b"");
        let header = auth.guard().issue(&[9; 32], &ctx);

        let no_kid = token(None, Role::Base, TokenPurpose::Session);
        assert!(matches!(auth.authenticate(&no_kid, Some(&header), &ctx).await, Err(AuthError::Authentication(_))));

        let session = token(Some(kid), Role::Base, TokenPurpose::Session);
        assert_eq!(auth.authenticate(&session, None, &ctx).await, Err(AuthError::IntegrityFailure));

        let stranger = token(Some(KeyId::generate([8; 16])), Role::Base, TokenPurpose::Session);
        assert_eq!(auth.authenticate(&stranger, Some(&header), &ctx).await, Err(AuthError::SecretNotFound));
    }

    #[tokio::test]
    async fn access_token_is_not_a_session_token() {
        let env = SimEnv::new(1, NOW);
        let (auth, kid) = authenticator(&env).await;
        let ctx = RequestContext::new("GET", "/", b"");
        let header = auth.guard().issue(&[9; 32], &ctx);

        let access = token(Some(kid), Role::Base, TokenPurpose::Access);
        assert!(matches!(auth.authenticate(&access, Some(&header), &ctx).await, Err(AuthError::Authentication(_))));
    }

    #[tokio::test]
    async fn authorize_checks_role() {
        let env = SimEnv::new(1, NOW);
        let (auth, _) = authenticator(&env).await;
        let base = token(None, Role::Base, TokenPurpose::Access);
        let sudo = token(None, Role::Sudo, TokenPurpose::Access);

        assert!(auth.authorize(&base, Role::Base).is_ok());
        assert!(matches!(auth.authorize(&base, Role::Sudo), Err(AuthError::Forbidden(_))));
        assert_eq!(auth.authorize(&sudo, Role::Sudo).unwrap().role, Role::Sudo);

        env.advance_secs(600);
        assert!(matches!(auth.authorize(&sudo, Role::Base), Err(AuthError::Authentication(_))));
    }
}
