//! Session issuing: the one entry point request handlers talk to.
//!
//! # Sign-in
//!
//! ```text
//! rate limit ──> verify proof ──> optional step-up ──> validate client key
//!                                                               │
//!                                                               ↓
//!            device lifecycle <── persist secret under new kid ─┘
//!                   │
//!                   ├──> locked device: discard secret
//!                   └──> trusted device: drop previous session, sign session token
//! ```
//!
//! The client public key is validated before anything is written, and the
//! secret is durable before the device row changes, so a failed sign-in
//! never rotates a refresh token without also handing out the session. The
//! caller's previous session is only dropped once the new one is issued.

use std::sync::Arc;

use pulse_core::{
    AuthError, Claims, DeviceContext, KeyId, Role, TokenId, TokenPurpose, TokenSigner, User, UserId,
    env::Environment, normalize_email,
};

use crate::{
    authenticator::RequestAuthenticator,
    cache::Sweep,
    config::PulseConfig,
    durable::DurableStore,
    error::ServerError,
    guard::{GuardConfig, IntegrityGuard},
    handshake::HandshakeEngine,
    keystore::KeyStore,
    mail::Mailer,
    refresh::{DeviceView, RefreshTokenLifecycle, Rotation, TokenLifetimes},
    step_up::{
        AuthMethod, AuthProof, BypassTokens, EmailCodeVerifier, PasskeyChallenge, PasskeyVerifier, SignInLimiter,
        StepUpGate, WebAuthnVerifier,
    },
    storage::Storage,
};

/// Everything a client sends to sign in.
#[derive(Debug, Clone)]
pub struct SignInRequest {
    /// Account email
    pub email: String,
    /// Primary proof of identity
    pub proof: AuthProof,
    /// Extra proof that lets a new device skip the lock
    pub step_up: Option<AuthProof>,
    /// Client's ephemeral X25519 public key, hex
    pub client_public_key: String,
    /// Device description
    pub device: DeviceContext,
    /// Refresh token the device already holds, if any
    pub refresh_token: Option<String>,
    /// Session being replaced, if any
    pub session_token: Option<String>,
}

/// What a sign-in hands back.
#[derive(Debug, Clone)]
pub struct SignInResponse {
    /// Signed session token; absent for a locked device
    pub session_token: Option<String>,
    /// Server's ephemeral public key, hex; absent for a locked device
    pub server_public_key: Option<String>,
    /// Refresh token to keep
    pub refresh_token: String,
    /// Access token; absent for a locked device
    pub access_token: Option<String>,
    /// Lets the client skip one immediate step-up
    pub bypass_token: String,
    /// Device is locked or revoked
    pub locked: bool,
}

impl SignInResponse {
    /// `DeviceLocked` for a locked device. The response still carries the
    /// refresh token for the unlock flow.
    pub fn check_unlocked(&self) -> Result<(), AuthError> {
        if self.locked { Err(AuthError::DeviceLocked) } else { Ok(()) }
    }
}

/// Proof offered to elevate an access token.
#[derive(Debug, Clone)]
pub enum StepUp {
    /// A fresh email code or passkey assertion
    Proof(AuthProof),
    /// A bypass token minted at sign-in
    Bypass(String),
}

/// Wires every component together from one [`PulseConfig`].
#[derive(Clone)]
pub struct SessionIssuer<S: Storage, E: Environment> {
    env: E,
    durable: DurableStore<S, E>,
    keystore: KeyStore<S, E>,
    handshake: HandshakeEngine<S, E>,
    authenticator: RequestAuthenticator<S, E>,
    gate: StepUpGate<S, E>,
    lifecycle: RefreshTokenLifecycle<S, E>,
    limiter: SignInLimiter<E>,
    signer: Arc<TokenSigner>,
    session_lifetime_secs: u64,
}

impl<S: Storage, E: Environment> SessionIssuer<S, E> {
    /// Build over `storage` after validating `config`.
    pub fn new(
        storage: S,
        env: E,
        config: &PulseConfig,
        mailer: Arc<dyn Mailer>,
        webauthn: Arc<dyn WebAuthnVerifier>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let durable = DurableStore::new(storage, env.clone(), config.durable_timeout, config.retry);
        let signer = Arc::new(TokenSigner::new(config.token_secret));
        let keystore = KeyStore::new(durable.clone(), env.clone(), config.pepper, config.key_cache_ttl_secs);

        let guard = IntegrityGuard::new(
            keystore.clone(),
            env.clone(),
            GuardConfig {
                interval_secs: config.window_interval_secs,
                bind_context: config.bind_context,
                replay_protection: config.replay_protection,
            },
        );

        let gate = StepUpGate::new(
            EmailCodeVerifier::new(mailer.clone(), env.clone(), config.otp_ttl_secs, config.otp_max_attempts),
            PasskeyVerifier::new(
                durable.clone(),
                webauthn,
                env.clone(),
                config.origin.clone(),
                config.challenge_ttl_secs,
            ),
        );

        let lifecycle = RefreshTokenLifecycle::new(
            durable.clone(),
            signer.clone(),
            BypassTokens::new(env.clone(), config.bypass_ttl()),
            mailer,
            env.clone(),
            config.pepper,
            TokenLifetimes {
                access_secs: config.access_token_lifetime_secs,
                sudo_secs: config.sudo_token_lifetime_secs,
            },
        );

        Ok(Self {
            handshake: HandshakeEngine::new(keystore.clone(), env.clone()),
            authenticator: RequestAuthenticator::new(guard, signer.clone(), env.clone()),
            limiter: SignInLimiter::new(env.clone(), config.signin_attempt_limit, config.signin_window_secs),
            session_lifetime_secs: config.session_lifetime_secs,
            env,
            durable,
            keystore,
            gate,
            lifecycle,
            signer,
        })
    }

    /// Per-request checks for integrity-protected and management calls.
    pub fn authenticator(&self) -> &RequestAuthenticator<S, E> {
        &self.authenticator
    }

    /// The session secret store.
    pub fn keystore(&self) -> &KeyStore<S, E> {
        &self.keystore
    }

    /// Device lifecycle, for operator tooling that acts without a token.
    pub fn lifecycle(&self) -> &RefreshTokenLifecycle<S, E> {
        &self.lifecycle
    }

    /// Every short-lived cache, for the background sweeper.
    pub fn sweepables(&self) -> Vec<Arc<dyn Sweep>> {
        vec![
            Arc::new(self.keystore.cache().clone()),
            Arc::new(self.authenticator.guard().seen_salts().clone()),
            Arc::new(self.lifecycle.bypass().live().clone()),
            Arc::new(self.limiter.counters().clone()),
            self.gate.email().sweepable(),
            self.gate.passkey().sweepable(),
        ]
    }

    /// Mail a sign-in code.
    pub async fn send_code(&self, email: &str) -> Result<(), AuthError> {
        self.gate.email().send_code(email).await
    }

    /// Start a passkey assertion, optionally for one account.
    pub async fn begin_passkey(&self, email: Option<&str>) -> Result<PasskeyChallenge, AuthError> {
        self.gate.passkey().begin(email).await
    }

    /// Register a passkey. Needs a `Sudo` access token.
    pub async fn register_passkey(
        &self,
        access_token: &str,
        credential_id: &str,
        public_key: Vec<u8>,
        name: &str,
    ) -> Result<(), AuthError> {
        let claims = self.authenticator.authorize(access_token, Role::Sudo)?;
        self.gate.passkey().register(claims.uid, credential_id, public_key, name).await
    }

    /// Create an account after proving the address with an email code.
    ///
    /// # Errors
    ///
    /// - `Validation`: the proof is not an email code
    /// - `Authentication`: the code was for another address
    /// - `Conflict`: the address is already registered
    pub async fn sign_up(&self, email: &str, proof: &AuthProof) -> Result<User, AuthError> {
        if proof.method() != AuthMethod::EmailCode {
            return Err(AuthError::Validation("Sign-up requires an email code".to_string()));
        }
        let verified = self.gate.verify(proof).await?;
        let email = normalize_email(email);
        if verified.email != email {
            return Err(AuthError::Authentication("proof does not match email".to_string()));
        }

        let user = User::new(UserId(self.env.random_u64()), &email, true, self.env.wall_clock_secs());
        let record = user.clone();
        self.durable.write(move |s| s.create_user(&record)).await.map_err(|err| match err {
            AuthError::Conflict(_) => AuthError::Conflict("Email already registered".to_string()),
            other => other,
        })?;

        tracing::info!(user_id = %user.id, "account created");
        Ok(user)
    }

    /// Authenticate, register or re-authenticate the device, and run the
    /// handshake.
    ///
    /// A locked device gets a response with `locked` set and neither session
    /// nor access token. See [`SignInResponse::check_unlocked`].
    ///
    /// # Errors
    ///
    /// - `RateLimited`: too many sign-ins for this email
    /// - `Authentication`: proof failed, or belongs to another account
    /// - `KeyExchange`: client public key rejected; nothing was written
    /// - `StorageUnavailable`: durable store down
    pub async fn sign_in(&self, request: &SignInRequest) -> Result<SignInResponse, AuthError> {
        let email = normalize_email(&request.email);
        self.limiter.check(&email)?;

        let verified = self.gate.verify(&request.proof).await?;
        if verified.email != email {
            tracing::warn!(method = %verified.method, "sign-in proof for a different email");
            return Err(AuthError::Authentication("proof does not match email".to_string()));
        }

        let stepped_up = match &request.step_up {
            _ if verified.method == AuthMethod::Passkey => true,
            Some(extra) => {
                if self.gate.verify(extra).await?.email != email {
                    return Err(AuthError::Authentication("step-up proof does not match email".to_string()));
                }
                true
            },
            None => false,
        };

        let lookup = email.clone();
        let user = match self.durable.read(move |s| s.find_user_by_email(&lookup)).await? {
            Some(user) if user.verified => user,
            _ => return Err(AuthError::Authentication("unknown or unverified account".to_string())),
        };

        let prepared = self.handshake.prepare(&request.client_public_key)?;
        let outcome = self.handshake.commit(prepared, Some(user.id)).await?;

        let grant = match self
            .lifecycle
            .signin(&email, &request.device, request.refresh_token.as_deref(), stepped_up)
            .await
        {
            Ok(grant) => grant,
            Err(err) => {
                self.discard_key(&outcome.key_id).await;
                return Err(err);
            },
        };
        self.limiter.reset(&email);

        if grant.locked {
            self.discard_key(&outcome.key_id).await;
            return Ok(SignInResponse {
                session_token: None,
                server_public_key: None,
                refresh_token: grant.refresh_token,
                access_token: None,
                bypass_token: grant.bypass_token,
                locked: true,
            });
        }

        // Replaced only once the new session is certain to be issued
        if let Some(previous) = request.session_token.as_deref() {
            self.drop_previous_session(previous, user.id).await;
        }

        let now = self.env.wall_clock_secs();
        let session_token = self.signer.sign(&Claims {
            uid: user.id,
            kid: Some(outcome.key_id),
            role: Role::Base,
            purpose: TokenPurpose::Session,
            iat: now,
            exp: now.saturating_add(self.session_lifetime_secs),
        });

        Ok(SignInResponse {
            session_token: Some(session_token),
            server_public_key: Some(outcome.server_public_key),
            refresh_token: grant.refresh_token,
            access_token: grant.access_token,
            bypass_token: grant.bypass_token,
            locked: false,
        })
    }

    async fn discard_key(&self, kid: &KeyId) {
        if let Err(err) = self.keystore.delete(kid).await {
            tracing::warn!(%kid, error = %err, "failed to discard provisional session secret");
        }
    }

    async fn drop_previous_session(&self, session_token: &str, user_id: UserId) {
        match self.authenticator.session(session_token) {
            Ok(Claims { uid, kid: Some(kid), .. }) if uid == user_id => self.discard_key(&kid).await,
            _ => tracing::debug!(%user_id, "previous session not replaceable, ignoring"),
        }
    }

    /// End a session by forgetting its secret. Returns false if it was
    /// already gone.
    ///
    /// # Errors
    ///
    /// - `Authentication`: not a valid session token
    pub async fn sign_out(&self, session_token: &str) -> Result<bool, AuthError> {
        let claims = self.authenticator.session(session_token)?;
        let Some(kid) = claims.kid else {
            return Ok(false);
        };

        let existed = self.keystore.delete(&kid).await?;
        tracing::info!(user_id = %claims.uid, %kid, "signed out");
        Ok(existed)
    }

    /// Rotate a refresh token. `DeviceLocked` leaves the token usable for
    /// unlock.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Rotation, AuthError> {
        self.lifecycle.refresh(refresh_token).await
    }

    /// Unlock the device holding `refresh_token`. Bypass tokens are not
    /// accepted here.
    ///
    /// # Errors
    ///
    /// - `Forbidden`: the proof belongs to someone other than the owner
    pub async fn unlock(&self, refresh_token: &str, proof: &AuthProof) -> Result<(), AuthError> {
        let verified = self.gate.verify(proof).await?;
        self.lifecycle.unlock(refresh_token, &verified).await?;
        Ok(())
    }

    /// Exchange a base access token and a fresh step-up for a `Sudo` one.
    ///
    /// # Errors
    ///
    /// - `Forbidden`: the proof or bypass token belongs to someone else
    pub async fn elevate(&self, access_token: &str, step_up: &StepUp) -> Result<String, AuthError> {
        let claims = self.authenticator.authorize(access_token, Role::Base)?;

        match step_up {
            StepUp::Bypass(token) => {
                if self.lifecycle.bypass().resolve(token) != Some(claims.uid) {
                    return Err(AuthError::Forbidden("Invalid bypass token".to_string()));
                }
            },
            StepUp::Proof(proof) => {
                let verified = self.gate.verify(proof).await?;
                let uid = claims.uid;
                let owner = self.durable.read(move |s| s.load_user(uid)).await?;
                let matches = owner.is_some_and(|owner| {
                    owner.email == verified.email && verified.user_id.is_none_or(|id| id == owner.id)
                });
                if !matches {
                    tracing::warn!(user_id = %claims.uid, "step-up proof for another account");
                    return Err(AuthError::Forbidden("Step-up proof does not match account".to_string()));
                }
            },
        }

        tracing::info!(user_id = %claims.uid, "access elevated");
        Ok(self.lifecycle.access_token(claims.uid, Role::Sudo))
    }

    /// Devices of the token's account. `current` is the caller's refresh
    /// token.
    pub async fn list_devices(&self, access_token: &str, current: Option<&str>) -> Result<Vec<DeviceView>, AuthError> {
        let claims = self.authenticator.authorize(access_token, Role::Base)?;
        self.lifecycle.list(claims.uid, current).await
    }

    /// Rename a device.
    pub async fn rename_device(
        &self,
        access_token: &str,
        id: TokenId,
        name: &str,
        current: Option<&str>,
    ) -> Result<DeviceView, AuthError> {
        let claims = self.authenticator.authorize(access_token, Role::Base)?;
        self.lifecycle.rename(claims.uid, id, name, current).await
    }

    /// Revoke or restore a device. Needs `Sudo`.
    pub async fn revoke_device(
        &self,
        access_token: &str,
        id: TokenId,
        revoke: bool,
        current: Option<&str>,
    ) -> Result<DeviceView, AuthError> {
        let claims = self.authenticator.authorize(access_token, Role::Sudo)?;
        self.lifecycle.revoke(claims.uid, id, revoke, current).await
    }

    /// Revoke every other device. Needs `Sudo`.
    pub async fn revoke_all_devices(&self, access_token: &str, current: Option<&str>) -> Result<usize, AuthError> {
        let claims = self.authenticator.authorize(access_token, Role::Sudo)?;
        self.lifecycle.revoke_all(claims.uid, current).await
    }

    /// Delete a device. Needs `Sudo`.
    pub async fn delete_device(&self, access_token: &str, id: TokenId, current: Option<&str>) -> Result<(), AuthError> {
        let claims = self.authenticator.authorize(access_token, Role::Sudo)?;
        self.lifecycle.delete(claims.uid, id, current).await
    }

    /// Delete the account with its devices, secrets and passkeys. Needs
    /// `Sudo`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the account is already gone
    pub async fn delete_account(&self, access_token: &str) -> Result<(), AuthError> {
        let claims = self.authenticator.authorize(access_token, Role::Sudo)?;
        let uid = claims.uid;

        if !self.durable.write_idempotent(move |s| s.delete_user(uid)).await? {
            return Err(AuthError::NotFound("User not found".to_string()));
        }

        let evicted = self.keystore.evict_user(uid);
        self.lifecycle.bypass().live().remove_where(|_, owner| *owner == uid);
        tracing::info!(user_id = %uid, evicted, "account deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pulse_core::SimEnv;
    use pulse_crypto::{EphemeralKeyPair, RequestContext};

    use super::*;
    use crate::{
        handshake::client_shared_secret,
        mail::Outbox,
        step_up::{AssertionExpectations, EmailCodeProof, PasskeyAssertion, PasskeyProof},
        storage::MemoryStorage,
    };

    struct EchoWebAuthn;

    impl WebAuthnVerifier for EchoWebAuthn {
        fn assertion_result(
            &self,
            assertion: &PasskeyAssertion,
            expected: &AssertionExpectations<'_>,
        ) -> Result<u32, String> {
            if assertion.signature == expected.challenge {
                Ok(expected.prev_counter + 1)
            } else {
                Err("signature mismatch".to_string())
            }
        }
    }

    struct Fixture {
        env: SimEnv,
        outbox: Outbox,
        storage: MemoryStorage,
        issuer: SessionIssuer<MemoryStorage, SimEnv>,
    }

    fn fixture() -> Fixture {
        let env = SimEnv::new(21, 1_700_000_000);
        let outbox = Outbox::new();
        let storage = MemoryStorage::new();
        let config = PulseConfig::with_secrets([1; 32], [2; 32]);
        let issuer =
            SessionIssuer::new(storage.clone(), env.clone(), &config, Arc::new(outbox.clone()), Arc::new(EchoWebAuthn))
                .unwrap();
        Fixture { env, outbox, storage, issuer }
    }

    impl Fixture {
        async fn code_proof(&self, email: &str) -> AuthProof {
            self.issuer.send_code(email).await.unwrap();
            let mail = self.outbox.last_to(&normalize_email(email)).unwrap();
            let code = mail.text.chars().filter(char::is_ascii_digit).take(6).collect();
            AuthProof::EmailCode(EmailCodeProof { email: email.to_string(), code })
        }

        async fn passkey_proof(&self, email: &str) -> AuthProof {
            let challenge = self.issuer.begin_passkey(Some(email)).await.unwrap();
            AuthProof::Passkey(PasskeyProof {
                request_id: challenge.request_id,
                assertion: PasskeyAssertion {
                    credential_id: challenge.allow_credentials[0].clone(),
                    client_data: Vec::new(),
                    authenticator_data: Vec::new(),
                    signature: pulse_crypto::codec::from_base64url(&challenge.challenge).unwrap(),
                },
            })
        }

        async fn sign_up(&self, email: &str) -> User {
            let proof = self.code_proof(email).await;
            self.issuer.sign_up(email, &proof).await.unwrap()
        }

        async fn request(&self, email: &str, client: &EphemeralKeyPair) -> SignInRequest {
            SignInRequest {
                email: email.to_string(),
                proof: self.code_proof(email).await,
                step_up: None,
                client_public_key: client.public_key_hex(),
                device: DeviceContext::new("Laptop", "Firefox"),
                refresh_token: None,
                session_token: None,
            }
        }
    }

    #[tokio::test]
    async fn first_sign_in_yields_a_working_session() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);

        let response = f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();
        assert!(response.check_unlocked().is_ok());
        assert!(response.access_token.is_some());

        let secret = client_shared_secret(&client, response.server_public_key.as_deref().unwrap()).unwrap();
        let ctx = RequestContext::new("POST", "/notes", b"hello");
        let header = f.issuer.authenticator().guard().issue(secret.as_slice(), &ctx);

        let session = response.session_token.unwrap();
        let claims = f.issuer.authenticator().authenticate(&session, Some(&header), &ctx).await.unwrap();
        assert_eq!(claims.role, Role::Base);
        assert_eq!(
            f.issuer.authenticator().authenticate(&session, Some(&header), &ctx).await,
            Err(AuthError::ReplayDetected)
        );
    }

    #[tokio::test]
    async fn second_device_is_locked_and_keeps_no_secret() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();
        let keys_before = f.storage.key_count();

        let response = f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();

        assert_eq!(response.check_unlocked(), Err(AuthError::DeviceLocked));
        assert!(response.session_token.is_none());
        assert!(response.server_public_key.is_none());
        assert!(response.access_token.is_none());
        assert_eq!(f.storage.key_count(), keys_before);
    }

    #[tokio::test]
    async fn bad_client_key_writes_nothing() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        let mut request = f.request("ann@example.com", &client).await;
        request.client_public_key = "00".repeat(32);

        assert!(matches!(f.issuer.sign_in(&request).await, Err(AuthError::KeyExchange(_))));
        assert_eq!(f.storage.key_count(), 0);
        assert_eq!(f.storage.refresh_token_count(), 0);
    }

    #[tokio::test]
    async fn proof_for_another_email_is_rejected() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        f.sign_up("bob@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);

        let mut request = f.request("ann@example.com", &client).await;
        request.proof = f.code_proof("bob@example.com").await;

        assert!(matches!(f.issuer.sign_in(&request).await, Err(AuthError::Authentication(_))));
    }

    #[tokio::test]
    async fn duplicate_sign_up_conflicts() {
        let f = fixture();
        let user = f.sign_up("ann@example.com").await;
        assert!(user.verified, "sign-up already proved the email");

        let proof = f.code_proof("ANN@example.com").await;
        assert_eq!(
            f.issuer.sign_up("ANN@example.com", &proof).await.unwrap_err(),
            AuthError::Conflict("Email already registered".to_string())
        );
    }

    #[tokio::test]
    async fn sign_in_is_rate_limited() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        let mut request = f.request("ann@example.com", &client).await;
        request.proof = AuthProof::EmailCode(EmailCodeProof { email: "ann@example.com".into(), code: "x".into() });

        for _ in 0..5 {
            assert!(f.issuer.sign_in(&request).await.is_err());
        }
        assert_eq!(
            f.issuer.sign_in(&request).await.unwrap_err(),
            AuthError::RateLimited("Too many requests".to_string())
        );
    }

    #[tokio::test]
    async fn new_session_replaces_previous_and_sign_out_forgets() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        let first = f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();

        let mut again = f.request("ann@example.com", &client).await;
        again.refresh_token = Some(first.refresh_token.clone());
        again.session_token = first.session_token.clone();
        let second = f.issuer.sign_in(&again).await.unwrap();
        assert_eq!(f.storage.key_count(), 1);

        assert!(f.issuer.sign_out(second.session_token.as_deref().unwrap()).await.unwrap());
        assert_eq!(f.storage.key_count(), 0);
        assert!(!f.issuer.sign_out(second.session_token.as_deref().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn failed_or_locked_sign_in_keeps_previous_session() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        let first = f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();
        let session = first.session_token.clone().unwrap();
        let kid = f.issuer.authenticator().session(&session).unwrap().kid.unwrap();

        let mut bad_key = f.request("ann@example.com", &client).await;
        bad_key.session_token = Some(session.clone());
        bad_key.client_public_key = "zz".to_string();
        assert!(matches!(f.issuer.sign_in(&bad_key).await, Err(AuthError::KeyExchange(_))));

        // A new device comes back locked, so nothing replaces the session
        let mut locked = f.request("ann@example.com", &client).await;
        locked.session_token = Some(session);
        assert!(f.issuer.sign_in(&locked).await.unwrap().locked);

        assert_eq!(f.storage.key_count(), 1);
        assert!(f.issuer.keystore().get(&kid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn elevation_gates_management() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        let response = f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();
        let base = response.access_token.unwrap();

        assert!(matches!(f.issuer.revoke_all_devices(&base, None).await, Err(AuthError::Forbidden(_))));
        assert_eq!(f.issuer.list_devices(&base, Some(&response.refresh_token)).await.unwrap().len(), 1);

        let wrong = StepUp::Bypass("nope".to_string());
        assert!(matches!(f.issuer.elevate(&base, &wrong).await, Err(AuthError::Forbidden(_))));

        let sudo = f.issuer.elevate(&base, &StepUp::Bypass(response.bypass_token.clone())).await.unwrap();
        assert_eq!(f.issuer.revoke_all_devices(&sudo, Some(&response.refresh_token)).await.unwrap(), 0);

        let proof = f.code_proof("ann@example.com").await;
        assert!(f.issuer.elevate(&base, &StepUp::Proof(proof)).await.is_ok());
    }

    #[tokio::test]
    async fn passkey_sign_in_skips_the_lock() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        let first = f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();

        let sudo =
            f.issuer.elevate(first.access_token.as_deref().unwrap(), &StepUp::Bypass(first.bypass_token)).await.unwrap();
        f.issuer.register_passkey(&sudo, "cred-1", vec![1], "Key").await.unwrap();

        let mut request = f.request("ann@example.com", &client).await;
        request.proof = f.passkey_proof("ann@example.com").await;
        let second = f.issuer.sign_in(&request).await.unwrap();

        assert!(!second.locked);
        assert!(f.outbox.with_subject(crate::refresh::NEW_DEVICE_SUBJECT).is_empty());
    }

    #[tokio::test]
    async fn unlock_with_own_proof() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        f.sign_up("bob@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();
        let locked = f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();

        let bobs = f.code_proof("bob@example.com").await;
        assert!(matches!(f.issuer.unlock(&locked.refresh_token, &bobs).await, Err(AuthError::Forbidden(_))));

        let anns = f.code_proof("ann@example.com").await;
        f.issuer.unlock(&locked.refresh_token, &anns).await.unwrap();
        assert!(f.issuer.refresh(&locked.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn account_deletion_cascades_to_cache() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        let response = f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();
        let sudo = f
            .issuer
            .elevate(response.access_token.as_deref().unwrap(), &StepUp::Bypass(response.bypass_token.clone()))
            .await
            .unwrap();

        f.issuer.delete_account(&sudo).await.unwrap();

        assert_eq!(f.storage.key_count(), 0);
        assert_eq!(f.storage.refresh_token_count(), 0);
        assert!(f.issuer.keystore().cache().is_empty());
        assert!(f.issuer.lifecycle().bypass().resolve(&response.bypass_token).is_none());
        assert!(matches!(f.issuer.delete_account(&sudo).await, Err(AuthError::NotFound(_))));
    }

    #[tokio::test]
    async fn sweepers_cover_every_cache() {
        let f = fixture();
        f.sign_up("ann@example.com").await;
        let client = EphemeralKeyPair::generate([3; 32]);
        f.issuer.sign_in(&f.request("ann@example.com", &client).await).await.unwrap();
        assert_eq!(f.issuer.sweepables().len(), 6);

        f.env.advance_secs(86_400);
        let now = f.env.wall_clock_secs();
        let swept: usize = f.issuer.sweepables().iter().map(|cache| cache.sweep(now, 100)).sum();
        assert!(swept >= 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PulseConfig::default();
        let result =
            SessionIssuer::new(MemoryStorage::new(), SimEnv::new(1, 0), &config, Arc::new(Outbox::new()), Arc::new(EchoWebAuthn));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
