//! Step-up authentication: email codes, passkeys and bypass tokens.
//!
//! Every proof method is a variant of [`AuthProof`], selected by an explicit
//! field on the request, and has exactly one [`ProofVerifier`]
//! implementation. [`StepUpGate`] dispatches on the variant.
//!
//! All short-lived state (codes, challenges, bypass tokens, sign-in counters)
//! lives in [`TtlCache`]s owned by the component that needs it, and is
//! reclaimed by the background sweeper.
//!
//! # Email code lifecycle
//!
//! ```text
//! send_code ──> { salted_hash, attempts: 0 }   (TTL 120s, one per email)
//!                    │
//!       verify ──────┼── right code ─────────> removed, Ok
//!                    ├── wrong code ─────────> attempts + 1, Forbidden
//!                    └── attempts >= max ────> removed, mail, RateLimited
//! ```

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use pulse_core::{AuthError, PasskeyRecord, UserId, env::Environment, normalize_email};
use pulse_crypto::{codec, salted_hash, verify_salted_hash};

use crate::{
    cache::{Sweep, TtlCache},
    config::MAX_BYPASS_TTL_SECS,
    durable::DurableStore,
    mail::Mailer,
    storage::Storage,
};

/// Subject of the mail carrying a sign-in code
pub const CODE_SUBJECT: &str = "Your sign-in code";

/// Subject of the mail sent when a code request is burned
pub const FAILED_ATTEMPT_SUBJECT: &str = "OTP Failed Attempt";

/// How a principal proves who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// One-time code mailed to the account address
    EmailCode,
    /// WebAuthn assertion
    Passkey,
}

impl FromStr for AuthMethod {
    type Err = AuthError;

    /// Parse the wire selector: `otp` or `psk`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "otp" => Ok(Self::EmailCode),
            "psk" => Ok(Self::Passkey),
            other => Err(AuthError::Validation(format!("unsupported auth method: {other}"))),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmailCode => "otp",
            Self::Passkey => "psk",
        })
    }
}

/// An email address and the code mailed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailCodeProof {
    /// Address the code was sent to
    pub email: String,
    /// Six digits
    pub code: String,
}

/// A WebAuthn assertion as received from the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasskeyAssertion {
    /// Credential id, base64url
    pub credential_id: String,
    /// `clientDataJSON`
    pub client_data: Vec<u8>,
    /// `authenticatorData`
    pub authenticator_data: Vec<u8>,
    /// Assertion signature
    pub signature: Vec<u8>,
}

/// A passkey assertion answering an earlier challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasskeyProof {
    /// Id returned by [`PasskeyVerifier::begin`]
    pub request_id: String,
    /// Browser's answer
    pub assertion: PasskeyAssertion,
}

/// Any supported proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProof {
    /// Email code
    EmailCode(EmailCodeProof),
    /// Passkey assertion
    Passkey(PasskeyProof),
}

impl AuthProof {
    /// Method this proof uses.
    pub fn method(&self) -> AuthMethod {
        match self {
            Self::EmailCode(_) => AuthMethod::EmailCode,
            Self::Passkey(_) => AuthMethod::Passkey,
        }
    }
}

/// Identity established by a proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedProof {
    /// Normalized email the proof belongs to
    pub email: String,
    /// Account, when the proof itself names one (passkeys do)
    pub user_id: Option<UserId>,
    /// How it was proven
    pub method: AuthMethod,
}

/// Checks one kind of proof.
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// Proof payload this verifier accepts.
    type Proof: Send + Sync;

    /// The method this verifier implements.
    fn method(&self) -> AuthMethod;

    /// Check the proof, consuming any one-time state it answers.
    async fn verify(&self, proof: &Self::Proof) -> Result<VerifiedProof, AuthError>;
}

#[derive(Clone)]
struct PendingCode {
    salted_hash: Vec<u8>,
    attempts: u32,
}

enum CodeCheck {
    Accepted,
    Rejected,
    Exhausted,
}

/// Email one-time codes.
#[derive(Clone)]
pub struct EmailCodeVerifier<E: Environment> {
    codes: TtlCache<String, PendingCode>,
    mailer: Arc<dyn Mailer>,
    env: E,
    ttl_secs: u64,
    max_attempts: u32,
}

impl<E: Environment> EmailCodeVerifier<E> {
    /// Create with the code lifetime and the number of wrong codes tolerated.
    pub fn new(mailer: Arc<dyn Mailer>, env: E, ttl_secs: u64, max_attempts: u32) -> Self {
        Self { codes: TtlCache::new(), mailer, env, ttl_secs, max_attempts }
    }

    /// Codes awaiting verification, expired ones included.
    pub fn pending_count(&self) -> usize {
        self.codes.len()
    }

    /// Pending codes, for registering with the sweeper.
    pub fn sweepable(&self) -> Arc<dyn Sweep> {
        Arc::new(self.codes.clone())
    }

    /// Generate, store and mail a six-digit code.
    ///
    /// # Errors
    ///
    /// - `Validation`: a code for this address is still pending
    /// - `Internal`: the mail could not be handed off; nothing stays pending
    pub async fn send_code(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let now = self.env.wall_clock_secs();

        let code = format!("{:06}", self.env.random_u64() % 1_000_000);
        let pending = PendingCode { salted_hash: salted_hash(code.as_bytes(), self.env.random_array()), attempts: 0 };

        if !self.codes.insert_if_absent(email.clone(), pending, self.ttl_secs, now) {
            return Err(AuthError::Validation("A code was already sent, try again later".to_string()));
        }

        let text = format!("Your sign-in code is {code}. It expires in {} minutes.", self.ttl_secs.div_ceil(60));
        let html = format!("<p>Your sign-in code is <strong>{code}</strong>.</p>");
        if !self.mailer.send(&email, CODE_SUBJECT, &text, &html).await {
            self.codes.remove(&email);
            tracing::error!(%email, "failed to mail sign-in code");
            return Err(AuthError::Internal("mail delivery failed".to_string()));
        }

        tracing::debug!(%email, "sign-in code sent");
        Ok(())
    }
}

#[async_trait]
impl<E: Environment> ProofVerifier for EmailCodeVerifier<E> {
    type Proof = EmailCodeProof;

    fn method(&self) -> AuthMethod {
        AuthMethod::EmailCode
    }

    async fn verify(&self, proof: &EmailCodeProof) -> Result<VerifiedProof, AuthError> {
        let email = normalize_email(&proof.email);
        let now = self.env.wall_clock_secs();
        let max_attempts = self.max_attempts;

        let check = self.codes.update(&email, now, |pending| {
            if pending.attempts >= max_attempts {
                (CodeCheck::Exhausted, true)
            } else if verify_salted_hash(proof.code.trim().as_bytes(), &pending.salted_hash) {
                (CodeCheck::Accepted, true)
            } else {
                pending.attempts += 1;
                (CodeCheck::Rejected, false)
            }
        });

        match check {
            None => Err(AuthError::NotFound("Request expired".to_string())),
            Some(CodeCheck::Exhausted) => {
                tracing::warn!(%email, "sign-in code attempts exhausted");
                let text = "Someone entered too many wrong sign-in codes for your account.";
                if !self.mailer.send(&email, FAILED_ATTEMPT_SUBJECT, text, &format!("<p>{text}</p>")).await {
                    tracing::error!(%email, "failed to mail exhausted-attempts notice");
                }
                Err(AuthError::RateLimited("Maximum attempts achieved".to_string()))
            },
            Some(CodeCheck::Rejected) => Err(AuthError::Forbidden("Invalid code".to_string())),
            Some(CodeCheck::Accepted) => {
                Ok(VerifiedProof { email, user_id: None, method: AuthMethod::EmailCode })
            },
        }
    }
}

/// What the relying party expects of an assertion.
#[derive(Debug, Clone, Copy)]
pub struct AssertionExpectations<'a> {
    /// Challenge issued by [`PasskeyVerifier::begin`]
    pub challenge: &'a [u8],
    /// Expected origin
    pub origin: &'a str,
    /// Stored credential public key
    pub public_key: &'a [u8],
    /// Last seen signature counter
    pub prev_counter: u32,
}

/// External WebAuthn verification. The core never parses assertions itself.
pub trait WebAuthnVerifier: Send + Sync + 'static {
    /// Verify an assertion and return the new signature counter.
    ///
    /// Any mismatch (challenge, origin, signature, counter regression) is an
    /// `Err` with a reason for logs.
    fn assertion_result(
        &self,
        assertion: &PasskeyAssertion,
        expected: &AssertionExpectations<'_>,
    ) -> Result<u32, String>;
}

/// Challenge handed to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasskeyChallenge {
    /// Quote this back in [`PasskeyProof::request_id`]
    pub request_id: String,
    /// Random challenge, base64url
    pub challenge: String,
    /// Credentials the browser may use; empty for discoverable credentials
    pub allow_credentials: Vec<String>,
}

#[derive(Clone)]
struct PendingChallenge {
    challenge: [u8; 32],
    user_id: Option<UserId>,
}

/// Passkey assertions against stored credentials.
#[derive(Clone)]
pub struct PasskeyVerifier<S: Storage, E: Environment> {
    durable: DurableStore<S, E>,
    challenges: TtlCache<String, PendingChallenge>,
    webauthn: Arc<dyn WebAuthnVerifier>,
    env: E,
    origin: String,
    ttl_secs: u64,
}

impl<S: Storage, E: Environment> PasskeyVerifier<S, E> {
    /// Create over the durable store and an external verifier.
    pub fn new(
        durable: DurableStore<S, E>,
        webauthn: Arc<dyn WebAuthnVerifier>,
        env: E,
        origin: String,
        ttl_secs: u64,
    ) -> Self {
        Self { durable, challenges: TtlCache::new(), webauthn, env, origin, ttl_secs }
    }

    /// Challenges awaiting an assertion, expired ones included.
    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }

    /// Pending challenges, for registering with the sweeper.
    pub fn sweepable(&self) -> Arc<dyn Sweep> {
        Arc::new(self.challenges.clone())
    }

    /// Issue a challenge, optionally scoped to one account's credentials.
    pub async fn begin(&self, email: Option<&str>) -> Result<PasskeyChallenge, AuthError> {
        let now = self.env.wall_clock_secs();

        let (user_id, allow_credentials) = match email {
            Some(email) => {
                let email = normalize_email(email);
                let user = self.durable.read(move |s| s.find_user_by_email(&email)).await?;
                match user {
                    Some(user) => {
                        let id = user.id;
                        let passkeys = self.durable.read(move |s| s.list_passkeys(id)).await?;
                        (Some(id), passkeys.into_iter().map(|p| p.credential_id).collect())
                    },
                    // Same shape as a real account so callers cannot probe for emails
                    None => (None, Vec::new()),
                }
            },
            None => (None, Vec::new()),
        };

        let request_id = codec::to_hex(&self.env.random_array::<16>());
        let challenge = self.env.random_array::<32>();
        self.challenges.insert(request_id.clone(), PendingChallenge { challenge, user_id }, self.ttl_secs, now);

        Ok(PasskeyChallenge { request_id, challenge: codec::to_base64url(&challenge), allow_credentials })
    }

    /// Register a credential the external verifier already attested.
    pub async fn register(
        &self,
        user_id: UserId,
        credential_id: &str,
        public_key: Vec<u8>,
        name: &str,
    ) -> Result<(), AuthError> {
        let passkey = PasskeyRecord {
            credential_id: credential_id.to_string(),
            user_id,
            public_key,
            sign_count: 0,
            name: name.to_string(),
            created_at: self.env.wall_clock_secs(),
        };
        self.durable.write(move |s| s.put_passkey(&passkey)).await?;

        tracing::info!(%user_id, "passkey registered");
        Ok(())
    }
}

#[async_trait]
impl<S: Storage, E: Environment> ProofVerifier for PasskeyVerifier<S, E> {
    type Proof = PasskeyProof;

    fn method(&self) -> AuthMethod {
        AuthMethod::Passkey
    }

    async fn verify(&self, proof: &PasskeyProof) -> Result<VerifiedProof, AuthError> {
        let now = self.env.wall_clock_secs();
        let Some(pending) = self.challenges.get(&proof.request_id, now) else {
            return Err(AuthError::Validation("Auth request expired".to_string()));
        };

        let credential_id = proof.assertion.credential_id.clone();
        let Some(passkey) = self.durable.read(move |s| s.load_passkey(&credential_id)).await? else {
            return Err(AuthError::NotFound("Passkey not found".to_string()));
        };

        if pending.user_id.is_some_and(|expected| expected != passkey.user_id) {
            tracing::warn!(user_id = %passkey.user_id, "passkey does not belong to the challenged account");
            return Err(AuthError::Authentication("Authentication failed".to_string()));
        }

        let expected = AssertionExpectations {
            challenge: &pending.challenge,
            origin: &self.origin,
            public_key: &passkey.public_key,
            prev_counter: passkey.sign_count,
        };
        let counter = self.webauthn.assertion_result(&proof.assertion, &expected).map_err(|reason| {
            tracing::warn!(user_id = %passkey.user_id, %reason, "passkey assertion rejected");
            AuthError::Authentication("Authentication failed".to_string())
        })?;

        let credential_id = passkey.credential_id.clone();
        self.durable.write_idempotent(move |s| s.update_passkey_counter(&credential_id, counter)).await?;
        self.challenges.remove(&proof.request_id);

        let user_id = passkey.user_id;
        let Some(user) = self.durable.read(move |s| s.load_user(user_id)).await? else {
            return Err(AuthError::NotFound("User not found".to_string()));
        };

        Ok(VerifiedProof { email: user.email, user_id: Some(user.id), method: AuthMethod::Passkey })
    }
}

/// Short-lived tokens letting a client that just authenticated skip one
/// immediate step-up. Cache-only, never durable.
#[derive(Clone)]
pub struct BypassTokens<E: Environment> {
    tokens: TtlCache<String, UserId>,
    env: E,
    ttl_secs: u64,
}

impl<E: Environment> BypassTokens<E> {
    /// Create with a TTL, clamped to [`MAX_BYPASS_TTL_SECS`].
    pub fn new(env: E, ttl_secs: u64) -> Self {
        Self { tokens: TtlCache::new(), env, ttl_secs: ttl_secs.min(MAX_BYPASS_TTL_SECS) }
    }

    /// Live tokens, for registering with the sweeper.
    pub fn live(&self) -> &TtlCache<String, UserId> {
        &self.tokens
    }

    /// Mint a token bound to `user_id`: hex timestamp followed by 16 random
    /// bytes in hex.
    pub fn mint(&self, user_id: UserId) -> String {
        let now = self.env.wall_clock_secs();
        let token = format!("{now:x}{}", codec::to_hex(&self.env.random_array::<16>()));
        self.tokens.insert(token.clone(), user_id, self.ttl_secs, now);
        token
    }

    /// The user a live token is bound to. Tokens are not consumed.
    pub fn resolve(&self, token: &str) -> Option<UserId> {
        self.tokens.get(&token.trim().to_string(), self.env.wall_clock_secs())
    }
}

/// Per-email sign-in attempt limit over a fixed window.
#[derive(Clone)]
pub struct SignInLimiter<E: Environment> {
    attempts: TtlCache<String, u32>,
    env: E,
    limit: u32,
    window_secs: u64,
}

impl<E: Environment> SignInLimiter<E> {
    /// Allow `limit` attempts per `window_secs`.
    pub fn new(env: E, limit: u32, window_secs: u64) -> Self {
        Self { attempts: TtlCache::new(), env, limit, window_secs }
    }

    /// Counters, for registering with the sweeper.
    pub fn counters(&self) -> &TtlCache<String, u32> {
        &self.attempts
    }

    /// Count one attempt.
    ///
    /// # Errors
    ///
    /// - `RateLimited`: the window's budget is spent
    pub fn check(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let now = self.env.wall_clock_secs();
        let limit = self.limit;
        let count = |n: &mut u32| {
            if *n >= limit {
                (false, false)
            } else {
                *n += 1;
                (true, false)
            }
        };

        let allowed = match self.attempts.update(&email, now, count) {
            Some(allowed) => allowed,
            None if self.attempts.insert_if_absent(email.clone(), 1, self.window_secs, now) => true,
            None => self.attempts.update(&email, now, count).unwrap_or(true),
        };

        if allowed {
            Ok(())
        } else {
            tracing::warn!(%email, "sign-in rate limit reached");
            Err(AuthError::RateLimited("Too many requests".to_string()))
        }
    }

    /// Forget the attempts after a successful sign-in.
    pub fn reset(&self, email: &str) {
        self.attempts.remove(&normalize_email(email));
    }
}

/// Dispatches a proof to the verifier for its method.
#[derive(Clone)]
pub struct StepUpGate<S: Storage, E: Environment> {
    email: EmailCodeVerifier<E>,
    passkey: PasskeyVerifier<S, E>,
}

impl<S: Storage, E: Environment> StepUpGate<S, E> {
    /// Compose the per-method verifiers.
    pub fn new(email: EmailCodeVerifier<E>, passkey: PasskeyVerifier<S, E>) -> Self {
        Self { email, passkey }
    }

    /// Email-code verifier, for sending codes.
    pub fn email(&self) -> &EmailCodeVerifier<E> {
        &self.email
    }

    /// Passkey verifier, for issuing challenges and registering credentials.
    pub fn passkey(&self) -> &PasskeyVerifier<S, E> {
        &self.passkey
    }

    /// Verify any proof.
    pub async fn verify(&self, proof: &AuthProof) -> Result<VerifiedProof, AuthError> {
        match proof {
            AuthProof::EmailCode(proof) => self.email.verify(proof).await,
            AuthProof::Passkey(proof) => self.passkey.verify(proof).await,
        }
    }
}
