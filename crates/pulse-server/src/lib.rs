//! PULSE session-security server.
//!
//! Stateful half of the protocol: everything that touches storage, caches or
//! the clock. Pure types and cryptography live in [`pulse_core`] and
//! [`pulse_crypto`].
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────┐
//!                 │ SessionIssuer │  sign-in, refresh, unlock, elevate, manage
//!                 └───────┬───────┘
//!      ┌──────────────┬───┴──────────┬─────────────────────┐
//!      ↓              ↓              ↓                     ↓
//! HandshakeEngine  StepUpGate  RefreshTokenLifecycle  RequestAuthenticator
//!      │              │              │                     │
//!      │              │              │                IntegrityGuard
//!      ↓              │              │                     │
//!   KeyStore <────────┼──────────────┼─────────────────────┘
//!      │              ↓              ↓
//!      └──────────> DurableStore (timeouts, retry) ──> Storage
//! ```
//!
//! Short-lived state (hot keys, replay salts, codes, challenges, bypass
//! tokens, sign-in counters) lives in [`TtlCache`]s reclaimed by one owned
//! [`CacheSweeper`] task.
//!
//! # Components
//!
//! - [`SessionIssuer`]: the entry point request handlers call
//! - [`Storage`]: durable system of record ([`MemoryStorage`],
//!   [`RedbStorage`], [`ChaoticStorage`] for fault injection)
//! - [`SystemEnv`]: production environment (OS time, OS RNG)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod authenticator;
mod cache;
mod config;
mod durable;
mod error;
mod guard;
mod handshake;
mod issuer;
mod keystore;
mod mail;
mod refresh;
mod step_up;
pub mod storage;
mod system_env;

pub use authenticator::RequestAuthenticator;
pub use cache::{CacheSweeper, MAX_TTL_SECS, Sweep, TtlCache};
pub use config::{MAX_BYPASS_TTL_SECS, PulseConfig, RetryPolicy};
pub use durable::DurableStore;
pub use error::ServerError;
pub use guard::{GuardConfig, IntegrityGuard, Verdict};
pub use handshake::{HandshakeEngine, HandshakeOutcome, PreparedHandshake, client_shared_secret};
pub use issuer::{SessionIssuer, SignInRequest, SignInResponse, StepUp};
pub use keystore::{CachedKey, KeyStore, Secret};
pub use mail::{LogMailer, Mailer, Outbox, SentMail};
pub use refresh::{DeviceView, NEW_DEVICE_SUBJECT, RefreshTokenLifecycle, Rotation, SignInGrant, TokenLifetimes};
pub use step_up::{
    AssertionExpectations, AuthMethod, AuthProof, BypassTokens, CODE_SUBJECT, EmailCodeProof, EmailCodeVerifier,
    FAILED_ATTEMPT_SUBJECT, PasskeyAssertion, PasskeyChallenge, PasskeyProof, PasskeyVerifier, ProofVerifier,
    SignInLimiter, StepUpGate, VerifiedProof, WebAuthnVerifier,
};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
