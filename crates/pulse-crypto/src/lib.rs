//! PULSE Cryptographic Primitives
//!
//! Cryptographic building blocks for the PULSE session protocol. Pure
//! functions with deterministic outputs. Callers provide random bytes and the
//! current time so every operation can be tested deterministically.
//!
//! # Key Lifecycle
//!
//! A session key is established once per sign-in and never mutated. Every
//! authenticated call derives a fresh, short-lived integrity key from it:
//!
//! ```text
//! Ephemeral X25519 exchange
//!        │
//!        ▼
//! SHA-256 → Session Secret (stored under an opaque key-id)
//!        │
//!        ▼
//! HKDF(salt, time window) → Integrity Key (per call, never stored)
//!        │
//!        ▼
//! ChaCha20-Poly1305 → X-Integrity token (salt ‖ ciphertext)
//! ```
//!
//! # Security
//!
//! Replay Window:
//! - Integrity keys are bound to a coarse time window
//! - Verifiers accept the current window and its two neighbours only
//! - Tokens outside that span fail authentication deterministically
//!
//! Secret Handling:
//! - The raw ECDH output is hashed before storage
//! - Derived keys and raw secrets are zeroized on drop
//! - MAC comparisons are constant-time

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
mod error;
pub mod exchange;
pub mod integrity;
pub mod primitives;
pub mod window;

pub use error::CryptoError;
pub use exchange::{EphemeralKeyPair, PUBLIC_KEY_SIZE, RawSharedSecret, SHARED_SECRET_SIZE};
pub use integrity::{CHALLENGE_SIZE, IntegrityToken, RequestContext, SALT_SIZE, TAG_SIZE};
pub use primitives::{TruncateMode, keyed_hash, salted_hash, sha256, truncate, verify_salted_hash};
pub use window::{DerivedKey, WINDOW_SHIFTS, derive_window_key, window_index};
