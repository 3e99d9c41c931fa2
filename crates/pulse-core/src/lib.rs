//! PULSE protocol core.
//!
//! Types shared by every runtime of the session-security core:
//!
//! - [`env::Environment`]: time and randomness, injected everywhere
//! - [`AuthError`]: the one error taxonomy callers observe
//! - Identifiers and persisted records
//! - [`DeviceState`]: the device-trust state machine
//! - [`TokenSigner`]: signed session and access tokens
//!
//! Nothing here performs I/O. The server crate owns storage, caching and the
//! async orchestration built on top of these types.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod device;
pub mod env;
mod error;
pub mod ids;
pub mod records;
mod sim_env;
pub mod token;

pub use device::DeviceState;
pub use error::{ACCESS_DENIED, AuthError};
pub use ids::{KEY_ID_SIZE, KeyId, TokenId, UserId};
pub use records::{DeviceContext, KeyRecord, PasskeyRecord, RefreshToken, Role, User, normalize_email};
pub use sim_env::SimEnv;
pub use token::{Claims, TokenPurpose, TokenSigner};
