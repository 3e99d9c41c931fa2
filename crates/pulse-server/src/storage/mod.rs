//! Durable storage abstraction for the session core
//!
//! Trait-based abstraction for persisting session secrets, accounts, device
//! refresh tokens and passkeys. The trait is synchronous; the async I/O
//! boundary ([`crate::DurableStore`]) runs calls on the blocking pool under a
//! timeout.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use pulse_core::{DeviceState, KeyRecord, PasskeyRecord, RefreshToken, TokenId, User, UserId};

pub use self::redb::RedbStorage;

/// System of record for everything that must survive a restart.
///
/// Must be Clone (shared by every component), Send + Sync (thread-safe), and
/// synchronous (no async methods). Implementations share internal state via
/// Arc, so clones access the same underlying storage.
///
/// # Invariants
///
/// - Key-ids, emails, token hashes and credential ids are unique. Violations
///   fail with `StorageError::Conflict` and change nothing.
/// - Every write is a single atomic operation; a failed call leaves no
///   partial record behind.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Insert a session secret.
    ///
    /// Idempotent: re-inserting an identical record succeeds. A different
    /// secret under an existing key-id is a `Conflict`; secrets are never
    /// overwritten.
    fn put_key(&self, record: &KeyRecord) -> Result<(), StorageError>;

    /// Load a session secret by storage id.
    fn load_key(&self, key_id: &str) -> Result<Option<KeyRecord>, StorageError>;

    /// Update `last_seen_at`. Returns false if the key does not exist.
    fn touch_key(&self, key_id: &str, now: u64) -> Result<bool, StorageError>;

    /// Delete a session secret. Returns false if it did not exist.
    fn delete_key(&self, key_id: &str) -> Result<bool, StorageError>;

    /// Delete every key whose `last_seen_at` is older than `cutoff`.
    fn purge_keys_unseen_since(&self, cutoff: u64) -> Result<usize, StorageError>;

    /// Create an account. `Conflict` if the id or email is taken.
    fn create_user(&self, user: &User) -> Result<(), StorageError>;

    /// Load an account by id.
    fn load_user(&self, user_id: UserId) -> Result<Option<User>, StorageError>;

    /// Load an account by normalized email.
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    /// Delete an account and cascade to its keys, refresh tokens and
    /// passkeys. Returns false if it did not exist.
    fn delete_user(&self, user_id: UserId) -> Result<bool, StorageError>;

    /// Insert a refresh-token row. `Conflict` on a duplicate id or hash.
    fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError>;

    /// Insert the row of a device signing in for the first time and return it
    /// as stored.
    ///
    /// `token.state` is ignored. The row is stored `Active` when `trusted` or
    /// when the user has no other rows, `Locked` otherwise. The check and the
    /// insert are one atomic step, so of two devices registering concurrently
    /// on an empty account only one is trusted. `Conflict` on a duplicate id
    /// or hash.
    fn register_device(&self, token: &RefreshToken, trusted: bool) -> Result<RefreshToken, StorageError>;

    /// Load a row by id.
    fn load_refresh_token(&self, id: TokenId) -> Result<Option<RefreshToken>, StorageError>;

    /// Load a row by token hash.
    fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>, StorageError>;

    /// All rows belonging to a user, oldest first.
    fn list_refresh_tokens(&self, user_id: UserId) -> Result<Vec<RefreshToken>, StorageError>;

    /// Replace the hash of row `id`, but only if it still equals
    /// `expected_hash`.
    ///
    /// Returns false (and changes nothing) if the row is gone or its hash has
    /// moved on. The old hash stops resolving in the same atomic step the new
    /// one starts resolving.
    fn rotate_refresh_token(
        &self,
        id: TokenId,
        expected_hash: &str,
        new_hash: &str,
        now: u64,
    ) -> Result<bool, StorageError>;

    /// Set the trust state of row `id` and bump `last_used_at`. `NotFound` if
    /// absent.
    fn set_device_state(
        &self,
        id: TokenId,
        state: DeviceState,
        now: u64,
    ) -> Result<RefreshToken, StorageError>;

    /// Rename row `id`. `NotFound` if absent.
    fn rename_device(&self, id: TokenId, name: &str) -> Result<RefreshToken, StorageError>;

    /// Delete row `id`. Returns false if it did not exist.
    fn delete_refresh_token(&self, id: TokenId) -> Result<bool, StorageError>;

    /// Register a passkey. `Conflict` if the credential id exists.
    fn put_passkey(&self, passkey: &PasskeyRecord) -> Result<(), StorageError>;

    /// Load a passkey by credential id.
    fn load_passkey(&self, credential_id: &str) -> Result<Option<PasskeyRecord>, StorageError>;

    /// All passkeys belonging to a user.
    fn list_passkeys(&self, user_id: UserId) -> Result<Vec<PasskeyRecord>, StorageError>;

    /// Persist the signature counter after a successful assertion.
    fn update_passkey_counter(&self, credential_id: &str, counter: u32) -> Result<(), StorageError>;
}
