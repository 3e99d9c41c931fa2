//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test error handling and
//! recovery. Failures are injected before the inner call runs, so a failed
//! operation never reaches the underlying store.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use pulse_core::{DeviceState, KeyRecord, PasskeyRecord, RefreshToken, TokenId, User, UserId};

use super::{Storage, StorageError};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but randomly fails
/// operations based on a configured failure rate. Uses Arc<Mutex<>> for the RNG
/// state, making it Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<Mutex<usize>>,
    /// Stall before every write reaches the inner store
    write_latency: Duration,
}

/// Deterministic LCG so chaos runs replay with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
            write_latency: Duration::ZERO,
        }
    }

    /// Stall every write for `latency` before it reaches the inner store.
    ///
    /// The write still lands afterwards, which is how a store that commits
    /// past its caller's deadline looks from the outside.
    #[must_use]
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted, failed ones included.
    pub fn operation_count(&self) -> usize {
        *self.operation_count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the operation and roll for an injected failure.
    fn inject(&self) -> Result<(), StorageError> {
        *self.operation_count.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        let fail = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_fail(self.failure_rate);

        if fail { Err(StorageError::Io("chaotic failure injection".to_string())) } else { Ok(()) }
    }

    fn inject_write(&self) -> Result<(), StorageError> {
        if !self.write_latency.is_zero() {
            std::thread::sleep(self.write_latency);
        }
        self.inject()
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn put_key(&self, record: &KeyRecord) -> Result<(), StorageError> {
        self.inject_write()?;
        self.inner.put_key(record)
    }

    fn load_key(&self, key_id: &str) -> Result<Option<KeyRecord>, StorageError> {
        self.inject()?;
        self.inner.load_key(key_id)
    }

    fn touch_key(&self, key_id: &str, now: u64) -> Result<bool, StorageError> {
        self.inject_write()?;
        self.inner.touch_key(key_id, now)
    }

    fn delete_key(&self, key_id: &str) -> Result<bool, StorageError> {
        self.inject_write()?;
        self.inner.delete_key(key_id)
    }

    fn purge_keys_unseen_since(&self, cutoff: u64) -> Result<usize, StorageError> {
        self.inject_write()?;
        self.inner.purge_keys_unseen_since(cutoff)
    }

    fn create_user(&self, user: &User) -> Result<(), StorageError> {
        self.inject_write()?;
        self.inner.create_user(user)
    }

    fn load_user(&self, user_id: UserId) -> Result<Option<User>, StorageError> {
        self.inject()?;
        self.inner.load_user(user_id)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        self.inject()?;
        self.inner.find_user_by_email(email)
    }

    fn delete_user(&self, user_id: UserId) -> Result<bool, StorageError> {
        self.inject_write()?;
        self.inner.delete_user(user_id)
    }

    fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError> {
        self.inject_write()?;
        self.inner.insert_refresh_token(token)
    }

    fn register_device(&self, token: &RefreshToken, trusted: bool) -> Result<RefreshToken, StorageError> {
        self.inject_write()?;
        self.inner.register_device(token, trusted)
    }

    fn load_refresh_token(&self, id: TokenId) -> Result<Option<RefreshToken>, StorageError> {
        self.inject()?;
        self.inner.load_refresh_token(id)
    }

    fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>, StorageError> {
        self.inject()?;
        self.inner.find_refresh_token(token_hash)
    }

    fn list_refresh_tokens(&self, user_id: UserId) -> Result<Vec<RefreshToken>, StorageError> {
        self.inject()?;
        self.inner.list_refresh_tokens(user_id)
    }

    fn rotate_refresh_token(
        &self,
        id: TokenId,
        expected_hash: &str,
        new_hash: &str,
        now: u64,
    ) -> Result<bool, StorageError> {
        self.inject_write()?;
        self.inner.rotate_refresh_token(id, expected_hash, new_hash, now)
    }

    fn set_device_state(
        &self,
        id: TokenId,
        state: DeviceState,
        now: u64,
    ) -> Result<RefreshToken, StorageError> {
        self.inject_write()?;
        self.inner.set_device_state(id, state, now)
    }

    fn rename_device(&self, id: TokenId, name: &str) -> Result<RefreshToken, StorageError> {
        self.inject_write()?;
        self.inner.rename_device(id, name)
    }

    fn delete_refresh_token(&self, id: TokenId) -> Result<bool, StorageError> {
        self.inject_write()?;
        self.inner.delete_refresh_token(id)
    }

    fn put_passkey(&self, passkey: &PasskeyRecord) -> Result<(), StorageError> {
        self.inject_write()?;
        self.inner.put_passkey(passkey)
    }

    fn load_passkey(&self, credential_id: &str) -> Result<Option<PasskeyRecord>, StorageError> {
        self.inject()?;
        self.inner.load_passkey(credential_id)
    }

    fn list_passkeys(&self, user_id: UserId) -> Result<Vec<PasskeyRecord>, StorageError> {
        self.inject()?;
        self.inner.list_passkeys(user_id)
    }

    fn update_passkey_counter(&self, credential_id: &str, counter: u32) -> Result<(), StorageError> {
        self.inject_write()?;
        self.inner.update_passkey_counter(credential_id, counter)
    }
}
