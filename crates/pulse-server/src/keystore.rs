//! Tiered lookup of session secrets by key-id.
//!
//! ```text
//!  get(kid) ──> hot cache ──hit──> secret
//!                  │ miss
//!                  ↓
//!             durable store ──miss──> None
//!                  │ hit
//!                  ├─> touch last_seen_at (best effort)
//!                  ├─> seed hot cache
//!                  └─> secret
//! ```
//!
//! Writes go to the durable store first and seed the cache only after the
//! durable write succeeded, so the cache is never the sole copy of a secret.
//! Both tiers are keyed by the peppered storage id, never the raw key-id.

use std::sync::Arc;

use pulse_core::{AuthError, KeyId, KeyRecord, UserId, env::Environment};
use zeroize::Zeroizing;

use crate::{cache::TtlCache, durable::DurableStore, storage::Storage};

/// A session secret handed out of the store. Wiped on drop.
pub type Secret = Zeroizing<[u8; 32]>;

/// Hot-tier entry: the secret and the account it belongs to.
#[derive(Clone)]
pub struct CachedKey {
    secret: Secret,
    user_id: Option<UserId>,
}

/// Read-through, write-through store of session secrets.
///
/// Clone is cheap; clones share both tiers.
#[derive(Clone)]
pub struct KeyStore<S: Storage, E: Environment> {
    pepper: Arc<Zeroizing<[u8; 32]>>,
    durable: DurableStore<S, E>,
    cache: TtlCache<String, CachedKey>,
    cache_ttl_secs: u64,
    env: E,
}

impl<S: Storage, E: Environment> KeyStore<S, E> {
    /// Create over a durable store.
    pub fn new(durable: DurableStore<S, E>, env: E, pepper: [u8; 32], cache_ttl_secs: u64) -> Self {
        Self {
            pepper: Arc::new(Zeroizing::new(pepper)),
            durable,
            cache: TtlCache::new(),
            cache_ttl_secs,
            env,
        }
    }

    /// The hot tier, for registering with the sweeper.
    pub fn cache(&self) -> &TtlCache<String, CachedKey> {
        &self.cache
    }

    fn storage_id(&self, kid: &KeyId) -> String {
        kid.storage_id(self.pepper.as_slice())
    }

    /// Resolve a key-id to its secret.
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable`: cache miss and the durable store is down
    pub async fn get(&self, kid: &KeyId) -> Result<Option<Secret>, AuthError> {
        let id = self.storage_id(kid);
        let now = self.env.wall_clock_secs();

        if let Some(cached) = self.cache.get(&id, now) {
            return Ok(Some(cached.secret));
        }

        let lookup = id.clone();
        let Some(record) = self.durable.read(move |s| s.load_key(&lookup)).await? else {
            tracing::debug!(%kid, "session secret not found");
            return Ok(None);
        };

        let touch = id.clone();
        if let Err(err) = self.durable.write_idempotent(move |s| s.touch_key(&touch, now)).await {
            tracing::warn!(%kid, error = %err, "failed to refresh key freshness");
        }

        let secret = Zeroizing::new(*record.secret());
        let cached = CachedKey { secret: secret.clone(), user_id: record.user_id };
        self.cache.insert(id, cached, self.cache_ttl_secs, now);
        Ok(Some(secret))
    }

    /// Persist a new secret and seed the cache.
    ///
    /// Idempotent for the same secret. A different secret under an existing
    /// key-id is a `Conflict`.
    pub async fn set(&self, kid: &KeyId, secret: &[u8; 32], user_id: Option<UserId>) -> Result<(), AuthError> {
        let id = self.storage_id(kid);
        let now = self.env.wall_clock_secs();

        let record = KeyRecord::new(id.clone(), user_id, *secret, now);
        self.durable.write_idempotent(move |s| s.put_key(&record)).await?;

        let cached = CachedKey { secret: Zeroizing::new(*secret), user_id };
        self.cache.insert(id, cached, self.cache_ttl_secs, now);
        tracing::debug!(%kid, user_id = ?user_id, "session secret stored");
        Ok(())
    }

    /// Forget a secret in both tiers. Returns false if it did not exist.
    pub async fn delete(&self, kid: &KeyId) -> Result<bool, AuthError> {
        let id = self.storage_id(kid);

        let target = id.clone();
        let existed = self.durable.write_idempotent(move |s| s.delete_key(&target)).await?;
        let cached = self.cache.remove(&id).is_some();

        Ok(existed || cached)
    }

    /// Drop every cached secret of an account whose durable rows are gone.
    pub fn evict_user(&self, user_id: UserId) -> usize {
        self.cache.remove_where(|_, cached| cached.user_id == Some(user_id))
    }

    /// Purge durable records not seen for `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: u64) -> Result<usize, AuthError> {
        let cutoff = self.env.wall_clock_secs().saturating_sub(max_idle_secs);
        let purged = self.durable.write_idempotent(move |s| s.purge_keys_unseen_since(cutoff)).await?;

        if purged > 0 {
            tracing::info!(purged, cutoff, "purged stale session secrets");
        }
        Ok(purged)
    }
}
