//! Hot in-memory cache with per-entry TTL, and the background sweeper that
//! evicts expired entries.
//!
//! Expiry is checked against the caller-supplied wall clock on every read, so
//! an expired entry is never returned even if the sweeper has not reached it
//! yet. The sweeper only reclaims memory.
//!
//! # Sweeping
//!
//! ```text
//!  lock ─ snapshot expired keys ─ unlock
//!    │
//!    └─> for each chunk of `batch` keys:
//!          lock ─ re-check expiry, evict ─ unlock
//! ```
//!
//! The lock is never held across the whole sweep, so request tasks interleave
//! with a large eviction.

#![allow(clippy::disallowed_types, reason = "Short critical sections, never held across await")]

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use pulse_core::env::Environment;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

/// Upper bound on any cache TTL: 24 hours.
pub const MAX_TTL_SECS: u64 = 24 * 3_600;

struct Entry<V> {
    value: V,
    expires_at: u64,
}

/// Mutex-guarded map with per-entry expiry.
///
/// Clones share the same entries.
pub struct TtlCache<K, V> {
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self { entries: Arc::clone(&self.entries) }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Empty cache.
    pub fn new() -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &K, now: u64) -> Option<V> {
        let mut entries = self.lock();
        if entries.get(key)?.expires_at <= now {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or replace. TTL is clamped to [`MAX_TTL_SECS`].
    pub fn insert(&self, key: K, value: V, ttl_secs: u64, now: u64) {
        let expires_at = now.saturating_add(ttl_secs.min(MAX_TTL_SECS));
        self.lock().insert(key, Entry { value, expires_at });
    }

    /// Atomic check-and-set. Returns false, changing nothing, if a live entry
    /// already exists.
    pub fn insert_if_absent(&self, key: K, value: V, ttl_secs: u64, now: u64) -> bool {
        let mut entries = self.lock();
        if entries.get(&key).is_some_and(|entry| entry.expires_at > now) {
            return false;
        }
        let expires_at = now.saturating_add(ttl_secs.min(MAX_TTL_SECS));
        entries.insert(key, Entry { value, expires_at });
        true
    }

    /// Remove and return the value, live or not.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key).map(|entry| entry.value)
    }

    /// Mutate a live entry in place under the lock.
    ///
    /// `f` returns its result and whether the entry should be removed
    /// afterwards. Returns `None` if there was no live entry. The expiry is
    /// left unchanged.
    pub fn update<R>(&self, key: &K, now: u64, f: impl FnOnce(&mut V) -> (R, bool)) -> Option<R> {
        let mut entries = self.lock();
        if entries.get(key)?.expires_at <= now {
            entries.remove(key);
            return None;
        }

        let entry = entries.get_mut(key)?;
        let (result, remove) = f(&mut entry.value);
        if remove {
            entries.remove(key);
        }
        Some(result)
    }

    /// Remove every entry matching `pred`, live or not. Returns how many.
    pub fn remove_where(&self, mut pred: impl FnMut(&K, &V) -> bool) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, entry| !pred(key, &entry.value));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Evict every entry expired at `now`, `batch` keys per lock acquisition.
    pub fn evict_expired(&self, now: u64, batch: usize) -> usize {
        let expired: Vec<K> = self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut evicted = 0;
        for chunk in expired.chunks(batch.max(1)) {
            let mut entries = self.lock();
            for key in chunk {
                // A concurrent insert may have refreshed the entry since the snapshot
                if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
                    entries.remove(key);
                    evicted += 1;
                }
            }
        }
        evicted
    }
}

/// Something the background sweeper can reclaim memory from.
pub trait Sweep: Send + Sync + 'static {
    /// Evict expired entries. Returns how many were removed.
    fn sweep(&self, now: u64, batch: usize) -> usize;
}

impl<K, V> Sweep for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn sweep(&self, now: u64, batch: usize) -> usize {
        self.evict_expired(now, batch)
    }
}

/// Owned background task sweeping a set of caches on a fixed interval.
///
/// Created at startup, stopped with [`CacheSweeper::shutdown`]. Dropping it
/// without shutting down detaches the task.
pub struct CacheSweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    /// Start sweeping `caches` every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<E: Environment>(
        env: E,
        caches: Vec<Arc<dyn Sweep>>,
        interval: Duration,
        batch: usize,
    ) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = env.wall_clock_secs();
                        let evicted: usize = caches.iter().map(|cache| cache.sweep(now, batch)).sum();
                        if evicted > 0 {
                            tracing::debug!(evicted, "swept expired cache entries");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }

            tracing::debug!("cache sweeper stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop the task and wait for it to finish its current pass.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "cache sweeper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use pulse_core::SimEnv;

    use super::*;

    #[test]
    fn expired_entries_are_invisible() {
        let cache = TtlCache::new();
        cache.insert("a", 1, 10, 100);

        assert_eq!(cache.get(&"a", 109), Some(1));
        assert_eq!(cache.get(&"a", 110), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_is_clamped() {
        let cache = TtlCache::new();
        cache.insert("a", 1, u64::MAX, 0);

        assert_eq!(cache.get(&"a", MAX_TTL_SECS - 1), Some(1));
        assert_eq!(cache.get(&"a", MAX_TTL_SECS), None);
    }

    #[test]
    fn insert_if_absent_is_check_and_set() {
        let cache = TtlCache::new();

        assert!(cache.insert_if_absent("salt", (), 30, 0));
        assert!(!cache.insert_if_absent("salt", (), 30, 29));
        assert!(cache.insert_if_absent("salt", (), 30, 30));
    }

    #[test]
    fn update_can_remove() {
        let cache = TtlCache::new();
        cache.insert("otp", 0u32, 60, 0);

        assert_eq!(cache.update(&"otp", 1, |n| { *n += 1; (*n, false) }), Some(1));
        assert_eq!(cache.update(&"otp", 2, |n| (*n, true)), Some(1));
        assert_eq!(cache.get(&"otp", 3), None);
        assert_eq!(cache.update(&"missing", 3, |n: &mut u32| (*n, false)), None);
    }

    #[test]
    fn remove_where_matches_values() {
        let cache = TtlCache::new();
        for i in 0..6 {
            cache.insert(i, i % 2, 60, 0);
        }

        assert_eq!(cache.remove_where(|_, parity| *parity == 1), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn evict_in_batches() {
        let cache = TtlCache::new();
        for i in 0..10 {
            cache.insert(i, i, if i < 7 { 5 } else { 500 }, 0);
        }

        assert_eq!(cache.evict_expired(10, 3), 7);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_and_shuts_down() {
        let env = SimEnv::new(1, 1_000);
        let cache: TtlCache<u32, u32> = TtlCache::new();
        cache.insert(1, 1, 5, 1_000);
        cache.insert(2, 2, 500, 1_000);

        let sweeper =
            CacheSweeper::spawn(env.clone(), vec![Arc::new(cache.clone())], Duration::from_secs(60), 16);

        env.advance_secs(10);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(cache.len(), 1);
        sweeper.shutdown().await;
    }
}
