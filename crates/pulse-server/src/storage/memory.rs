#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use pulse_core::{DeviceState, KeyRecord, PasskeyRecord, RefreshToken, TokenId, User, UserId};

use super::{Storage, StorageError};

/// In-memory storage implementation for testing and simulation
///
/// Uses `HashMap`s with secondary indexes for emails and token hashes. All
/// state is wrapped in `Arc<Mutex<>>` to allow Clone and concurrent access.
/// Every trait method takes the lock exactly once, so each call is atomic
/// with respect to every other call. A poisoned lock is recovered: every
/// mutation below either completes or returns before touching state.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Session secrets by storage id
    keys: HashMap<String, KeyRecord>,

    /// Accounts by id
    users: HashMap<UserId, User>,

    /// Email -> account id (unique index)
    emails: HashMap<String, UserId>,

    /// Refresh-token rows by id
    tokens: HashMap<TokenId, RefreshToken>,

    /// Token hash -> row id (unique index)
    token_hashes: HashMap<String, TokenId>,

    /// Passkeys by credential id
    passkeys: HashMap<String, PasskeyRecord>,
}

impl MemoryStorageInner {
    fn insert_token(&mut self, token: RefreshToken) -> Result<(), StorageError> {
        if self.tokens.contains_key(&token.id) {
            return Err(StorageError::Conflict(format!("refresh token id {}", token.id)));
        }
        if self.token_hashes.contains_key(&token.token_hash) {
            return Err(StorageError::Conflict("refresh token hash".to_string()));
        }

        self.token_hashes.insert(token.token_hash.clone(), token.id);
        self.tokens.insert(token.id, token);
        Ok(())
    }
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    /// Number of stored session secrets.
    ///
    /// Useful for debugging and testing.
    pub fn key_count(&self) -> usize {
        self.lock().keys.len()
    }

    /// Number of stored refresh-token rows.
    ///
    /// Useful for debugging and testing.
    pub fn refresh_token_count(&self) -> usize {
        self.lock().tokens.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_oldest_first(mut tokens: Vec<RefreshToken>) -> Vec<RefreshToken> {
    tokens.sort_by_key(|t| (t.created_at, t.id));
    tokens
}

impl Storage for MemoryStorage {
    fn put_key(&self, record: &KeyRecord) -> Result<(), StorageError> {
        let mut inner = self.lock();

        if let Some(existing) = inner.keys.get(&record.key_id) {
            if existing.secret() != record.secret() {
                return Err(StorageError::Conflict(format!("key id {}", record.key_id)));
            }
            return Ok(());
        }

        inner.keys.insert(record.key_id.clone(), record.clone());
        Ok(())
    }

    fn load_key(&self, key_id: &str) -> Result<Option<KeyRecord>, StorageError> {
        Ok(self.lock().keys.get(key_id).cloned())
    }

    fn touch_key(&self, key_id: &str, now: u64) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let Some(record) = inner.keys.get_mut(key_id) else {
            return Ok(false);
        };
        record.last_seen_at = record.last_seen_at.max(now);
        Ok(true)
    }

    fn delete_key(&self, key_id: &str) -> Result<bool, StorageError> {
        Ok(self.lock().keys.remove(key_id).is_some())
    }

    fn purge_keys_unseen_since(&self, cutoff: u64) -> Result<usize, StorageError> {
        let mut inner = self.lock();
        let before = inner.keys.len();
        inner.keys.retain(|_, record| record.last_seen_at >= cutoff);
        Ok(before - inner.keys.len())
    }

    fn create_user(&self, user: &User) -> Result<(), StorageError> {
        let mut inner = self.lock();

        if inner.users.contains_key(&user.id) {
            return Err(StorageError::Conflict(format!("user id {}", user.id)));
        }
        if inner.emails.contains_key(&user.email) {
            return Err(StorageError::Conflict("email already registered".to_string()));
        }

        inner.emails.insert(user.email.clone(), user.id);
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    fn load_user(&self, user_id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let inner = self.lock();
        Ok(inner.emails.get(email).and_then(|id| inner.users.get(id)).cloned())
    }

    fn delete_user(&self, user_id: UserId) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let Some(user) = inner.users.remove(&user_id) else {
            return Ok(false);
        };

        inner.emails.remove(&user.email);
        inner.keys.retain(|_, record| record.user_id != Some(user_id));
        inner.tokens.retain(|_, token| token.user_id != user_id);
        let remaining: HashMap<String, TokenId> =
            inner.tokens.values().map(|t| (t.token_hash.clone(), t.id)).collect();
        inner.token_hashes = remaining;
        inner.passkeys.retain(|_, passkey| passkey.user_id != user_id);
        Ok(true)
    }

    fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError> {
        self.lock().insert_token(token.clone())
    }

    fn register_device(&self, token: &RefreshToken, trusted: bool) -> Result<RefreshToken, StorageError> {
        let mut inner = self.lock();
        let first = !inner.tokens.values().any(|t| t.user_id == token.user_id);

        let row = RefreshToken { state: DeviceState::initial(first, trusted), ..token.clone() };
        inner.insert_token(row.clone())?;
        Ok(row)
    }

    fn load_refresh_token(&self, id: TokenId) -> Result<Option<RefreshToken>, StorageError> {
        Ok(self.lock().tokens.get(&id).cloned())
    }

    fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>, StorageError> {
        let inner = self.lock();
        Ok(inner.token_hashes.get(token_hash).and_then(|id| inner.tokens.get(id)).cloned())
    }

    fn list_refresh_tokens(&self, user_id: UserId) -> Result<Vec<RefreshToken>, StorageError> {
        let inner = self.lock();
        let tokens = inner.tokens.values().filter(|t| t.user_id == user_id).cloned().collect();
        Ok(sorted_oldest_first(tokens))
    }

    fn rotate_refresh_token(
        &self,
        id: TokenId,
        expected_hash: &str,
        new_hash: &str,
        now: u64,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock();

        match inner.tokens.get(&id) {
            Some(token) if token.token_hash == expected_hash => {},
            _ => return Ok(false),
        }
        if inner.token_hashes.contains_key(new_hash) {
            return Err(StorageError::Conflict("refresh token hash".to_string()));
        }

        inner.token_hashes.remove(expected_hash);
        inner.token_hashes.insert(new_hash.to_string(), id);
        if let Some(token) = inner.tokens.get_mut(&id) {
            token.token_hash = new_hash.to_string();
            token.last_used_at = now;
        }
        Ok(true)
    }

    fn set_device_state(
        &self,
        id: TokenId,
        state: DeviceState,
        now: u64,
    ) -> Result<RefreshToken, StorageError> {
        let mut inner = self.lock();
        let token = inner
            .tokens
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("refresh token {id}")))?;
        token.state = state;
        token.last_used_at = now;
        Ok(token.clone())
    }

    fn rename_device(&self, id: TokenId, name: &str) -> Result<RefreshToken, StorageError> {
        let mut inner = self.lock();
        let token = inner
            .tokens
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("refresh token {id}")))?;
        token.device_name = name.to_string();
        Ok(token.clone())
    }

    fn delete_refresh_token(&self, id: TokenId) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let Some(token) = inner.tokens.remove(&id) else {
            return Ok(false);
        };
        inner.token_hashes.remove(&token.token_hash);
        Ok(true)
    }

    fn put_passkey(&self, passkey: &PasskeyRecord) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.passkeys.contains_key(&passkey.credential_id) {
            return Err(StorageError::Conflict("passkey credential id".to_string()));
        }
        inner.passkeys.insert(passkey.credential_id.clone(), passkey.clone());
        Ok(())
    }

    fn load_passkey(&self, credential_id: &str) -> Result<Option<PasskeyRecord>, StorageError> {
        Ok(self.lock().passkeys.get(credential_id).cloned())
    }

    fn list_passkeys(&self, user_id: UserId) -> Result<Vec<PasskeyRecord>, StorageError> {
        let inner = self.lock();
        let mut passkeys: Vec<PasskeyRecord> =
            inner.passkeys.values().filter(|p| p.user_id == user_id).cloned().collect();
        passkeys.sort_by_key(|p| (p.created_at, p.credential_id.clone()));
        Ok(passkeys)
    }

    fn update_passkey_counter(&self, credential_id: &str, counter: u32) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let passkey = inner
            .passkeys
            .get_mut(credential_id)
            .ok_or_else(|| StorageError::NotFound("passkey".to_string()))?;
        passkey.sign_count = counter;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(id: u64, user: u64, hash: &str) -> RefreshToken {
        RefreshToken {
            id: TokenId(id),
            user_id: UserId(user),
            token_hash: hash.to_string(),
            device_name: "laptop".to_string(),
            user_agent: "test".to_string(),
            state: DeviceState::Active,
            created_at: id,
            last_used_at: id,
        }
    }

    #[test]
    fn put_key_is_idempotent_but_never_overwrites() {
        let storage = MemoryStorage::new();
        let record = KeyRecord::new("k1".into(), None, [1; 32], 0);

        storage.put_key(&record).unwrap();
        storage.put_key(&record).unwrap();

        let other = KeyRecord::new("k1".into(), None, [2; 32], 0);
        assert!(matches!(storage.put_key(&other), Err(StorageError::Conflict(_))));
        assert_eq!(storage.load_key("k1").unwrap().unwrap().secret(), &[1; 32]);
    }

    #[test]
    fn touch_never_moves_backwards() {
        let storage = MemoryStorage::new();
        storage.put_key(&KeyRecord::new("k1".into(), None, [1; 32], 100)).unwrap();

        assert!(storage.touch_key("k1", 50).unwrap());
        assert_eq!(storage.load_key("k1").unwrap().unwrap().last_seen_at, 100);
        assert!(!storage.touch_key("missing", 50).unwrap());
    }

    #[test]
    fn rotate_is_compare_and_swap() {
        let storage = MemoryStorage::new();
        storage.insert_refresh_token(&token(1, 1, "h0")).unwrap();

        assert!(storage.rotate_refresh_token(TokenId(1), "h0", "h1", 10).unwrap());
        assert!(!storage.rotate_refresh_token(TokenId(1), "h0", "h2", 11).unwrap());

        assert!(storage.find_refresh_token("h0").unwrap().is_none());
        let row = storage.find_refresh_token("h1").unwrap().unwrap();
        assert_eq!(row.id, TokenId(1));
        assert_eq!(row.last_used_at, 10);
    }

    #[test]
    fn duplicate_hash_is_conflict() {
        let storage = MemoryStorage::new();
        storage.insert_refresh_token(&token(1, 1, "h")).unwrap();

        assert!(matches!(storage.insert_refresh_token(&token(2, 1, "h")), Err(StorageError::Conflict(_))));
        assert_eq!(storage.refresh_token_count(), 1);
    }

    #[test]
    fn register_device_trusts_only_the_first() {
        let storage = MemoryStorage::new();

        let first = storage.register_device(&RefreshToken { state: DeviceState::Locked, ..token(1, 1, "a") }, false);
        assert_eq!(first.unwrap().state, DeviceState::Active);
        assert_eq!(storage.register_device(&token(2, 1, "b"), false).unwrap().state, DeviceState::Locked);
        assert_eq!(storage.register_device(&token(3, 1, "c"), true).unwrap().state, DeviceState::Active);

        // Another account's first device is trusted regardless
        assert_eq!(storage.register_device(&token(4, 2, "d"), false).unwrap().state, DeviceState::Active);
        assert!(matches!(storage.register_device(&token(5, 1, "a"), false), Err(StorageError::Conflict(_))));
        assert_eq!(storage.refresh_token_count(), 4);
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let storage = MemoryStorage::new();
        storage.create_user(&User::new(UserId(1), "a@example.com", true, 0)).unwrap();

        let result = storage.create_user(&User::new(UserId(2), "A@example.com", true, 0));
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[test]
    fn delete_user_cascades() {
        let storage = MemoryStorage::new();
        storage.create_user(&User::new(UserId(1), "a@example.com", true, 0)).unwrap();
        storage.insert_refresh_token(&token(1, 1, "h1")).unwrap();
        storage.insert_refresh_token(&token(2, 2, "h2")).unwrap();
        storage.put_key(&KeyRecord::new("k1".into(), Some(UserId(1)), [1; 32], 0)).unwrap();

        assert!(storage.delete_user(UserId(1)).unwrap());

        assert!(storage.find_user_by_email("a@example.com").unwrap().is_none());
        assert!(storage.find_refresh_token("h1").unwrap().is_none());
        assert!(storage.find_refresh_token("h2").unwrap().is_some());
        assert_eq!(storage.key_count(), 0);
    }

    #[test]
    fn purge_removes_only_stale_keys() {
        let storage = MemoryStorage::new();
        storage.put_key(&KeyRecord::new("old".into(), None, [1; 32], 10)).unwrap();
        storage.put_key(&KeyRecord::new("new".into(), None, [2; 32], 100)).unwrap();

        assert_eq!(storage.purge_keys_unseen_since(50).unwrap(), 1);
        assert!(storage.load_key("new").unwrap().is_some());
    }

    #[test]
    fn list_is_oldest_first() {
        let storage = MemoryStorage::new();
        storage.insert_refresh_token(&token(3, 1, "c")).unwrap();
        storage.insert_refresh_token(&token(1, 1, "a")).unwrap();
        storage.insert_refresh_token(&token(2, 1, "b")).unwrap();

        let ids: Vec<u64> = storage.list_refresh_tokens(UserId(1)).unwrap().iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
