//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Every trait method is one transaction, so unique indexes and the
//! refresh-token compare-and-swap are enforced atomically. All state
//! survives server restarts.

use std::{path::Path, sync::Arc};

use pulse_core::{DeviceState, KeyRecord, PasskeyRecord, RefreshToken, TokenId, User, UserId};
use redb::{Database, ReadableTable, Table, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{Storage, StorageError};

/// Table: keys
/// Key: peppered storage id
/// Value: CBOR-encoded KeyRecord
const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("keys");

/// Table: users
/// Key: user id
/// Value: CBOR-encoded User
const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Table: user_emails (unique index)
/// Key: normalized email
/// Value: user id
const USER_EMAILS: TableDefinition<&str, u64> = TableDefinition::new("user_emails");

/// Table: refresh_tokens
/// Key: token id
/// Value: CBOR-encoded RefreshToken
const REFRESH_TOKENS: TableDefinition<u64, &[u8]> = TableDefinition::new("refresh_tokens");

/// Table: token_hashes (unique index)
/// Key: token hash
/// Value: token id
const TOKEN_HASHES: TableDefinition<&str, u64> = TableDefinition::new("token_hashes");

/// Table: passkeys
/// Key: credential id
/// Value: CBOR-encoded PasskeyRecord
const PASSKEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("passkeys");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn get_by_str<T, R>(table: &R, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(io)? {
        Some(bytes) => decode(bytes.value()).map(Some),
        None => Ok(None),
    }
}

fn get_by_id<T, R>(table: &R, id: u64) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    R: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id).map_err(io)? {
        Some(bytes) => decode(bytes.value()).map(Some),
        None => Ok(None),
    }
}

fn insert_token(
    tokens: &mut Table<'_, u64, &'static [u8]>,
    hashes: &mut Table<'_, &'static str, u64>,
    token: &RefreshToken,
) -> Result<(), StorageError> {
    if tokens.get(token.id.0).map_err(io)?.is_some() {
        return Err(StorageError::Conflict(format!("refresh token id {}", token.id)));
    }
    if hashes.get(token.token_hash.as_str()).map_err(io)?.is_some() {
        return Err(StorageError::Conflict("refresh token hash".to_string()));
    }

    tokens.insert(token.id.0, encode(token)?.as_slice()).map_err(io)?;
    hashes.insert(token.token_hash.as_str(), token.id.0).map_err(io)?;
    Ok(())
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(KEYS).map_err(io)?;
            let _ = txn.open_table(USERS).map_err(io)?;
            let _ = txn.open_table(USER_EMAILS).map_err(io)?;
            let _ = txn.open_table(REFRESH_TOKENS).map_err(io)?;
            let _ = txn.open_table(TOKEN_HASHES).map_err(io)?;
            let _ = txn.open_table(PASSKEYS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Load, mutate and store one refresh-token row in a single transaction.
    fn update_refresh_token(
        &self,
        id: TokenId,
        mutate: impl FnOnce(&mut RefreshToken),
    ) -> Result<RefreshToken, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let token = {
            let mut table = txn.open_table(REFRESH_TOKENS).map_err(io)?;
            let mut token: RefreshToken = get_by_id(&table, id.0)?
                .ok_or_else(|| StorageError::NotFound(format!("refresh token {id}")))?;
            mutate(&mut token);
            table.insert(id.0, encode(&token)?.as_slice()).map_err(io)?;
            token
        };
        txn.commit().map_err(io)?;
        Ok(token)
    }
}

impl Storage for RedbStorage {
    fn put_key(&self, record: &KeyRecord) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(KEYS).map_err(io)?;
            if let Some(existing) = get_by_str::<KeyRecord, _>(&table, &record.key_id)? {
                if existing.secret() != record.secret() {
                    return Err(StorageError::Conflict(format!("key id {}", record.key_id)));
                }
                return Ok(());
            }
            table.insert(record.key_id.as_str(), encode(record)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn load_key(&self, key_id: &str) -> Result<Option<KeyRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(KEYS).map_err(io)?;
        get_by_str(&table, key_id)
    }

    fn touch_key(&self, key_id: &str, now: u64) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(KEYS).map_err(io)?;
            let Some(mut record) = get_by_str::<KeyRecord, _>(&table, key_id)? else {
                return Ok(false);
            };
            record.last_seen_at = record.last_seen_at.max(now);
            table.insert(key_id, encode(&record)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(true)
    }

    fn delete_key(&self, key_id: &str) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let removed = {
            let mut table = txn.open_table(KEYS).map_err(io)?;
            table.remove(key_id).map_err(io)?.is_some()
        };
        txn.commit().map_err(io)?;
        Ok(removed)
    }

    fn purge_keys_unseen_since(&self, cutoff: u64) -> Result<usize, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let purged = {
            let mut table = txn.open_table(KEYS).map_err(io)?;
            let mut stale = Vec::new();
            for entry in table.iter().map_err(io)? {
                let (key, value) = entry.map_err(io)?;
                let record: KeyRecord = decode(value.value())?;
                if record.last_seen_at < cutoff {
                    stale.push(key.value().to_string());
                }
            }
            for key in &stale {
                table.remove(key.as_str()).map_err(io)?;
            }
            stale.len()
        };
        txn.commit().map_err(io)?;
        Ok(purged)
    }

    fn create_user(&self, user: &User) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut users = txn.open_table(USERS).map_err(io)?;
            let mut emails = txn.open_table(USER_EMAILS).map_err(io)?;

            if users.get(user.id.0).map_err(io)?.is_some() {
                return Err(StorageError::Conflict(format!("user id {}", user.id)));
            }
            if emails.get(user.email.as_str()).map_err(io)?.is_some() {
                return Err(StorageError::Conflict("email already registered".to_string()));
            }

            users.insert(user.id.0, encode(user)?.as_slice()).map_err(io)?;
            emails.insert(user.email.as_str(), user.id.0).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn load_user(&self, user_id: UserId) -> Result<Option<User>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(USERS).map_err(io)?;
        get_by_id(&table, user_id.0)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let emails = txn.open_table(USER_EMAILS).map_err(io)?;
        let Some(id) = emails.get(email).map_err(io)?.map(|guard| guard.value()) else {
            return Ok(None);
        };
        let users = txn.open_table(USERS).map_err(io)?;
        get_by_id(&users, id)
    }

    fn delete_user(&self, user_id: UserId) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut users = txn.open_table(USERS).map_err(io)?;
            let Some(user) = get_by_id::<User, _>(&users, user_id.0)? else {
                return Ok(false);
            };
            users.remove(user_id.0).map_err(io)?;

            let mut emails = txn.open_table(USER_EMAILS).map_err(io)?;
            emails.remove(user.email.as_str()).map_err(io)?;

            let mut keys = txn.open_table(KEYS).map_err(io)?;
            let mut owned_keys = Vec::new();
            for entry in keys.iter().map_err(io)? {
                let (key, value) = entry.map_err(io)?;
                let record: KeyRecord = decode(value.value())?;
                if record.user_id == Some(user_id) {
                    owned_keys.push(key.value().to_string());
                }
            }
            for key in &owned_keys {
                keys.remove(key.as_str()).map_err(io)?;
            }

            let mut tokens = txn.open_table(REFRESH_TOKENS).map_err(io)?;
            let mut hashes = txn.open_table(TOKEN_HASHES).map_err(io)?;
            let mut owned_tokens = Vec::new();
            for entry in tokens.iter().map_err(io)? {
                let (_, value) = entry.map_err(io)?;
                let token: RefreshToken = decode(value.value())?;
                if token.user_id == user_id {
                    owned_tokens.push(token);
                }
            }
            for token in &owned_tokens {
                tokens.remove(token.id.0).map_err(io)?;
                hashes.remove(token.token_hash.as_str()).map_err(io)?;
            }

            let mut passkeys = txn.open_table(PASSKEYS).map_err(io)?;
            let mut owned_passkeys = Vec::new();
            for entry in passkeys.iter().map_err(io)? {
                let (key, value) = entry.map_err(io)?;
                let passkey: PasskeyRecord = decode(value.value())?;
                if passkey.user_id == user_id {
                    owned_passkeys.push(key.value().to_string());
                }
            }
            for key in &owned_passkeys {
                passkeys.remove(key.as_str()).map_err(io)?;
            }
        }
        txn.commit().map_err(io)?;
        Ok(true)
    }

    fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut tokens = txn.open_table(REFRESH_TOKENS).map_err(io)?;
            let mut hashes = txn.open_table(TOKEN_HASHES).map_err(io)?;
            insert_token(&mut tokens, &mut hashes, token)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn register_device(&self, token: &RefreshToken, trusted: bool) -> Result<RefreshToken, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let row = {
            let mut tokens = txn.open_table(REFRESH_TOKENS).map_err(io)?;
            let mut hashes = txn.open_table(TOKEN_HASHES).map_err(io)?;

            let mut first = true;
            for entry in tokens.iter().map_err(io)? {
                let (_, value) = entry.map_err(io)?;
                let existing: RefreshToken = decode(value.value())?;
                if existing.user_id == token.user_id {
                    first = false;
                    break;
                }
            }

            let row = RefreshToken { state: DeviceState::initial(first, trusted), ..token.clone() };
            insert_token(&mut tokens, &mut hashes, &row)?;
            row
        };
        txn.commit().map_err(io)?;
        Ok(row)
    }

    fn load_refresh_token(&self, id: TokenId) -> Result<Option<RefreshToken>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(REFRESH_TOKENS).map_err(io)?;
        get_by_id(&table, id.0)
    }

    fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let hashes = txn.open_table(TOKEN_HASHES).map_err(io)?;
        let Some(id) = hashes.get(token_hash).map_err(io)?.map(|guard| guard.value()) else {
            return Ok(None);
        };
        let tokens = txn.open_table(REFRESH_TOKENS).map_err(io)?;
        get_by_id(&tokens, id)
    }

    fn list_refresh_tokens(&self, user_id: UserId) -> Result<Vec<RefreshToken>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(REFRESH_TOKENS).map_err(io)?;

        let mut owned = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            let token: RefreshToken = decode(value.value())?;
            if token.user_id == user_id {
                owned.push(token);
            }
        }
        owned.sort_by_key(|t| (t.created_at, t.id));
        Ok(owned)
    }

    fn rotate_refresh_token(
        &self,
        id: TokenId,
        expected_hash: &str,
        new_hash: &str,
        now: u64,
    ) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut tokens = txn.open_table(REFRESH_TOKENS).map_err(io)?;
            let mut hashes = txn.open_table(TOKEN_HASHES).map_err(io)?;

            let Some(mut token) = get_by_id::<RefreshToken, _>(&tokens, id.0)? else {
                return Ok(false);
            };
            if token.token_hash != expected_hash {
                return Ok(false);
            }
            if hashes.get(new_hash).map_err(io)?.is_some() {
                return Err(StorageError::Conflict("refresh token hash".to_string()));
            }

            hashes.remove(expected_hash).map_err(io)?;
            hashes.insert(new_hash, id.0).map_err(io)?;
            token.token_hash = new_hash.to_string();
            token.last_used_at = now;
            tokens.insert(id.0, encode(&token)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(true)
    }

    fn set_device_state(
        &self,
        id: TokenId,
        state: DeviceState,
        now: u64,
    ) -> Result<RefreshToken, StorageError> {
        self.update_refresh_token(id, |token| {
            token.state = state;
            token.last_used_at = now;
        })
    }

    fn rename_device(&self, id: TokenId, name: &str) -> Result<RefreshToken, StorageError> {
        self.update_refresh_token(id, |token| token.device_name = name.to_string())
    }

    fn delete_refresh_token(&self, id: TokenId) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut tokens = txn.open_table(REFRESH_TOKENS).map_err(io)?;
            let Some(token) = get_by_id::<RefreshToken, _>(&tokens, id.0)? else {
                return Ok(false);
            };
            tokens.remove(id.0).map_err(io)?;

            let mut hashes = txn.open_table(TOKEN_HASHES).map_err(io)?;
            hashes.remove(token.token_hash.as_str()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(true)
    }

    fn put_passkey(&self, passkey: &PasskeyRecord) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(PASSKEYS).map_err(io)?;
            if table.get(passkey.credential_id.as_str()).map_err(io)?.is_some() {
                return Err(StorageError::Conflict("passkey credential id".to_string()));
            }
            table.insert(passkey.credential_id.as_str(), encode(passkey)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn load_passkey(&self, credential_id: &str) -> Result<Option<PasskeyRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(PASSKEYS).map_err(io)?;
        get_by_str(&table, credential_id)
    }

    fn list_passkeys(&self, user_id: UserId) -> Result<Vec<PasskeyRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(PASSKEYS).map_err(io)?;

        let mut owned = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            let passkey: PasskeyRecord = decode(value.value())?;
            if passkey.user_id == user_id {
                owned.push(passkey);
            }
        }
        owned.sort_by_key(|p| (p.created_at, p.credential_id.clone()));
        Ok(owned)
    }

    fn update_passkey_counter(&self, credential_id: &str, counter: u32) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(PASSKEYS).map_err(io)?;
            let mut passkey: PasskeyRecord = get_by_str(&table, credential_id)?
                .ok_or_else(|| StorageError::NotFound("passkey".to_string()))?;
            passkey.sign_count = counter;
            table.insert(credential_id, encode(&passkey)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }
}
