//! Device-bound refresh tokens and the device-trust lifecycle.
//!
//! Each device holds one refresh-token row. The row keeps its id for life;
//! rotation swaps the stored hash with a compare-and-swap, so two requests
//! racing on the same stale token leave exactly one winner.
//!
//! ```text
//! signin ──> presented token known? ──yes──> Active ──> rotate, access token
//!                    │                   └─> Locked/Revoked ──> locked grant
//!                    no
//!                    ↓
//!            first device or step-up? ──yes──> new Active row, access token
//!                    │ no
//!                    └──> new Locked row, "new device" mail, locked grant
//! ```
//!
//! Only the keyed hash of a refresh token is ever stored. A failed rotation
//! leaves the old hash in place, so a storage hiccup never logs a device out.

use std::sync::Arc;

use pulse_core::{
    AuthError, Claims, DeviceContext, DeviceState, RefreshToken, Role, TokenId, TokenPurpose, TokenSigner, User,
    UserId, env::Environment, normalize_email,
};
use pulse_crypto::{codec, keyed_hash};
use zeroize::Zeroizing;

use crate::{
    durable::DurableStore,
    mail::Mailer,
    step_up::{BypassTokens, VerifiedProof},
    storage::Storage,
};

/// Subject of the mail sent when an unknown device signs in
pub const NEW_DEVICE_SUBJECT: &str = "New device Sign-In";

/// Lifetimes of the access tokens minted here.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    /// `Role::Base` access tokens, seconds
    pub access_secs: u64,
    /// `Role::Sudo` access tokens, seconds
    pub sudo_secs: u64,
}

/// Result of a sign-in as far as the device is concerned.
#[derive(Debug, Clone)]
pub struct SignInGrant {
    /// The account
    pub user: User,
    /// Row of the device
    pub token_id: TokenId,
    /// Refresh token the client must keep. Unchanged for a revoked device.
    pub refresh_token: String,
    /// Present only when the device is trusted
    pub access_token: Option<String>,
    /// Device is locked or revoked; the caller reports `DeviceLocked`
    pub locked: bool,
    /// Lets the client skip one immediate step-up
    pub bypass_token: String,
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    /// Row of the device, unchanged
    pub token_id: TokenId,
    /// Replacement refresh token
    pub refresh_token: String,
    /// Fresh base access token
    pub access_token: String,
}

/// A device as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceView {
    /// Row id
    pub id: TokenId,
    /// Display name
    pub device_name: String,
    /// Shortened user agent
    pub user_agent: String,
    /// Trust state
    pub state: DeviceState,
    /// Unix seconds
    pub created_at: u64,
    /// Unix seconds
    pub last_used_at: u64,
    /// This is the device making the request
    pub current: bool,
}

impl DeviceView {
    fn new(row: RefreshToken, current: Option<TokenId>) -> Self {
        Self {
            current: current == Some(row.id),
            id: row.id,
            device_name: row.device_name,
            user_agent: row.user_agent,
            state: row.state,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

/// Issues, rotates, locks and unlocks device refresh tokens.
#[derive(Clone)]
pub struct RefreshTokenLifecycle<S: Storage, E: Environment> {
    durable: DurableStore<S, E>,
    signer: Arc<TokenSigner>,
    bypass: BypassTokens<E>,
    mailer: Arc<dyn Mailer>,
    env: E,
    pepper: Arc<Zeroizing<[u8; 32]>>,
    lifetimes: TokenLifetimes,
}

impl<S: Storage, E: Environment> RefreshTokenLifecycle<S, E> {
    /// Create over the durable store.
    pub fn new(
        durable: DurableStore<S, E>,
        signer: Arc<TokenSigner>,
        bypass: BypassTokens<E>,
        mailer: Arc<dyn Mailer>,
        env: E,
        pepper: [u8; 32],
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self { durable, signer, bypass, mailer, env, pepper: Arc::new(Zeroizing::new(pepper)), lifetimes }
    }

    /// Bypass tokens minted at sign-in.
    pub fn bypass(&self) -> &BypassTokens<E> {
        &self.bypass
    }

    fn hash(&self, token: &str) -> String {
        keyed_hash(self.pepper.as_slice(), token.trim().as_bytes())
    }

    fn mint_token(&self) -> String {
        codec::to_base64url(&self.env.random_array::<32>())
    }

    /// Sign an access token for `user_id` with `role`.
    pub fn access_token(&self, user_id: UserId, role: Role) -> String {
        let now = self.env.wall_clock_secs();
        let lifetime = match role {
            Role::Base => self.lifetimes.access_secs,
            Role::Sudo => self.lifetimes.sudo_secs,
        };

        self.signer.sign(&Claims {
            uid: user_id,
            kid: None,
            role,
            purpose: TokenPurpose::Access,
            iat: now,
            exp: now.saturating_add(lifetime),
        })
    }

    /// Row a presented refresh token hashes to.
    pub async fn find(&self, presented: &str) -> Result<Option<RefreshToken>, AuthError> {
        let hash = self.hash(presented);
        self.durable.read(move |s| s.find_refresh_token(&hash)).await
    }

    /// Register or re-authenticate a device for an account whose proof was
    /// already checked.
    ///
    /// # Errors
    ///
    /// - `Authentication`: no such account, or its email is unverified
    /// - `InvalidRefreshToken`: the presented token lost a concurrent rotation
    /// - `StorageUnavailable`: the device row could not be written
    pub async fn signin(
        &self,
        email: &str,
        device: &DeviceContext,
        presented: Option<&str>,
        stepped_up: bool,
    ) -> Result<SignInGrant, AuthError> {
        let email = normalize_email(email);
        let lookup = email.clone();
        let user = match self.durable.read(move |s| s.find_user_by_email(&lookup)).await? {
            Some(user) if user.verified => user,
            _ => return Err(AuthError::Authentication("unknown or unverified account".to_string())),
        };

        let known = match presented {
            Some(token) => self.find(token).await?.filter(|row| row.user_id == user.id).map(|row| (row, token)),
            None => None,
        };

        let (token_id, refresh_token, state) = match known {
            Some((row, token)) if row.is_revoked() => {
                tracing::warn!(user_id = %user.id, token_id = %row.id, state = ?row.state, "sign-in from locked device");
                (row.id, token.trim().to_string(), row.state)
            },
            Some((row, _)) => {
                let fresh = self.rotate(&row).await?;
                (row.id, fresh, row.state)
            },
            None => self.register(&user, device, stepped_up).await?,
        };

        let locked = !state.can_rotate();
        let access_token = (!locked).then(|| self.access_token(user.id, Role::Base));
        let bypass_token = self.bypass.mint(user.id);

        tracing::info!(user_id = %user.id, %token_id, locked, "device signed in");
        Ok(SignInGrant { user, token_id, refresh_token, access_token, locked, bypass_token })
    }

    async fn register(
        &self,
        user: &User,
        device: &DeviceContext,
        stepped_up: bool,
    ) -> Result<(TokenId, String, DeviceState), AuthError> {
        let user_id = user.id;
        let now = self.env.wall_clock_secs();
        let token = self.mint_token();
        let row = RefreshToken {
            id: TokenId(self.env.random_u64()),
            user_id,
            token_hash: self.hash(&token),
            device_name: device.device_name.clone(),
            user_agent: device.user_agent.clone(),
            state: DeviceState::Locked,
            created_at: now,
            last_used_at: now,
        };

        // Storage decides first-device trust in the same step as the insert
        let stored = self.durable.write(move |s| s.register_device(&row, stepped_up)).await?;
        let (id, state) = (stored.id, stored.state);

        if state == DeviceState::Locked {
            tracing::warn!(%user_id, token_id = %id, "new device signed in locked");
            let text = format!(
                "A new device ({}) signed in to your account. Confirm it from a trusted device to unlock it.",
                device.device_name
            );
            let html = format!("<p>{text}</p>");
            if !self.mailer.send(&user.email, NEW_DEVICE_SUBJECT, &text, &html).await {
                tracing::error!(%user_id, "failed to mail new-device notice");
            }
        }

        Ok((id, token, state))
    }

    /// Swap the hash of an active row. The old token stops working in the
    /// same step.
    async fn rotate(&self, row: &RefreshToken) -> Result<String, AuthError> {
        let fresh = self.mint_token();
        let (id, expected, next) = (row.id, row.token_hash.clone(), self.hash(&fresh));
        let now = self.env.wall_clock_secs();

        if !self.durable.write(move |s| s.rotate_refresh_token(id, &expected, &next, now)).await? {
            tracing::warn!(token_id = %id, "refresh token lost a concurrent rotation");
            return Err(AuthError::InvalidRefreshToken);
        }
        Ok(fresh)
    }

    /// Rotate a refresh token and mint a base access token.
    ///
    /// # Errors
    ///
    /// - `InvalidRefreshToken`: unknown, or lost a concurrent rotation
    /// - `DeviceLocked`: the device is locked or revoked; the token is kept
    pub async fn refresh(&self, presented: &str) -> Result<Rotation, AuthError> {
        let Some(row) = self.find(presented).await? else {
            return Err(AuthError::InvalidRefreshToken);
        };

        if !row.state.can_rotate() {
            tracing::debug!(token_id = %row.id, state = ?row.state, "refresh from locked device");
            return Err(AuthError::DeviceLocked);
        }

        let refresh_token = self.rotate(&row).await?;
        Ok(Rotation { token_id: row.id, refresh_token, access_token: self.access_token(row.user_id, Role::Base) })
    }

    /// Unlock the device holding `presented` with a proof from its owner.
    ///
    /// # Errors
    ///
    /// - `InvalidRefreshToken`: unknown token
    /// - `Forbidden`: the proof belongs to someone else
    pub async fn unlock(&self, presented: &str, proof: &VerifiedProof) -> Result<RefreshToken, AuthError> {
        let Some(row) = self.find(presented).await? else {
            return Err(AuthError::InvalidRefreshToken);
        };

        let user_id = row.user_id;
        let owner = self.durable.read(move |s| s.load_user(user_id)).await?;
        let matches = owner.is_some_and(|owner| {
            owner.email == normalize_email(&proof.email) && proof.user_id.is_none_or(|id| id == owner.id)
        });
        if !matches {
            tracing::warn!(token_id = %row.id, %user_id, "unlock proof does not match device owner");
            return Err(AuthError::Forbidden("The email entered is not associated with this device".to_string()));
        }

        let (id, state, now) = (row.id, row.state.unlock(), self.env.wall_clock_secs());
        let updated = self.durable.write_idempotent(move |s| s.set_device_state(id, state, now)).await?;

        tracing::info!(token_id = %id, %user_id, "device unlocked");
        Ok(updated)
    }

    /// Row id of the caller's own device, if its token resolves.
    async fn current_id(&self, current: Option<&str>) -> Result<Option<TokenId>, AuthError> {
        match current {
            Some(token) => Ok(self.find(token).await?.map(|row| row.id)),
            None => Ok(None),
        }
    }

    async fn owned(&self, owner: UserId, id: TokenId) -> Result<RefreshToken, AuthError> {
        match self.durable.read(move |s| s.load_refresh_token(id)).await? {
            Some(row) if row.user_id == owner => Ok(row),
            _ => Err(AuthError::NotFound("Device not found".to_string())),
        }
    }

    async fn ensure_not_self(&self, id: TokenId, current: Option<&str>) -> Result<(), AuthError> {
        if self.current_id(current).await? == Some(id) {
            return Err(AuthError::Forbidden("Cannot revoke the current device".to_string()));
        }
        Ok(())
    }

    /// Revoke or restore one of `owner`'s devices.
    ///
    /// # Errors
    ///
    /// - `Forbidden`: revoking the calling device itself
    /// - `NotFound`: no such device for this account
    pub async fn revoke(
        &self,
        owner: UserId,
        id: TokenId,
        revoke: bool,
        current: Option<&str>,
    ) -> Result<DeviceView, AuthError> {
        if revoke {
            self.ensure_not_self(id, current).await?;
        }
        let row = self.owned(owner, id).await?;

        let (state, now) = (row.state.set_revoked(revoke), self.env.wall_clock_secs());
        let updated = self.durable.write_idempotent(move |s| s.set_device_state(id, state, now)).await?;

        tracing::info!(user_id = %owner, token_id = %id, revoke, state = ?state, "device trust changed");
        Ok(DeviceView::new(updated, None))
    }

    /// Revoke every active device of `owner` except the caller's. Returns how
    /// many were revoked.
    pub async fn revoke_all(&self, owner: UserId, current: Option<&str>) -> Result<usize, AuthError> {
        let current = self.current_id(current).await?;
        let rows = self.durable.read(move |s| s.list_refresh_tokens(owner)).await?;
        let now = self.env.wall_clock_secs();

        let mut revoked = 0;
        for row in rows.into_iter().filter(|row| Some(row.id) != current && row.state == DeviceState::Active) {
            let (id, state) = (row.id, row.state.set_revoked(true));
            self.durable.write_idempotent(move |s| s.set_device_state(id, state, now)).await?;
            revoked += 1;
        }

        tracing::info!(user_id = %owner, revoked, "revoked all other devices");
        Ok(revoked)
    }

    /// Rename one of `owner`'s devices.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank name
    /// - `NotFound`: no such device for this account
    pub async fn rename(
        &self,
        owner: UserId,
        id: TokenId,
        name: &str,
        current: Option<&str>,
    ) -> Result<DeviceView, AuthError> {
        if name.trim().is_empty() {
            return Err(AuthError::Validation("Device name is required".to_string()));
        }
        self.owned(owner, id).await?;

        let name = DeviceContext::new(name, "").device_name;
        let updated = self.durable.write_idempotent(move |s| s.rename_device(id, &name)).await?;
        Ok(DeviceView::new(updated, self.current_id(current).await?))
    }

    /// Every device of `owner`, oldest first, with the caller's marked.
    pub async fn list(&self, owner: UserId, current: Option<&str>) -> Result<Vec<DeviceView>, AuthError> {
        let current = self.current_id(current).await?;
        let rows = self.durable.read(move |s| s.list_refresh_tokens(owner)).await?;
        Ok(rows.into_iter().map(|row| DeviceView::new(row, current)).collect())
    }

    /// Forget one of `owner`'s devices entirely.
    ///
    /// # Errors
    ///
    /// - `Forbidden`: deleting the calling device itself
    /// - `NotFound`: no such device for this account
    pub async fn delete(&self, owner: UserId, id: TokenId, current: Option<&str>) -> Result<(), AuthError> {
        self.ensure_not_self(id, current).await?;
        self.owned(owner, id).await?;

        self.durable.write_idempotent(move |s| s.delete_refresh_token(id)).await?;
        tracing::info!(user_id = %owner, token_id = %id, "device deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::SimEnv;

    use super::*;
    use crate::{config::RetryPolicy, mail::Outbox, step_up::AuthMethod, storage::MemoryStorage};

    struct Fixture {
        env: SimEnv,
        outbox: Outbox,
        storage: MemoryStorage,
        lifecycle: RefreshTokenLifecycle<MemoryStorage, SimEnv>,
    }

    fn fixture() -> Fixture {
        let env = SimEnv::new(9, 50_000);
        let outbox = Outbox::new();
        let storage = MemoryStorage::new();
        storage.create_user(&User::new(UserId(1), "ann@example.com", true, 0)).unwrap();
        storage.create_user(&User::new(UserId(2), "bob@example.com", true, 0)).unwrap();
        storage.create_user(&User::new(UserId(3), "eve@example.com", false, 0)).unwrap();

        let durable = DurableStore::new(storage.clone(), env.clone(), Duration::from_secs(1), RetryPolicy::default());
        let lifecycle = RefreshTokenLifecycle::new(
            durable,
            Arc::new(TokenSigner::new([7; 32])),
            BypassTokens::new(env.clone(), 60),
            Arc::new(outbox.clone()),
            env.clone(),
            [5; 32],
            TokenLifetimes { access_secs: 900, sudo_secs: 300 },
        );
        Fixture { env, outbox, storage, lifecycle }
    }

    fn laptop() -> DeviceContext {
        DeviceContext::new("Laptop", "Firefox")
    }

    fn proof_for(email: &str) -> VerifiedProof {
        VerifiedProof { email: email.to_string(), user_id: None, method: AuthMethod::EmailCode }
    }

    #[tokio::test]
    async fn first_device_active_second_locked() {
        let f = fixture();

        let first = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();
        assert!(!first.locked);
        assert!(first.access_token.is_some());
        assert!(f.outbox.messages().is_empty());

        let second = f.lifecycle.signin("ann@example.com", &DeviceContext::new("Phone", ""), None, false).await.unwrap();
        assert!(second.locked);
        assert!(second.access_token.is_none());
        assert_eq!(f.outbox.with_subject(NEW_DEVICE_SUBJECT).len(), 1);
        assert_eq!(f.storage.refresh_token_count(), 2);
    }

    #[tokio::test]
    async fn step_up_skips_the_lock() {
        let f = fixture();
        f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        let second = f.lifecycle.signin("ann@example.com", &laptop(), None, true).await.unwrap();
        assert!(!second.locked);
        assert!(f.outbox.messages().is_empty());
    }

    #[tokio::test]
    async fn unknown_or_unverified_account_rejected() {
        let f = fixture();

        for email in ["nobody@example.com", "eve@example.com"] {
            let result = f.lifecycle.signin(email, &laptop(), None, false).await;
            assert!(matches!(result, Err(AuthError::Authentication(_))), "{email}");
        }
    }

    #[tokio::test]
    async fn known_device_rotates_in_place() {
        let f = fixture();
        let first = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        let again =
            f.lifecycle.signin("ann@example.com", &laptop(), Some(&first.refresh_token), false).await.unwrap();

        assert_eq!(again.token_id, first.token_id);
        assert_ne!(again.refresh_token, first.refresh_token);
        assert!(f.lifecycle.find(&first.refresh_token).await.unwrap().is_none());
        assert_eq!(f.storage.refresh_token_count(), 1);
    }

    #[tokio::test]
    async fn revoked_device_gets_locked_grant_and_same_token() {
        let f = fixture();
        let first = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();
        f.lifecycle.revoke(UserId(1), first.token_id, true, None).await.unwrap();

        let grant =
            f.lifecycle.signin("ann@example.com", &laptop(), Some(&first.refresh_token), true).await.unwrap();

        assert!(grant.locked);
        assert!(grant.access_token.is_none());
        assert_eq!(grant.refresh_token, first.refresh_token);
        assert_eq!(grant.token_id, first.token_id);
    }

    #[tokio::test]
    async fn someone_elses_token_registers_a_new_device() {
        let f = fixture();
        let ann = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        let bob = f.lifecycle.signin("bob@example.com", &laptop(), Some(&ann.refresh_token), false).await.unwrap();

        assert_ne!(bob.token_id, ann.token_id);
        assert!(f.lifecycle.find(&ann.refresh_token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_dies() {
        let f = fixture();
        let grant = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        let rotation = f.lifecycle.refresh(&grant.refresh_token).await.unwrap();
        assert_eq!(rotation.token_id, grant.token_id);

        assert_eq!(f.lifecycle.refresh(&grant.refresh_token).await.unwrap_err(), AuthError::InvalidRefreshToken);
        assert!(f.lifecycle.refresh(&rotation.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn locked_device_cannot_refresh() {
        let f = fixture();
        f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();
        let locked = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        assert_eq!(f.lifecycle.refresh(&locked.refresh_token).await.unwrap_err(), AuthError::DeviceLocked);
        assert!(f.lifecycle.find(&locked.refresh_token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unlock_requires_the_owners_proof() {
        let f = fixture();
        f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();
        let locked = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        let stranger = f.lifecycle.unlock(&locked.refresh_token, &proof_for("bob@example.com")).await;
        assert!(matches!(stranger, Err(AuthError::Forbidden(_))));

        let mut wrong_account = proof_for("ann@example.com");
        wrong_account.user_id = Some(UserId(2));
        assert!(matches!(
            f.lifecycle.unlock(&locked.refresh_token, &wrong_account).await,
            Err(AuthError::Forbidden(_))
        ));

        let row = f.lifecycle.unlock(&locked.refresh_token, &proof_for("ANN@example.com")).await.unwrap();
        assert_eq!(row.state, DeviceState::Active);
        assert!(f.lifecycle.refresh(&locked.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn cannot_revoke_or_delete_self() {
        let f = fixture();
        let grant = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();
        let current = Some(grant.refresh_token.as_str());

        assert!(matches!(
            f.lifecycle.revoke(UserId(1), grant.token_id, true, current).await,
            Err(AuthError::Forbidden(_))
        ));
        assert!(matches!(
            f.lifecycle.delete(UserId(1), grant.token_id, current).await,
            Err(AuthError::Forbidden(_))
        ));

        // Restoring your own device is allowed
        assert!(f.lifecycle.revoke(UserId(1), grant.token_id, false, current).await.is_ok());
    }

    #[tokio::test]
    async fn management_is_scoped_to_owner() {
        let f = fixture();
        let ann = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        let not_found = AuthError::NotFound("Device not found".to_string());
        assert_eq!(f.lifecycle.revoke(UserId(2), ann.token_id, true, None).await.unwrap_err(), not_found);
        assert_eq!(f.lifecycle.rename(UserId(2), ann.token_id, "mine", None).await.unwrap_err(), not_found);
        assert_eq!(f.lifecycle.delete(UserId(2), ann.token_id, None).await.unwrap_err(), not_found);
    }

    #[tokio::test]
    async fn revoke_all_spares_caller() {
        let f = fixture();
        let mine = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();
        f.lifecycle.signin("ann@example.com", &laptop(), None, true).await.unwrap();
        f.lifecycle.signin("ann@example.com", &laptop(), None, true).await.unwrap();
        f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        let revoked = f.lifecycle.revoke_all(UserId(1), Some(&mine.refresh_token)).await.unwrap();
        assert_eq!(revoked, 2);

        let devices = f.lifecycle.list(UserId(1), Some(&mine.refresh_token)).await.unwrap();
        let states: Vec<_> = devices.iter().map(|d| (d.current, d.state)).collect();
        assert_eq!(states.iter().filter(|(current, _)| *current).count(), 1);
        assert!(devices.iter().any(|d| d.current && d.state == DeviceState::Active));
        assert_eq!(devices.iter().filter(|d| d.state == DeviceState::Revoked).count(), 2);
        assert_eq!(devices.iter().filter(|d| d.state == DeviceState::Locked).count(), 1);
    }

    #[tokio::test]
    async fn rename_trims_and_validates() {
        let f = fixture();
        let grant = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        assert!(matches!(
            f.lifecycle.rename(UserId(1), grant.token_id, "   ", None).await,
            Err(AuthError::Validation(_))
        ));

        let view = f.lifecycle.rename(UserId(1), grant.token_id, "  Work laptop ", Some(&grant.refresh_token)).await;
        let view = view.unwrap();
        assert_eq!(view.device_name, "Work laptop");
        assert!(view.current);
    }

    #[tokio::test]
    async fn access_token_lifetimes_follow_role() {
        let f = fixture();
        let signer = TokenSigner::new([7; 32]);
        let now = f.env.wall_clock_secs();

        let base = signer.verify(&f.lifecycle.access_token(UserId(1), Role::Base), TokenPurpose::Access, now).unwrap();
        let sudo = signer.verify(&f.lifecycle.access_token(UserId(1), Role::Sudo), TokenPurpose::Access, now).unwrap();

        assert_eq!(base.exp - base.iat, 900);
        assert_eq!(sudo.exp - sudo.iat, 300);
        assert_eq!(sudo.role, Role::Sudo);
        assert!(base.kid.is_none());
    }

    #[tokio::test]
    async fn every_signin_mints_a_bypass_token() {
        let f = fixture();
        f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();
        let locked = f.lifecycle.signin("ann@example.com", &laptop(), None, false).await.unwrap();

        assert_eq!(f.lifecycle.bypass().resolve(&locked.bypass_token), Some(UserId(1)));
    }
}
