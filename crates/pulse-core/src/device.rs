//! Device-trust state machine.
//!
//! Governs whether a device's refresh token yields an access token. Pure: the
//! lifecycle component persists the state, this module only decides which
//! transitions are legal.
//!
//! # State Machine
//!
//! ```text
//!            first device or step-up
//! ┌────────┐ ───────────────────────────────────────┐
//! │ Unseen │                                        ↓
//! └────────┘  later device    ┌────────┐ unlock ┌────────┐ rotate
//!      └─────────────────────>│ Locked │───────>│ Active │<──────┐
//!                             └────────┘        └────────┘───────┘
//!                                                 │    ↑
//!                                          revoke │    │ unlock / restore
//!                                                 ↓    │
//!                                               ┌─────────┐
//!                                               │ Revoked │
//!                                               └─────────┘
//! ```
//!
//! `Unseen` is not stored; it is the absence of a row.

use serde::{Deserialize, Serialize};

/// Persisted trust state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Signed in but never trusted. Waiting for an out-of-band factor.
    Locked,
    /// Trusted. Rotation yields access tokens.
    Active,
    /// Trusted once, then revoked by the account holder.
    Revoked,
}

impl DeviceState {
    /// State of a newly registered device.
    ///
    /// The account's first device is trusted. Every later device starts
    /// locked unless it presented a step-up factor while signing in.
    pub fn initial(first_device: bool, stepped_up: bool) -> Self {
        if first_device || stepped_up { Self::Active } else { Self::Locked }
    }

    /// Revoked in the wire sense: the token yields no access token.
    pub fn is_revoked(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Only active devices rotate.
    pub fn can_rotate(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Unlock after an authenticated out-of-band proof.
    pub fn unlock(self) -> Self {
        Self::Active
    }

    /// Apply an explicit revoke/restore toggle from the account holder.
    ///
    /// Restoring a locked device activates it; revoking a device that was
    /// never trusted leaves it locked.
    pub fn set_revoked(self, revoke: bool) -> Self {
        match (self, revoke) {
            (_, false) => Self::Active,
            (Self::Locked, true) => Self::Locked,
            (Self::Active | Self::Revoked, true) => Self::Revoked,
        }
    }
}
