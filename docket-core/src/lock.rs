//! Edit-lock state machine.
//!
//! Two states, two transitions:
//!
//! ```text
//! Free ──acquire(u)──▶ HeldBy(u) ──release──▶ Free
//! ```
//!
//! `acquire` by the current holder is a no-op; by anyone else it fails.

use crate::error::CoreError;
use crate::types::{Document, EditLock, UserId};

/// Outcome of a successful [`Document::acquire_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransition {
    /// The lock moved from `Free` to `HeldBy(user)`.
    Acquired,
    /// `user` already held the lock; nothing changed.
    AlreadyHeld,
}

impl Document {
    /// Claim the edit lock for `user`.
    pub fn acquire_lock(&mut self, user: &UserId) -> Result<LockTransition, CoreError> {
        self.authorize(user)?;
        match &self.edit_lock {
            EditLock::Free => {
                self.edit_lock = EditLock::HeldBy(user.clone());
                Ok(LockTransition::Acquired)
            }
            EditLock::HeldBy(holder) if holder == user => Ok(LockTransition::AlreadyHeld),
            EditLock::HeldBy(holder) => Err(CoreError::DocumentLocked {
                document: self.id,
                holder: holder.clone(),
                requester: user.clone(),
            }),
        }
    }

    /// `Ok` unless the lock is held by someone other than `user`.
    pub fn check_lock(&self, user: &UserId) -> Result<(), CoreError> {
        match &self.edit_lock {
            EditLock::HeldBy(holder) if holder != user => Err(CoreError::DocumentLocked {
                document: self.id,
                holder: holder.clone(),
                requester: user.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Free the lock unconditionally. Returns the previous holder, if any.
    pub fn release_lock(&mut self) -> Option<UserId> {
        match std::mem::take(&mut self.edit_lock) {
            EditLock::Free => None,
            EditLock::HeldBy(holder) => Some(holder),
        }
    }
}
