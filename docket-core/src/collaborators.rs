//! Collaborator set management and participant authorization.
//!
//! Checks run in a fixed order and the first failure wins, so a caller that
//! is not the owner always sees `NotAuthorized` regardless of the target user.

use crate::error::CoreError;
use crate::types::{Document, UserId};

impl Document {
    /// `true` for the owner and every collaborator.
    pub fn is_participant(&self, user: &UserId) -> bool {
        &self.owner == user || self.collaborators.contains(user)
    }

    /// `Ok` when `user` may read or edit this document.
    pub fn authorize(&self, user: &UserId) -> Result<(), CoreError> {
        if self.is_participant(user) {
            Ok(())
        } else {
            Err(CoreError::NotAuthorized {
                document: self.id,
                user: user.clone(),
            })
        }
    }

    /// `Ok` when `caller` owns this document.
    pub fn authorize_owner(&self, caller: &UserId) -> Result<(), CoreError> {
        if &self.owner == caller {
            Ok(())
        } else {
            Err(CoreError::NotAuthorized {
                document: self.id,
                user: caller.clone(),
            })
        }
    }

    /// Grant `user` access. Only the owner may do this.
    pub fn add_collaborator(&mut self, caller: &UserId, user: &UserId) -> Result<(), CoreError> {
        self.authorize_owner(caller)?;
        if &self.owner == user {
            return Err(CoreError::OwnerCannotBeCollaborator {
                document: self.id,
                user: user.clone(),
            });
        }
        if self.collaborators.contains(user) {
            return Err(CoreError::AlreadyCollaborator {
                document: self.id,
                user: user.clone(),
            });
        }
        self.collaborators.insert(user.clone());
        Ok(())
    }

    /// Revoke `user`'s access. Rejected while `user` holds the edit lock.
    pub fn remove_collaborator(
        &mut self,
        caller: &UserId,
        user: &UserId,
    ) -> Result<(), CoreError> {
        self.authorize_owner(caller)?;
        if &self.owner == user {
            return Err(CoreError::OwnerCannotBeRemoved {
                document: self.id,
                user: user.clone(),
            });
        }
        if !self.collaborators.contains(user) {
            return Err(CoreError::NotACollaborator {
                document: self.id,
                user: user.clone(),
            });
        }
        if self.edit_lock.holder() == Some(user) {
            return Err(CoreError::CollaboratorIsEditing {
                document: self.id,
                user: user.clone(),
            });
        }
        self.collaborators.remove(user);
        Ok(())
    }
}
