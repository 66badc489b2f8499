//! Error types for docket-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{DocumentId, UserId, VersionId};

/// Failures of the persistence layer (repository or content store).
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure, annotated with the path that was touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/commit path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse document record at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.docket/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A content reference that the store has no blob for.
    #[error("content blob missing: {reference}")]
    MissingBlob { reference: String },

    /// Backend refused the operation for a reason it could only describe.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Convenience constructor for [`StorageError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.into(),
        source,
    }
}

/// Every way a core operation can fail.
///
/// All variants are terminal for the operation that produced them. Only
/// [`CoreError::Storage`] can surface after a write was attempted, and the
/// operation's writes are rolled back before it is returned.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("user {user} is not allowed to access document {document}")]
    NotAuthorized { document: DocumentId, user: UserId },

    #[error("document {document} is being edited by {holder}")]
    DocumentLocked {
        document: DocumentId,
        holder: UserId,
        requester: UserId,
    },

    #[error("user {user} is already a collaborator on document {document}")]
    AlreadyCollaborator { document: DocumentId, user: UserId },

    #[error("user {user} is not a collaborator on document {document}")]
    NotACollaborator { document: DocumentId, user: UserId },

    #[error("owner {user} cannot be added as a collaborator on document {document}")]
    OwnerCannotBeCollaborator { document: DocumentId, user: UserId },

    #[error("owner {user} cannot be removed from document {document}")]
    OwnerCannotBeRemoved { document: DocumentId, user: UserId },

    #[error("collaborator {user} is currently editing document {document}")]
    CollaboratorIsEditing { document: DocumentId, user: UserId },

    #[error("document {document} expects extension {expected:?}, upload has {found:?}")]
    ExtensionMismatch {
        document: DocumentId,
        expected: String,
        found: String,
    },

    #[error("document {document} not found")]
    DocumentNotFound { document: DocumentId },

    #[error("document {document} has no version {version}")]
    VersionNotFound {
        document: DocumentId,
        version: VersionId,
    },

    #[error("owner {owner} already has a document named {name:?}")]
    NameTaken { owner: UserId, name: String },

    #[error("invalid document name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CoreError {
    /// Stable snake_case tag for the error kind, for callers that map errors
    /// onto their own responses.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotAuthorized { .. } => "not_authorized",
            CoreError::DocumentLocked { .. } => "document_locked",
            CoreError::AlreadyCollaborator { .. } => "already_collaborator",
            CoreError::NotACollaborator { .. } => "not_a_collaborator",
            CoreError::OwnerCannotBeCollaborator { .. } => "owner_cannot_be_collaborator",
            CoreError::OwnerCannotBeRemoved { .. } => "owner_cannot_be_removed",
            CoreError::CollaboratorIsEditing { .. } => "collaborator_is_editing",
            CoreError::ExtensionMismatch { .. } => "extension_mismatch",
            CoreError::DocumentNotFound { .. } => "document_not_found",
            CoreError::VersionNotFound { .. } => "version_not_found",
            CoreError::NameTaken { .. } => "name_taken",
            CoreError::InvalidName { .. } => "invalid_name",
            CoreError::Storage(_) => "storage_error",
        }
    }
}
