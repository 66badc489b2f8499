//! Domain types for Docket documents and their version chains.
//!
//! The guarded fields of [`Document`] (owner, collaborators, edit lock) are
//! crate-private: they change only through the transitions in
//! [`crate::collaborators`] and [`crate::lock`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identity of a user, as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Repository-allocated document identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Position of a version in its document's chain, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('v').unwrap_or(s).parse().map(Self)
    }
}

/// Path-like reference to a blob in a [`crate::ContentStore`].
///
/// The extension of the reference is the file type of the content it names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(pub String);

impl ContentRef {
    /// File extension of the referenced blob, without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.0).extension().and_then(|e| e.to_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ContentRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Single-writer edit lock on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "holder", rename_all = "snake_case")]
pub enum EditLock {
    #[default]
    Free,
    HeldBy(UserId),
}

impl EditLock {
    pub fn holder(&self) -> Option<&UserId> {
        match self {
            EditLock::Free => None,
            EditLock::HeldBy(user) => Some(user),
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, EditLock::Free)
    }
}

impl fmt::Display for EditLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditLock::Free => write!(f, "free"),
            EditLock::HeldBy(user) => write!(f, "held by {user}"),
        }
    }
}

/// Which area of the content store a blob belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// Document and version content snapshots.
    Content,
    /// Serialized diff artifacts.
    Diff,
}

impl BlobKind {
    /// Directory prefix used in [`ContentRef`]s of this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            BlobKind::Content => "content",
            BlobKind::Diff => "diffs",
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A shared document: live content plus the access state guarding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub(crate) id: DocumentId,
    pub name: String,
    pub content: ContentRef,
    pub(crate) owner: UserId,
    #[serde(default)]
    pub(crate) collaborators: BTreeSet<UserId>,
    #[serde(default)]
    pub(crate) edit_lock: EditLock,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// A freshly created document: no collaborators, lock free.
    pub fn new(
        id: DocumentId,
        name: impl Into<String>,
        owner: UserId,
        content: ContentRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            content,
            owner,
            collaborators: BTreeSet::new(),
            edit_lock: EditLock::Free,
            created_at,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn collaborators(&self) -> &BTreeSet<UserId> {
        &self.collaborators
    }

    pub fn edit_lock(&self) -> &EditLock {
        &self.edit_lock
    }

    /// Check that `name` can be used as a document name.
    ///
    /// The name becomes the stem of the download file name, so it must be a
    /// single plain path component.
    pub fn validate_name(name: &str) -> Result<(), CoreError> {
        let reason = if name.trim().is_empty() {
            "empty"
        } else if name.contains(['/', '\\']) {
            "path separator"
        } else if name == "." || name == ".." {
            "relative path component"
        } else if name.contains('\0') {
            "nul byte"
        } else {
            return Ok(());
        };
        Err(CoreError::InvalidName {
            name: name.to_string(),
            reason,
        })
    }

    /// Suggested download name: document name plus the stored extension.
    pub fn file_name(&self) -> String {
        match self.content.extension() {
            Some(ext) => format!("{}.{ext}", self.name),
            None => self.name.clone(),
        }
    }
}

/// One immutable entry of a document's version chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: VersionId,
    pub document: DocumentId,
    pub content: ContentRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<ContentRef>,
    pub author: UserId,
    pub created_at: DateTime<Utc>,
}

/// Bytes submitted by a caller together with the name they arrived under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Extension of the uploaded file name, without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
