//! Content store interface and an in-memory implementation.
//!
//! Blobs are content-addressed within their document:
//! `<kind prefix>/<document id>/<sha256 hex>[.<ext>]`. A blob is never
//! rewritten once stored, so two references with the same name always name
//! the same bytes. Blobs are not shared between documents, so rolling back
//! one document's write can never pull a blob out from under another.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{io_err, StorageError};
use crate::types::{BlobKind, ContentRef, DocumentId};

/// Result of storing a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub reference: ContentRef,
    /// `false` when an identical blob was already present. Rollback must only
    /// remove blobs it created.
    pub created: bool,
}

/// Byte-addressable blob storage with path-like references.
pub trait ContentStore: Send + Sync {
    /// Store `bytes` for `document` under a content-derived name.
    fn put(
        &self,
        kind: BlobKind,
        document: DocumentId,
        extension: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredBlob, StorageError>;

    /// Store the contents of the file at `path`.
    fn put_file(
        &self,
        kind: BlobKind,
        document: DocumentId,
        extension: Option<&str>,
        path: &Path,
    ) -> Result<StoredBlob, StorageError> {
        let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
        self.put(kind, document, extension, &bytes)
    }

    fn get(&self, reference: &ContentRef) -> Result<Vec<u8>, StorageError>;

    fn remove(&self, reference: &ContentRef) -> Result<(), StorageError>;
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Reference for a blob of `kind` belonging to `document` whose SHA-256 is `digest`.
pub fn blob_ref(
    kind: BlobKind,
    document: DocumentId,
    digest: &str,
    extension: Option<&str>,
) -> ContentRef {
    let prefix = kind.prefix();
    match extension {
        Some(ext) if !ext.is_empty() => ContentRef(format!("{prefix}/{document}/{digest}.{ext}")),
        _ => ContentRef(format!("{prefix}/{document}/{digest}")),
    }
}

/// Process-local content store, used by tests and embedders that keep
/// content elsewhere.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: Mutex<HashMap<ContentRef, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }

    pub fn contains(&self, reference: &ContentRef) -> bool {
        self.blobs.lock().contains_key(reference)
    }
}

impl ContentStore for MemoryContentStore {
    fn put(
        &self,
        kind: BlobKind,
        document: DocumentId,
        extension: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredBlob, StorageError> {
        let reference = blob_ref(kind, document, &digest(bytes), extension);
        let mut blobs = self.blobs.lock();
        if blobs.contains_key(&reference) {
            return Ok(StoredBlob {
                reference,
                created: false,
            });
        }
        blobs.insert(reference.clone(), bytes.to_vec());
        Ok(StoredBlob {
            reference,
            created: true,
        })
    }

    fn get(&self, reference: &ContentRef) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::MissingBlob {
                reference: reference.0.clone(),
            })
    }

    fn remove(&self, reference: &ContentRef) -> Result<(), StorageError> {
        self.blobs.lock().remove(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn blob_ref_layout() {
        let doc = DocumentId(5);
        assert_eq!(
            blob_ref(BlobKind::Content, doc, "ff00", Some("txt")).0,
            "content/5/ff00.txt"
        );
        assert_eq!(blob_ref(BlobKind::Diff, doc, "ff00", None).0, "diffs/5/ff00");
        assert_eq!(blob_ref(BlobKind::Diff, doc, "ff00", Some("")).0, "diffs/5/ff00");
    }

    #[test]
    fn identical_put_reports_not_created() {
        let store = MemoryContentStore::new();
        let doc = DocumentId(1);
        let first = store.put(BlobKind::Content, doc, Some("txt"), b"hello").unwrap();
        let second = store.put(BlobKind::Content, doc, Some("txt"), b"hello").unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.reference, second.reference);
        assert_eq!(store.len(), 1);

        let elsewhere = store.put(BlobKind::Content, DocumentId(2), Some("txt"), b"hello").unwrap();
        assert!(elsewhere.created, "documents never share blobs");
    }

    #[test]
    fn missing_blob_is_an_error() {
        let store = MemoryContentStore::new();
        let err = store.get(&ContentRef::from("content/nope.txt")).unwrap_err();
        assert!(matches!(err, StorageError::MissingBlob { .. }));
    }
}
