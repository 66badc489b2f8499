//! Content-addressed blob store on disk.
//!
//! Blobs live under `<home>/.docket/`, at the path their [`ContentRef`] names:
//! `content/<doc>/<sha256>.<ext>` and `diffs/<doc>/<sha256>.diff`.
//!
//! ## `put` protocol
//!
//! 1. SHA-256 the bytes (streamed for `put_file`).
//! 2. Derive the reference; if the blob already exists, report `created: false`.
//! 3. Write to `<path>.docket.tmp`.
//! 4. Rename to the final path (atomic on POSIX).

use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use docket_core::content::{blob_ref, digest};
use docket_core::error::io_err;
use docket_core::store::docket_root;
use docket_core::{BlobKind, ContentRef, ContentStore, DocumentId, StorageError, StoredBlob};

/// [`ContentStore`] writing one file per blob under `<home>/.docket`.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn at(home: &Path) -> Self {
        Self {
            root: docket_root(home),
        }
    }

    /// On-disk path of `reference`. Rejects references that would escape the root.
    pub fn blob_path(&self, reference: &ContentRef) -> Result<PathBuf, StorageError> {
        let rel = Path::new(&reference.0);
        let well_formed = !reference.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, std::path::Component::Normal(_)));
        if !well_formed {
            return Err(StorageError::MissingBlob {
                reference: reference.0.clone(),
            });
        }
        Ok(self.root.join(rel))
    }

    /// Materialize `reference` via `write_tmp` unless the blob is there already.
    fn install(
        &self,
        reference: ContentRef,
        write_tmp: impl FnOnce(&Path) -> io::Result<()>,
    ) -> Result<StoredBlob, StorageError> {
        let path = self.blob_path(&reference)?;
        if path.exists() {
            tracing::debug!("blob already stored: {reference}");
            return Ok(StoredBlob {
                reference,
                created: false,
            });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let tmp = PathBuf::from(format!("{}.docket.tmp", path.display()));
        if let Err(e) = write_tmp(&tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&tmp, e));
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }

        tracing::info!("stored blob: {reference}");
        Ok(StoredBlob {
            reference,
            created: true,
        })
    }
}

impl ContentStore for FsContentStore {
    fn put(
        &self,
        kind: BlobKind,
        document: DocumentId,
        extension: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredBlob, StorageError> {
        let reference = blob_ref(kind, document, &digest(bytes), extension);
        self.install(reference, |tmp| std::fs::write(tmp, bytes))
    }

    fn put_file(
        &self,
        kind: BlobKind,
        document: DocumentId,
        extension: Option<&str>,
        path: &Path,
    ) -> Result<StoredBlob, StorageError> {
        let mut hasher = Sha256::new();
        let mut file = File::open(path).map_err(|e| io_err(path, e))?;
        io::copy(&mut file, &mut hasher).map_err(|e| io_err(path, e))?;
        let reference = blob_ref(kind, document, &hex::encode(hasher.finalize()), extension);
        self.install(reference, |tmp| std::fs::copy(path, tmp).map(|_| ()))
    }

    fn get(&self, reference: &ContentRef) -> Result<Vec<u8>, StorageError> {
        let path = self.blob_path(reference)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::MissingBlob {
                reference: reference.0.clone(),
            }),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn remove(&self, reference: &ContentRef) -> Result<(), StorageError> {
        let path = self.blob_path(reference)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("removed blob: {reference}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_writes_under_document_namespace() {
        let home = TempDir::new().unwrap();
        let store = FsContentStore::at(home.path());
        let blob = store
            .put(BlobKind::Content, DocumentId(3), Some("txt"), b"hello\n")
            .unwrap();
        assert!(blob.created);
        assert!(blob.reference.0.starts_with("content/3/"));
        assert!(blob.reference.0.ends_with(".txt"));

        let path = store.blob_path(&blob.reference).unwrap();
        assert!(path.starts_with(home.path().join(".docket")));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello\n");

        let tmp = PathBuf::from(format!("{}.docket.tmp", path.display()));
        assert!(!tmp.exists(), "tmp file should be gone after rename");
    }

    #[test]
    fn second_put_is_not_created() {
        let home = TempDir::new().unwrap();
        let store = FsContentStore::at(home.path());
        let first = store.put(BlobKind::Diff, DocumentId(1), Some("diff"), b"+ a\n").unwrap();
        let second = store.put(BlobKind::Diff, DocumentId(1), Some("diff"), b"+ a\n").unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.reference, second.reference);
    }

    #[test]
    fn put_file_names_blob_like_put() {
        let home = TempDir::new().unwrap();
        let store = FsContentStore::at(home.path());
        let src = home.path().join("source.bin");
        std::fs::write(&src, b"streamed bytes").unwrap();

        let from_file = store
            .put_file(BlobKind::Content, DocumentId(2), Some("bin"), &src)
            .unwrap();
        let from_bytes = store
            .put(BlobKind::Content, DocumentId(2), Some("bin"), b"streamed bytes")
            .unwrap();
        assert_eq!(from_file.reference, from_bytes.reference);
        assert!(!from_bytes.created);
        assert_eq!(store.get(&from_file.reference).unwrap(), b"streamed bytes");
    }

    #[test]
    fn get_missing_and_remove_missing() {
        let home = TempDir::new().unwrap();
        let store = FsContentStore::at(home.path());
        let reference = ContentRef::from("content/1/abc.txt");
        assert!(matches!(
            store.get(&reference).unwrap_err(),
            StorageError::MissingBlob { .. }
        ));
        store.remove(&reference).expect("removing a missing blob is fine");
    }

    #[test]
    fn escaping_reference_is_rejected() {
        let home = TempDir::new().unwrap();
        let store = FsContentStore::at(home.path());
        for bad in ["../outside", "/etc/passwd", "content/../../x", ""] {
            assert!(store.blob_path(&ContentRef::from(bad)).is_err(), "{bad}");
        }
    }
}
