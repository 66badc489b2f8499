//! Document update orchestrator.
//!
//! [`Engine`] composes the access rules, the diff engine, the content store
//! and the version chain into the operations callers use. Every mutating
//! operation is one repository transaction:
//!
//! 1. Load the document under its exclusive lock.
//! 2. Validate (existence, identity, lock, file type) in a fixed order.
//! 3. Store any new blobs, registering each for removal on abort.
//! 4. Stage the document change and the new version.
//! 5. Commit both, or nothing.

use std::path::Path;

use tempfile::NamedTempFile;

use docket_core::error::io_err;
use docket_core::media::media_type_for;
use docket_core::{
    append_version, BlobKind, ContentRef, ContentStore, CoreError, Document, DocumentId,
    DocumentSeed, DocumentTxn, DocumentVersion, FsRepository, LockTransition, Repository,
    StorageError, StoredBlob, Upload, UserId, VersionId,
};

use crate::blob_store::FsContentStore;
use crate::config::{self, EngineConfig, IdenticalUploadPolicy};
use crate::diff::{compute_diff, contents_are_identical, DiffArtifact};
use crate::error::ConfigError;

/// Extension of stored diff artifacts.
pub const DIFF_EXTENSION: &str = "diff";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What a successful [`Engine::fetch_and_lock`] hands to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHandle {
    pub document: Document,
    pub content: ContentRef,
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    /// Suggested download name: document name plus the stored extension.
    pub file_name: String,
    /// `AlreadyHeld` when the requester was already editing.
    pub transition: LockTransition,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The engine every front end (CLI, daemon) drives.
#[derive(Debug)]
pub struct Engine<R, S> {
    repo: R,
    store: S,
    config: EngineConfig,
}

/// Engine over the on-disk repository and blob store.
pub type FsEngine = Engine<FsRepository, FsContentStore>;

impl FsEngine {
    /// Engine rooted at `home`, configured from `<home>/.docket/config.yaml`.
    pub fn open_at(home: &Path) -> Result<Self, ConfigError> {
        let config = config::load_at(home)?;
        Ok(Engine::new(
            FsRepository::at(home),
            FsContentStore::at(home),
            config,
        ))
    }
}

impl<R: Repository, S: ContentStore> Engine<R, S> {
    pub fn new(repo: R, store: S, config: EngineConfig) -> Self {
        Self {
            repo,
            store,
            config,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // 1. Creation and collaborators
    // -----------------------------------------------------------------------

    /// Create a document owned by `owner` from `upload`, with version 1.
    ///
    /// `name` must be a single plain path component, see [`Document::validate_name`].
    pub fn create_document(
        &self,
        name: &str,
        upload: &Upload,
        owner: &UserId,
    ) -> Result<(Document, DocumentVersion), CoreError> {
        Document::validate_name(name)?;
        let seed = DocumentSeed {
            name: name.to_string(),
            owner: owner.clone(),
        };
        let created = self.repo.create(seed, |txn| {
            let id = txn.document().id();
            let blob = self
                .store
                .put(BlobKind::Content, id, upload.extension(), &upload.bytes)?;
            let content = stage_blob(txn, &self.store, blob);
            txn.document_mut().content = content.clone();
            let version = append_version(txn, content, owner, None);
            Ok((txn.document().clone(), version))
        })?;
        tracing::info!(
            "{owner} created document {} ({name:?})",
            created.0.id()
        );
        Ok(created)
    }

    pub fn add_collaborator(
        &self,
        id: DocumentId,
        caller: &UserId,
        user: &UserId,
    ) -> Result<Document, CoreError> {
        let document = self.repo.update(id, |txn| {
            txn.document_mut().add_collaborator(caller, user)?;
            Ok(txn.document().clone())
        })?;
        tracing::info!("{caller} shared document {id} with {user}");
        Ok(document)
    }

    pub fn remove_collaborator(
        &self,
        id: DocumentId,
        caller: &UserId,
        user: &UserId,
    ) -> Result<Document, CoreError> {
        let document = self.repo.update(id, |txn| {
            txn.document_mut().remove_collaborator(caller, user)?;
            Ok(txn.document().clone())
        })?;
        tracing::info!("{caller} removed {user} from document {id}");
        Ok(document)
    }

    /// Rename a document. Owner only; names are unique per owner.
    pub fn rename_document(
        &self,
        id: DocumentId,
        caller: &UserId,
        new_name: &str,
    ) -> Result<Document, CoreError> {
        Document::validate_name(new_name)?;
        let document = self.repo.update(id, |txn| {
            txn.document().authorize_owner(caller)?;
            txn.document_mut().name = new_name.to_string();
            Ok(txn.document().clone())
        })?;
        tracing::info!("{caller} renamed document {id} to {new_name:?}");
        Ok(document)
    }

    // -----------------------------------------------------------------------
    // 2. Editing
    // -----------------------------------------------------------------------

    /// Claim the edit lock for `requester` and return the current content.
    ///
    /// The content is read before the lock is committed, so a read failure
    /// leaves the lock where it was.
    pub fn fetch_and_lock(
        &self,
        id: DocumentId,
        requester: &UserId,
    ) -> Result<ContentHandle, CoreError> {
        let handle = self.repo.update(id, |txn| {
            let transition = txn.document_mut().acquire_lock(requester)?;
            let document = txn.document().clone();
            let bytes = self.store.get(&document.content)?;
            Ok(ContentHandle {
                content: document.content.clone(),
                media_type: media_type_for(document.content.extension()),
                file_name: document.file_name(),
                bytes,
                document,
                transition,
            })
        })?;
        match handle.transition {
            LockTransition::Acquired => tracing::info!("{requester} locked document {id}"),
            LockTransition::AlreadyHeld => {
                tracing::debug!("{requester} fetched document {id} again")
            }
        }
        Ok(handle)
    }

    /// Accept edited content for a document.
    ///
    /// Checks, in order: the document exists, `author` participates, the
    /// lock is free or held by `author`, the file type matches. Identical
    /// content appends a version without a diff and handles the lock per
    /// [`IdenticalUploadPolicy`]. New content stores the content and its
    /// diff, releases the lock and appends a version carrying the diff.
    pub fn upload_new_content(
        &self,
        id: DocumentId,
        upload: &Upload,
        author: &UserId,
    ) -> Result<(Document, DocumentVersion), CoreError> {
        let (document, version) = self.repo.update(id, |txn| {
            let document = txn.document();
            document.authorize(author)?;
            document.check_lock(author)?;
            let expected = document.content.extension();
            let found = upload.extension();
            if expected != found {
                return Err(CoreError::ExtensionMismatch {
                    document: id,
                    expected: expected.unwrap_or_default().to_string(),
                    found: found.unwrap_or_default().to_string(),
                });
            }

            let current_ref = document.content.clone();
            let current = self.store.get(&current_ref)?;
            if contents_are_identical(&current, &upload.bytes) {
                if self.config.identical_upload == IdenticalUploadPolicy::ReleaseLock {
                    txn.document_mut().release_lock();
                }
                let version = append_version(txn, current_ref, author, None);
                return Ok((txn.document().clone(), version));
            }

            let diff = self.store_diff(txn, &current, &upload.bytes)?;
            let blob = self
                .store
                .put(BlobKind::Content, id, upload.extension(), &upload.bytes)?;
            let content = stage_blob(txn, &self.store, blob);
            txn.document_mut().content = content.clone();
            txn.document_mut().release_lock();
            let version = append_version(txn, content, author, Some(diff));
            Ok((txn.document().clone(), version))
        })?;

        match &version.diff {
            Some(diff) => tracing::info!("{author} uploaded {} of document {id} ({diff})", version.id),
            None => tracing::info!(
                "{author} uploaded identical content as {} of document {id}",
                version.id
            ),
        }
        Ok((document, version))
    }

    /// Give up the edit lock without uploading. Allowed for the holder and
    /// the owner; a free lock stays free.
    pub fn release_lock(
        &self,
        id: DocumentId,
        caller: &UserId,
    ) -> Result<Option<UserId>, CoreError> {
        let released = self.repo.update(id, |txn| {
            let document = txn.document();
            document.authorize(caller)?;
            match document.edit_lock().holder() {
                None => return Ok(None),
                Some(holder) if holder == caller || document.owner() == caller => {}
                Some(_) => {
                    return Err(CoreError::NotAuthorized {
                        document: id,
                        user: caller.clone(),
                    })
                }
            }
            Ok(txn.document_mut().release_lock())
        })?;
        if let Some(holder) = &released {
            tracing::info!("{caller} released the lock {holder} held on document {id}");
        }
        Ok(released)
    }

    // -----------------------------------------------------------------------
    // 3. Reads
    // -----------------------------------------------------------------------

    pub fn get_document(&self, id: DocumentId) -> Result<Document, CoreError> {
        self.repo.get(id)
    }

    /// All documents, ordered by id.
    pub fn list_documents(&self) -> Result<Vec<Document>, CoreError> {
        self.repo.list()
    }

    /// Version chain of `id`, oldest first.
    pub fn list_versions(&self, id: DocumentId) -> Result<Vec<DocumentVersion>, CoreError> {
        self.repo.versions(id)
    }

    /// Content snapshot of one version.
    pub fn read_version(&self, id: DocumentId, version: VersionId) -> Result<Vec<u8>, CoreError> {
        let version = self.find_version(id, version)?;
        Ok(self.store.get(&version.content)?)
    }

    /// Serialized diff artifact of one version, if it has one. Parse it with
    /// [`DiffArtifact::parse`].
    pub fn read_diff(
        &self,
        id: DocumentId,
        version: VersionId,
    ) -> Result<Option<Vec<u8>>, CoreError> {
        let version = self.find_version(id, version)?;
        match &version.diff {
            Some(diff) => Ok(Some(self.store.get(diff)?)),
            None => Ok(None),
        }
    }

    fn find_version(
        &self,
        id: DocumentId,
        version: VersionId,
    ) -> Result<DocumentVersion, CoreError> {
        self.repo
            .versions(id)?
            .into_iter()
            .find(|v| v.id == version)
            .ok_or(CoreError::VersionNotFound {
                document: id,
                version,
            })
    }

    // -----------------------------------------------------------------------
    // 4. Diff storage
    // -----------------------------------------------------------------------

    /// Diff `old` against `new` and store the artifact for the document in `txn`.
    fn store_diff<'h>(
        &'h self,
        txn: &mut DocumentTxn<'h>,
        old: &[u8],
        new: &[u8],
    ) -> Result<ContentRef, CoreError> {
        let id = txn.document().id();
        let artifact = compute_diff(old, new);
        let combined = old.len() as u64 + new.len() as u64;
        let blob = if combined > self.config.spill_threshold {
            let spill = self.spill(&artifact)?;
            tracing::debug!("spilled diff for document {id} to {}", spill.path().display());
            self.store
                .put_file(BlobKind::Diff, id, Some(DIFF_EXTENSION), spill.path())?
        } else {
            self.store
                .put(BlobKind::Diff, id, Some(DIFF_EXTENSION), &artifact.to_bytes())?
        };
        Ok(stage_blob(txn, &self.store, blob))
    }

    /// Serialize `artifact` into a temporary file removed when it is dropped.
    fn spill(&self, artifact: &DiffArtifact<'_>) -> Result<NamedTempFile, StorageError> {
        let dir = self
            .config
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let mut file = tempfile::Builder::new()
            .prefix("docket-diff-")
            .suffix(".diff")
            .tempfile_in(&dir)
            .map_err(|e| io_err(&dir, e))?;
        artifact
            .write_to(&mut file)
            .map_err(|e| io_err(file.path(), e))?;
        Ok(file)
    }
}

/// Keep the reference of `blob`, removing the blob again if `txn` aborts and
/// this transaction created it.
fn stage_blob<'h, S: ContentStore>(
    txn: &mut DocumentTxn<'h>,
    store: &'h S,
    blob: StoredBlob,
) -> ContentRef {
    if blob.created {
        let reference = blob.reference.clone();
        txn.on_abort(move || match store.remove(&reference) {
            Ok(()) => tracing::debug!("rolled back blob {reference}"),
            Err(e) => tracing::warn!("rollback could not remove blob {reference}: {e}"),
        });
    }
    blob.reference
}
