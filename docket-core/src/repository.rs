//! Transactional repository interface and the in-memory implementation.
//!
//! # Transaction model
//!
//! Every write goes through [`Repository::create`] or [`Repository::update`].
//! Both hand the caller a [`DocumentTxn`]: a private copy of the document
//! plus a list of versions appended during the call. The repository holds an
//! exclusive per-document lock while the closure runs and commits the copy
//! and the appended versions together only if the closure returns `Ok`. On
//! `Err` nothing is written.
//!
//! Side effects outside the record (stored blobs) register an undo hook with
//! [`DocumentTxn::on_abort`]. Hooks run, newest first, if the closure fails or
//! the commit fails, while the per-document lock is still held.
//!
//! Name uniqueness per owner is enforced by the repository at commit time,
//! for creation and for renames made inside `update`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, StorageError};
use crate::types::{ContentRef, Document, DocumentId, DocumentVersion, UserId, VersionId};

/// Everything a repository needs to mint a new document.
///
/// Content is attached inside the creation closure, once the id is known:
/// blobs are namespaced by document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSeed {
    pub name: String,
    pub owner: UserId,
}

/// Rejects a document that reached commit without content.
pub(crate) fn ensure_has_content(document: &Document) -> Result<(), CoreError> {
    if document.content.is_empty() {
        return Err(StorageError::Unavailable(format!(
            "document {} created without content",
            document.id()
        ))
        .into());
    }
    Ok(())
}

/// Persisted form of a document together with its version chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document: Document,
    #[serde(default)]
    pub versions: Vec<DocumentVersion>,
}

/// Staged changes to one document.
///
/// Existing versions are not reachable from here; the only way to touch the
/// chain is to append.
pub struct DocumentTxn<'h> {
    document: Document,
    committed_versions: u64,
    last_created_at: Option<DateTime<Utc>>,
    appended: Vec<DocumentVersion>,
    on_abort: Vec<Box<dyn FnOnce() + 'h>>,
}

impl<'h> DocumentTxn<'h> {
    /// Start a transaction over `document` whose chain is `chain`.
    pub fn begin(document: Document, chain: &[DocumentVersion]) -> Self {
        Self {
            document,
            committed_versions: chain.len() as u64,
            last_created_at: chain.last().map(|v| v.created_at),
            appended: Vec::new(),
            on_abort: Vec::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Versions appended so far in this transaction.
    pub fn appended(&self) -> &[DocumentVersion] {
        &self.appended
    }

    /// Register `undo` to run if this transaction does not commit.
    pub fn on_abort(&mut self, undo: impl FnOnce() + 'h) {
        self.on_abort.push(Box::new(undo));
    }

    pub(crate) fn next_version_id(&self) -> VersionId {
        VersionId(self.committed_versions + self.appended.len() as u64 + 1)
    }

    pub(crate) fn last_created_at(&self) -> Option<DateTime<Utc>> {
        self.appended
            .last()
            .map(|v| v.created_at)
            .or(self.last_created_at)
    }

    pub(crate) fn push_version(&mut self, version: DocumentVersion) {
        self.appended.push(version);
    }

    /// Consume the transaction, yielding the staged document and new versions.
    /// Pending abort hooks are discarded.
    pub fn into_parts(self) -> (Document, Vec<DocumentVersion>) {
        (self.document, self.appended)
    }

    /// Run `f` over the transaction, then hand the staged state to `commit`.
    /// Abort hooks run if either step fails.
    pub fn run<T, F, C>(mut self, f: F, commit: C) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Self) -> Result<T, CoreError>,
        C: FnOnce(Document, Vec<DocumentVersion>) -> Result<(), CoreError>,
    {
        let out = match f(&mut self) {
            Ok(out) => out,
            Err(e) => {
                run_hooks(self.on_abort);
                return Err(e);
            }
        };
        let hooks = std::mem::take(&mut self.on_abort);
        match commit(self.document, self.appended) {
            Ok(()) => Ok(out),
            Err(e) => {
                run_hooks(hooks);
                Err(e)
            }
        }
    }
}

fn run_hooks(hooks: Vec<Box<dyn FnOnce() + '_>>) {
    for undo in hooks.into_iter().rev() {
        undo();
    }
}

impl fmt::Debug for DocumentTxn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentTxn")
            .field("document", &self.document)
            .field("committed_versions", &self.committed_versions)
            .field("appended", &self.appended)
            .field("on_abort", &self.on_abort.len())
            .finish()
    }
}

/// Transactional storage for documents and their version chains.
pub trait Repository: Send + Sync {
    /// Allocate an id for a new document built from `seed`, run `f` over it,
    /// and persist the result. `f` must set the document's content. Fails
    /// with [`CoreError::NameTaken`] if the owner already has a document
    /// with that name.
    fn create<'h, T, F>(&self, seed: DocumentSeed, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut DocumentTxn<'h>) -> Result<T, CoreError>;

    /// Run `f` with exclusive access to document `id` and commit atomically.
    fn update<'h, T, F>(&self, id: DocumentId, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut DocumentTxn<'h>) -> Result<T, CoreError>;

    fn get(&self, id: DocumentId) -> Result<Document, CoreError>;

    /// Version chain of `id`, oldest first.
    fn versions(&self, id: DocumentId) -> Result<Vec<DocumentVersion>, CoreError>;

    /// All documents, ordered by id.
    fn list(&self) -> Result<Vec<Document>, CoreError>;
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Catalog {
    names: BTreeMap<(UserId, String), DocumentId>,
    last_id: u64,
}

/// Process-local repository with per-document mutexes.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<BTreeMap<DocumentId, Arc<Mutex<DocumentRecord>>>>,
    catalog: Mutex<Catalog>,
    fail_next_commit: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with [`StorageError::Unavailable`] after the
    /// transaction closure has run. Used to exercise rollback paths.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn check_injected_failure(&self) -> Result<(), CoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected commit failure".to_string()).into());
        }
        Ok(())
    }

    fn entry(&self, id: DocumentId) -> Result<Arc<Mutex<DocumentRecord>>, CoreError> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or(CoreError::DocumentNotFound { document: id })
    }
}

impl Repository for MemoryRepository {
    fn create<'h, T, F>(&self, seed: DocumentSeed, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut DocumentTxn<'h>) -> Result<T, CoreError>,
    {
        let mut catalog = self.catalog.lock();
        let key = (seed.owner.clone(), seed.name.clone());
        if catalog.names.contains_key(&key) {
            return Err(CoreError::NameTaken {
                owner: seed.owner,
                name: seed.name,
            });
        }

        let id = DocumentId(catalog.last_id + 1);
        let document = Document::new(id, seed.name, seed.owner, ContentRef::default(), Utc::now());
        DocumentTxn::begin(document, &[]).run(f, |mut document, versions| {
            self.check_injected_failure()?;
            ensure_has_content(&document)?;
            // The closure may not rename a document it is creating.
            document.name = key.1.clone();
            catalog.names.insert(key, id);
            catalog.last_id = id.0;
            self.records.write().insert(
                id,
                Arc::new(Mutex::new(DocumentRecord { document, versions })),
            );
            Ok(())
        })
    }

    fn update<'h, T, F>(&self, id: DocumentId, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut DocumentTxn<'h>) -> Result<T, CoreError>,
    {
        let entry = self.entry(id)?;
        let mut record = entry.lock();
        let txn = DocumentTxn::begin(record.document.clone(), &record.versions);
        txn.run(f, |document, appended| {
            self.check_injected_failure()?;
            if document.name != record.document.name {
                let mut catalog = self.catalog.lock();
                let key = (document.owner.clone(), document.name.clone());
                if catalog.names.contains_key(&key) {
                    return Err(CoreError::NameTaken {
                        owner: key.0,
                        name: key.1,
                    });
                }
                catalog
                    .names
                    .remove(&(record.document.owner.clone(), record.document.name.clone()));
                catalog.names.insert(key, id);
            }
            record.document = document;
            record.versions.extend(appended);
            Ok(())
        })
    }

    fn get(&self, id: DocumentId) -> Result<Document, CoreError> {
        Ok(self.entry(id)?.lock().document.clone())
    }

    fn versions(&self, id: DocumentId) -> Result<Vec<DocumentVersion>, CoreError> {
        Ok(self.entry(id)?.lock().versions.clone())
    }

    fn list(&self) -> Result<Vec<Document>, CoreError> {
        let entries: Vec<_> = self.records.read().values().cloned().collect();
        Ok(entries
            .into_iter()
            .map(|entry| entry.lock().document.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::append_version;

    fn seed(name: &str) -> DocumentSeed {
        DocumentSeed {
            name: name.to_string(),
            owner: UserId::from("alice"),
        }
    }

    fn with_content(txn: &mut DocumentTxn<'_>) -> Result<(), CoreError> {
        let content = ContentRef(format!("content/{}/aa.txt", txn.document().id()));
        txn.document_mut().content = content.clone();
        append_version(txn, content, &UserId::from("alice"), None);
        Ok(())
    }

    fn create(repo: &MemoryRepository, name: &str) -> DocumentId {
        repo.create(seed(name), |txn| {
            with_content(txn)?;
            Ok(txn.document().id())
        })
        .expect("create")
    }

    #[test]
    fn ids_are_sequential() {
        let repo = MemoryRepository::new();
        assert_eq!(create(&repo, "a"), DocumentId(1));
        assert_eq!(create(&repo, "b"), DocumentId(2));
        assert_eq!(repo.list().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_name_per_owner_is_rejected() {
        let repo = MemoryRepository::new();
        create(&repo, "notes");
        let err = repo.create(seed("notes"), with_content).unwrap_err();
        assert!(matches!(err, CoreError::NameTaken { .. }));

        let other_owner = DocumentSeed {
            owner: UserId::from("bob"),
            ..seed("notes")
        };
        repo.create(other_owner, with_content)
            .expect("same name, other owner");
    }

    #[test]
    fn create_without_content_is_refused() {
        let repo = MemoryRepository::new();
        let err = repo.create(seed("empty"), |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::Unavailable(_))));
        assert!(repo.list().unwrap().is_empty());
        // The id and the name were not consumed.
        assert_eq!(create(&repo, "empty"), DocumentId(1));
    }

    #[test]
    fn failed_closure_commits_nothing() {
        let repo = MemoryRepository::new();
        let id = create(&repo, "notes");
        let err = repo
            .update(id, |txn| {
                txn.document_mut().acquire_lock(&UserId::from("alice"))?;
                append_version(txn, ContentRef::from("content/bb.txt"), &UserId::from("alice"), None);
                Err::<(), _>(CoreError::DocumentNotFound { document: id })
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::DocumentNotFound { .. }));
        assert!(repo.get(id).unwrap().edit_lock().is_free());
        assert_eq!(repo.versions(id).unwrap().len(), 1);
    }

    #[test]
    fn injected_commit_failure_rolls_back() {
        let repo = MemoryRepository::new();
        let id = create(&repo, "notes");
        repo.fail_next_commit();
        let err = repo
            .update(id, |txn| {
                txn.document_mut().acquire_lock(&UserId::from("alice"))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::Unavailable(_))));
        assert!(repo.get(id).unwrap().edit_lock().is_free());

        // The failure is one-shot.
        repo.update(id, |txn| {
            txn.document_mut().acquire_lock(&UserId::from("alice"))?;
            Ok(())
        })
        .expect("second commit");
        assert!(!repo.get(id).unwrap().edit_lock().is_free());
    }

    #[test]
    fn abort_hooks_run_newest_first_on_failure_only() {
        let repo = MemoryRepository::new();
        let id = create(&repo, "notes");
        let log = Mutex::new(Vec::new());

        let _ = repo.update(id, |txn| {
            txn.on_abort(|| log.lock().push("first"));
            txn.on_abort(|| log.lock().push("second"));
            Err::<(), _>(CoreError::DocumentNotFound { document: id })
        });
        assert_eq!(*log.lock(), vec!["second", "first"]);

        repo.fail_next_commit();
        let _ = repo.update(id, |txn| {
            txn.on_abort(|| log.lock().push("commit failed"));
            Ok(())
        });
        assert_eq!(log.lock().len(), 3);

        repo.update(id, |txn| {
            txn.on_abort(|| log.lock().push("never"));
            Ok(())
        })
        .expect("commit");
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn rename_respects_uniqueness() {
        let repo = MemoryRepository::new();
        let a = create(&repo, "a");
        create(&repo, "b");
        let err = repo
            .update(a, |txn| {
                txn.document_mut().name = "b".to_string();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::NameTaken { .. }));

        repo.update(a, |txn| {
            txn.document_mut().name = "c".to_string();
            Ok(())
        })
        .expect("rename");
        // The old name is free again.
        create(&repo, "a");
    }

    #[test]
    fn unknown_document() {
        let repo = MemoryRepository::new();
        let err = repo.update(DocumentId(42), |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::DocumentNotFound { .. }));
        assert!(repo.versions(DocumentId(42)).is_err());
    }
}
