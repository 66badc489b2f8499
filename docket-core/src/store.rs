//! YAML-file repository.
//!
//! # Storage layout
//!
//! ```text
//! ~/.docket/
//!   documents/
//!     .catalog.lock      (held while allocating ids or changing names)
//!     <id>.yaml          (document + version chain: mode 0600)
//!     <id>.lock          (exclusive lock held for the length of a transaction)
//! ```
//!
//! A commit serializes the whole record to `<id>.yaml.tmp` and renames it
//! over `<id>.yaml`, so readers see either the old or the new record, never
//! a mix. Locks are OS file locks and therefore hold across threads and
//! across processes.
//!
//! # API pattern
//!
//! Path helpers come in two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - [`FsRepository::open`]: derives home from `dirs::home_dir()`

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, CoreError, StorageError};
use crate::repository::{ensure_has_content, DocumentRecord, DocumentSeed, DocumentTxn, Repository};
use crate::types::{ContentRef, Document, DocumentId, DocumentVersion, UserId};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.docket/`
pub fn docket_root(home: &Path) -> PathBuf {
    home.join(".docket")
}

/// `<home>/.docket/documents/`
pub fn documents_dir_at(home: &Path) -> PathBuf {
    docket_root(home).join("documents")
}

/// `<home>/.docket/documents/<id>.yaml`: pure, no I/O.
pub fn record_path_at(home: &Path, id: DocumentId) -> PathBuf {
    documents_dir_at(home).join(format!("{id}.yaml"))
}

/// `$HOME`, or [`StorageError::HomeNotFound`].
pub fn home() -> Result<PathBuf, StorageError> {
    dirs::home_dir().ok_or(StorageError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// 2. Repository
// ---------------------------------------------------------------------------

/// Repository persisting one YAML record per document under `<home>/.docket`.
#[derive(Debug, Clone)]
pub struct FsRepository {
    home: PathBuf,
}

impl FsRepository {
    /// Repository rooted at `home`. Directories are created lazily.
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Repository rooted at the current user's home directory.
    pub fn open() -> Result<Self, StorageError> {
        Ok(Self::at(home()?))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn documents_dir(&self) -> Result<PathBuf, StorageError> {
        let dir = documents_dir_at(&self.home);
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            set_dir_permissions(&dir)?;
        }
        Ok(dir)
    }

    fn lock_file(&self, name: &str) -> Result<File, StorageError> {
        let path = self.documents_dir()?.join(name);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.lock().map_err(|e| io_err(&path, e))?;
        Ok(file)
    }

    fn lock_catalog(&self) -> Result<File, StorageError> {
        self.lock_file(".catalog.lock")
    }

    fn lock_document(&self, id: DocumentId) -> Result<File, StorageError> {
        self.lock_file(&format!("{id}.lock"))
    }

    fn load_record(&self, id: DocumentId) -> Result<DocumentRecord, CoreError> {
        let path = record_path_at(&self.home, id);
        if !path.exists() {
            return Err(CoreError::DocumentNotFound { document: id });
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let record = serde_yaml::from_str(&contents)
            .map_err(|e| StorageError::Parse { path, source: e })?;
        Ok(record)
    }

    /// Atomically write a record.
    ///
    /// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    fn save_record(&self, record: &DocumentRecord) -> Result<(), StorageError> {
        self.documents_dir()?;
        let path = record_path_at(&self.home, record.document.id());
        let tmp_path = path.with_extension("yaml.tmp");

        let yaml = serde_yaml::to_string(record)?;
        std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
        set_file_permissions(&tmp_path)?;
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    /// All records, sorted by id. Skips lock and temp files.
    fn load_all(&self) -> Result<Vec<DocumentRecord>, CoreError> {
        let dir = documents_dir_at(&self.home);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut ids: Vec<DocumentId> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".yaml")?.parse().ok()
            })
            .collect();
        ids.sort();

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.load_record(id)?);
        }
        Ok(records)
    }

    /// Fails with `NameTaken` if another document of `owner` is called `name`.
    /// Caller must hold the catalog lock.
    fn ensure_name_free(
        &self,
        owner: &UserId,
        name: &str,
        except: Option<DocumentId>,
    ) -> Result<(), CoreError> {
        let taken = self.load_all()?.into_iter().any(|r| {
            Some(r.document.id()) != except
                && r.document.owner() == owner
                && r.document.name == name
        });
        if taken {
            return Err(CoreError::NameTaken {
                owner: owner.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

impl Repository for FsRepository {
    fn create<'h, T, F>(&self, seed: DocumentSeed, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut DocumentTxn<'h>) -> Result<T, CoreError>,
    {
        let _catalog = self.lock_catalog()?;
        self.ensure_name_free(&seed.owner, &seed.name, None)?;

        let last_id = self
            .load_all()?
            .last()
            .map(|r| r.document.id().0)
            .unwrap_or(0);
        let id = DocumentId(last_id + 1);
        let name = seed.name.clone();
        let document = Document::new(id, seed.name, seed.owner, ContentRef::default(), Utc::now());
        let out = DocumentTxn::begin(document, &[]).run(f, |mut document, versions| {
            ensure_has_content(&document)?;
            document.name = name;
            self.save_record(&DocumentRecord { document, versions })?;
            Ok(())
        })?;
        tracing::info!("created document {id}");
        Ok(out)
    }

    fn update<'h, T, F>(&self, id: DocumentId, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut DocumentTxn<'h>) -> Result<T, CoreError>,
    {
        if !record_path_at(&self.home, id).exists() {
            return Err(CoreError::DocumentNotFound { document: id });
        }
        let _guard = self.lock_document(id)?;
        let mut record = self.load_record(id)?;
        let txn = DocumentTxn::begin(record.document.clone(), &record.versions);
        txn.run(f, |document, appended| {
            let renamed = document.name != record.document.name;
            record.document = document;
            record.versions.extend(appended);

            let _catalog = if renamed {
                let catalog = self.lock_catalog()?;
                self.ensure_name_free(record.document.owner(), &record.document.name, Some(id))?;
                Some(catalog)
            } else {
                None
            };
            self.save_record(&record)?;
            Ok(())
        })
    }

    fn get(&self, id: DocumentId) -> Result<Document, CoreError> {
        Ok(self.load_record(id)?.document)
    }

    fn versions(&self, id: DocumentId) -> Result<Vec<DocumentVersion>, CoreError> {
        Ok(self.load_record(id)?.versions)
    }

    fn list(&self) -> Result<Vec<Document>, CoreError> {
        Ok(self.load_all()?.into_iter().map(|r| r.document).collect())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
