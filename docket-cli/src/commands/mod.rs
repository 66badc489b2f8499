pub mod daemon;
pub mod document;
pub mod edit;
pub mod history;
pub mod share;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use docket_core::{Document, DocumentId, DocumentVersion, Upload, UserId, VersionId};
use docket_daemon::{call, DaemonRequest, FetchReply, ReleaseReply, VersionReply};
use docket_sync::FsEngine;

/// Where document operations run: in-process, or inside the daemon.
pub enum Backend {
    Local(FsEngine),
    Daemon,
}

/// Home directory, acting user, and backend for one invocation.
pub struct Session {
    home: PathBuf,
    user: Option<UserId>,
    backend: Backend,
}

impl Session {
    pub fn open(user: Option<String>, via_daemon: bool) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let backend = if via_daemon {
            Backend::Daemon
        } else {
            Backend::Local(FsEngine::open_at(&home).context("failed to load docket config")?)
        };
        Ok(Self {
            home,
            user: user.filter(|u| !u.trim().is_empty()).map(UserId::from),
            backend,
        })
    }

    /// The acting user; every mutating command needs one.
    pub fn user(&self) -> Result<&UserId> {
        match &self.user {
            Some(user) => Ok(user),
            None => bail!("no user given; pass --user or set DOCKET_USER"),
        }
    }

    /// Serialized diff of one version. Always read from the local store.
    pub fn read_diff(&self, id: DocumentId, version: VersionId) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Local(engine) => Ok(engine.read_diff(id, version)?),
            Backend::Daemon => {
                let engine =
                    FsEngine::open_at(&self.home).context("failed to load docket config")?;
                Ok(engine.read_diff(id, version)?)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub fn create(&self, name: &str, upload: Upload) -> Result<(Document, DocumentVersion)> {
        let owner = self.user()?.clone();
        match &self.backend {
            Backend::Local(engine) => Ok(engine.create_document(name, &upload, &owner)?),
            Backend::Daemon => {
                let reply: VersionReply = call(
                    &self.home,
                    &DaemonRequest::Create {
                        user: owner,
                        name: name.to_string(),
                        file_name: upload.file_name,
                        content: upload.bytes,
                    },
                )?;
                Ok((reply.document, reply.version))
            }
        }
    }

    pub fn add_collaborator(&self, id: DocumentId, collaborator: UserId) -> Result<Document> {
        let user = self.user()?.clone();
        match &self.backend {
            Backend::Local(engine) => Ok(engine.add_collaborator(id, &user, &collaborator)?),
            Backend::Daemon => Ok(call(
                &self.home,
                &DaemonRequest::AddCollaborator {
                    user,
                    document: id,
                    collaborator,
                },
            )?),
        }
    }

    pub fn remove_collaborator(&self, id: DocumentId, collaborator: UserId) -> Result<Document> {
        let user = self.user()?.clone();
        match &self.backend {
            Backend::Local(engine) => Ok(engine.remove_collaborator(id, &user, &collaborator)?),
            Backend::Daemon => Ok(call(
                &self.home,
                &DaemonRequest::RemoveCollaborator {
                    user,
                    document: id,
                    collaborator,
                },
            )?),
        }
    }

    pub fn fetch(&self, id: DocumentId) -> Result<FetchReply> {
        let user = self.user()?.clone();
        match &self.backend {
            Backend::Local(engine) => {
                let handle = engine.fetch_and_lock(id, &user)?;
                Ok(FetchReply {
                    document: handle.document,
                    file_name: handle.file_name,
                    media_type: handle.media_type.to_string(),
                    content: handle.bytes,
                })
            }
            Backend::Daemon => Ok(call(
                &self.home,
                &DaemonRequest::Fetch { user, document: id },
            )?),
        }
    }

    pub fn upload(&self, id: DocumentId, upload: Upload) -> Result<(Document, DocumentVersion)> {
        let user = self.user()?.clone();
        match &self.backend {
            Backend::Local(engine) => Ok(engine.upload_new_content(id, &upload, &user)?),
            Backend::Daemon => {
                let reply: VersionReply = call(
                    &self.home,
                    &DaemonRequest::Upload {
                        user,
                        document: id,
                        file_name: upload.file_name,
                        content: upload.bytes,
                    },
                )?;
                Ok((reply.document, reply.version))
            }
        }
    }

    pub fn release(&self, id: DocumentId) -> Result<Option<UserId>> {
        let user = self.user()?.clone();
        match &self.backend {
            Backend::Local(engine) => Ok(engine.release_lock(id, &user)?),
            Backend::Daemon => {
                let reply: ReleaseReply = call(
                    &self.home,
                    &DaemonRequest::Release { user, document: id },
                )?;
                Ok(reply.released)
            }
        }
    }

    pub fn rename(&self, id: DocumentId, name: &str) -> Result<Document> {
        let user = self.user()?.clone();
        match &self.backend {
            Backend::Local(engine) => Ok(engine.rename_document(id, &user, name)?),
            Backend::Daemon => Ok(call(
                &self.home,
                &DaemonRequest::Rename {
                    user,
                    document: id,
                    name: name.to_string(),
                },
            )?),
        }
    }

    pub fn versions(&self, id: DocumentId) -> Result<Vec<DocumentVersion>> {
        match &self.backend {
            Backend::Local(engine) => Ok(engine.list_versions(id)?),
            Backend::Daemon => Ok(call(&self.home, &DaemonRequest::Versions { document: id })?),
        }
    }

    pub fn list(&self) -> Result<Vec<Document>> {
        match &self.backend {
            Backend::Local(engine) => Ok(engine.list_documents()?),
            Backend::Daemon => Ok(call(&self.home, &DaemonRequest::List)?),
        }
    }
}

/// Read `path` into an [`Upload`] named after its file name.
pub fn read_upload(path: &Path) -> Result<Upload> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Upload::new(file_name, bytes))
}
