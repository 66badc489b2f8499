//! Docket core library: domain types, access control, version chain,
//! storage interfaces.
//!
//! Public API surface:
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`CoreError`], [`StorageError`]
//! - [`collaborators`] / [`lock`]: the only ways to change who may edit
//! - [`versions`]: append-only version chain builder
//! - [`repository`]: transactional [`Repository`] trait, [`MemoryRepository`]
//! - [`store`]: YAML-file [`FsRepository`]
//! - [`content`]: [`ContentStore`] trait, [`MemoryContentStore`]

pub mod collaborators;
pub mod content;
pub mod error;
pub mod lock;
pub mod media;
pub mod repository;
pub mod store;
pub mod types;
pub mod versions;

pub use content::{ContentStore, MemoryContentStore, StoredBlob};
pub use error::{CoreError, StorageError};
pub use lock::LockTransition;
pub use repository::{DocumentRecord, DocumentSeed, DocumentTxn, MemoryRepository, Repository};
pub use store::FsRepository;
pub use types::{
    BlobKind, ContentRef, Document, DocumentId, DocumentVersion, EditLock, Upload, UserId,
    VersionId,
};
pub use versions::append_version;
