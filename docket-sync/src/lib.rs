//! # docket-sync
//!
//! Diff engine, on-disk blob store and the document update orchestrator.
//!
//! Build an [`Engine`] over any [`docket_core::Repository`] and
//! [`docket_core::ContentStore`], or open the on-disk one with
//! [`FsEngine::open_at`].

pub mod blob_store;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;

pub use blob_store::FsContentStore;
pub use config::{EngineConfig, IdenticalUploadPolicy};
pub use diff::{compute_diff, contents_are_identical, DiffArtifact, DiffLine, DiffStats, LineTag};
pub use engine::{ContentHandle, Engine, FsEngine};
pub use error::{ConfigError, DiffParseError};
