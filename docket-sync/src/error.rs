//! Error types for docket-sync.

use std::path::PathBuf;

use thiserror::Error;

/// Failures loading [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file exists but is not valid YAML for [`crate::config::EngineConfig`].
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// A serialized diff artifact that does not follow the line-prefix format.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed diff artifact at line {line}: {reason}")]
pub struct DiffParseError {
    /// 1-based line number in the serialized artifact.
    pub line: usize,
    pub reason: &'static str,
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
