//! Engine configuration.
//!
//! Read from `<home>/.docket/config.yaml`. Every field has a default, and a
//! missing file yields [`EngineConfig::default`] with the scratch directory
//! placed under the docket root.
//!
//! ```yaml
//! identical_upload: release_lock
//! spill_threshold: 4194304
//! scratch_dir: /var/tmp/docket
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use docket_core::store::docket_root;

use crate::error::{io_err, ConfigError};

/// Contents above this combined size are diffed through a temporary file.
pub const DEFAULT_SPILL_THRESHOLD: u64 = 1024 * 1024;

/// What an upload with byte-identical content does to the edit lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdenticalUploadPolicy {
    /// The uploader keeps editing; the lock stays where it was.
    #[default]
    KeepLock,
    /// An identical upload counts as finishing the edit.
    ReleaseLock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub identical_upload: IdenticalUploadPolicy,
    /// Combined byte size of old and new content above which the serialized
    /// diff is spilled to a temporary file instead of being built in memory.
    pub spill_threshold: u64,
    /// Where spilled diffs are written. `None` means the system temp dir.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identical_upload: IdenticalUploadPolicy::default(),
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            scratch_dir: None,
        }
    }
}

/// `<home>/.docket/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    docket_root(home).join("config.yaml")
}

/// `<home>/.docket/tmp/`
pub fn scratch_dir_at(home: &Path) -> PathBuf {
    docket_root(home).join("tmp")
}

/// Load the config rooted at `home`.
///
/// Returns defaults if the file does not exist. A config without a
/// `scratch_dir` gets `<home>/.docket/tmp`.
pub fn load_at(home: &Path) -> Result<EngineConfig, ConfigError> {
    let path = config_path_at(home);
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?
    } else {
        EngineConfig::default()
    };
    if config.scratch_dir.is_none() {
        config.scratch_dir = Some(scratch_dir_at(home));
    }
    Ok(config)
}

/// [`load_at`] for the current user's home directory.
pub fn load() -> Result<EngineConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_file_missing() {
        let home = TempDir::new().unwrap();
        let config = load_at(home.path()).unwrap();
        assert_eq!(config.identical_upload, IdenticalUploadPolicy::KeepLock);
        assert_eq!(config.spill_threshold, DEFAULT_SPILL_THRESHOLD);
        assert_eq!(config.scratch_dir, Some(scratch_dir_at(home.path())));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "identical_upload: release_lock\n").unwrap();

        let config = load_at(home.path()).unwrap();
        assert_eq!(config.identical_upload, IdenticalUploadPolicy::ReleaseLock);
        assert_eq!(config.spill_threshold, DEFAULT_SPILL_THRESHOLD);
    }

    #[test]
    fn explicit_scratch_dir_is_kept() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "scratch_dir: /var/tmp/docket\nspill_threshold: 10\n").unwrap();

        let config = load_at(home.path()).unwrap();
        assert_eq!(config.scratch_dir, Some(PathBuf::from("/var/tmp/docket")));
        assert_eq!(config.spill_threshold, 10);
    }

    #[test]
    fn bad_yaml_reports_path() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "identical_upload: sometimes\n").unwrap();

        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }
}
