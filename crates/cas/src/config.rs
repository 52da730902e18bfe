//! Storage configuration.
//!
//! Default path: `~/.stash/files`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the content addressable file store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasConfig {
    /// Base path for storage.
    /// Objects live in `{base_path}/objects/`, record sidecars in `{base_path}/metadata/`.
    pub base_path: PathBuf,

    /// Whether to write a JSON record sidecar for each new object.
    /// Without sidecars the original filename is lost on restart.
    #[serde(default = "default_true")]
    pub store_metadata: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_path(),
            store_metadata: true,
        }
    }
}

/// Get the default storage path (~/.stash/files).
fn default_storage_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".stash").join("files"))
        .unwrap_or_else(|| PathBuf::from(".stash/files"))
}

impl CasConfig {
    /// Create a config with a specific base path.
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            store_metadata: true,
        }
    }

    /// Disable record sidecars.
    pub fn without_metadata(mut self) -> Self {
        self.store_metadata = false;
        self
    }

    /// Get the objects directory path.
    pub fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    /// Get the metadata directory path.
    pub fn metadata_dir(&self) -> PathBuf {
        self.base_path.join("metadata")
    }
}
