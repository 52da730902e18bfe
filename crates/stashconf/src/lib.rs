//! Configuration loading for Stash.
//!
//! # Usage
//!
//! ```rust,no_run
//! use stashconf::StashConfig;
//!
//! let config = StashConfig::load().expect("Failed to load config");
//!
//! println!("Storage dir: {}", config.paths.storage_dir.display());
//! println!("Listening on: {}", config.bind.addr());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/stash/config.toml` (system)
//! 2. `~/.config/stash/config.toml` (user)
//! 3. `./stash.toml` (local override, or the path given to `load_from`)
//! 4. Environment variables (`STASH_*`)
//!
//! A file only needs the keys it changes; everything else keeps the value
//! from earlier layers.
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! storage_dir = "~/stash/files"
//!
//! [storage]
//! store_metadata = true
//!
//! [bind]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [admission]
//! transfer_limit = 10
//! listing_limit = 100
//! report_stats = true
//! stats_interval_secs = 5
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{AdmissionConfig, BindConfig, PathsConfig, StorageConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete Stash configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StashConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl StashConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/stash/config.toml`
    /// 3. `~/.config/stash/config.toml`
    /// 4. `./stash.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./stash.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        loader::load_layers(&files, |key| std::env::var(key).ok())
    }

    /// Reject values the server can't run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("admission.transfer_limit", self.admission.transfer_limit as u64),
            ("admission.listing_limit", self.admission.listing_limit as u64),
            ("admission.stats_interval_secs", self.admission.stats_interval_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_else(|e| format!("# unserializable: {e}\n"));
        format!("# Stash Configuration\n\n{body}")
    }
}
