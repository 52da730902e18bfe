//! Config sections. Each maps to one `[table]` in the TOML file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root directory for stored files.
    /// Default: ./storage/files
    #[serde(default = "PathsConfig::default_storage_dir")]
    pub storage_dir: PathBuf,
}

impl PathsConfig {
    fn default_storage_dir() -> PathBuf {
        PathBuf::from("./storage/files")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            storage_dir: Self::default_storage_dir(),
        }
    }
}

/// Storage behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Write a JSON record sidecar per file so filenames survive restarts.
    /// Default: true
    #[serde(default = "StorageConfig::default_store_metadata")]
    pub store_metadata: bool,
}

impl StorageConfig {
    fn default_store_metadata() -> bool {
        true
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_metadata: Self::default_store_metadata(),
        }
    }
}

/// Network bind address for the RPC server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 8080
    #[serde(default = "BindConfig::default_port")]
    pub port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    /// `host:port`, suitable for `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Console logging only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    /// Log filter directive (trace, debug, info, warn, error, or an EnvFilter string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}

/// Admission pool sizes and the periodic stats report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Concurrent Upload/Download slots.
    /// Default: 10
    #[serde(default = "AdmissionConfig::default_transfer_limit")]
    pub transfer_limit: usize,

    /// Concurrent List slots.
    /// Default: 100
    #[serde(default = "AdmissionConfig::default_listing_limit")]
    pub listing_limit: usize,

    /// Log admission stats periodically.
    /// Default: false
    #[serde(default)]
    pub report_stats: bool,

    /// Default: 5
    #[serde(default = "AdmissionConfig::default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl AdmissionConfig {
    fn default_transfer_limit() -> usize {
        10
    }

    fn default_listing_limit() -> usize {
        100
    }

    fn default_stats_interval_secs() -> u64 {
        5
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            transfer_limit: Self::default_transfer_limit(),
            listing_limit: Self::default_listing_limit(),
            report_stats: false,
            stats_interval_secs: Self::default_stats_interval_secs(),
        }
    }
}
