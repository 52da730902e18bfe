//! Wire types for `POST /rpc/{Operation}`.
//!
//! Bodies are JSON. File contents travel as standard base64 strings.

use std::fmt;
use std::str::FromStr;

use cas::{ContentHash, FileRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admission::OperationClass;

/// Header carrying a per-request deadline in milliseconds. `0` means the
/// deadline has already passed.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

/// Header carrying a W3C trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Largest accepted request body. Leaves room for a base64-encoded payload
/// just over the file size limit, so oversize uploads fail validation rather
/// than the transport.
pub const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Upload,
    Download,
    List,
    Delete,
    Stats,
    Metadata,
    ServerStats,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Upload,
        Operation::Download,
        Operation::List,
        Operation::Delete,
        Operation::Stats,
        Operation::Metadata,
        Operation::ServerStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upload => "Upload",
            Operation::Download => "Download",
            Operation::List => "List",
            Operation::Delete => "Delete",
            Operation::Stats => "Stats",
            Operation::Metadata => "Metadata",
            Operation::ServerStats => "ServerStats",
        }
    }

    pub fn class(&self) -> OperationClass {
        OperationClass::classify(self.as_str())
    }

    /// Request path for this operation.
    pub fn path(&self) -> String {
        format!("/rpc/{}", self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: ContentHash,
}

/// Request body for every operation addressed by file id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// One entry of a List response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: ContentHash,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub size: u64,
}

impl From<FileRecord> for FileInfo {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename,
            created_at: record.created_at,
            updated_at: record.updated_at,
            size: record.size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Base64 encoding for binary data in JSON
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_roundtrip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>(), Ok(op));
        }
        assert!("upload".parse::<Operation>().is_err());
        assert!("Rename".parse::<Operation>().is_err());
    }

    #[test]
    fn test_operation_classes() {
        assert_eq!(Operation::Upload.class(), OperationClass::Transfer);
        assert_eq!(Operation::Download.class(), OperationClass::Transfer);
        assert_eq!(Operation::List.class(), OperationClass::Listing);
        assert_eq!(Operation::Delete.class(), OperationClass::Unrestricted);
        assert_eq!(Operation::ServerStats.class(), OperationClass::Unrestricted);
        assert_eq!(Operation::Upload.path(), "/rpc/Upload");
    }

    #[test]
    fn test_upload_request_encodes_base64() {
        let request = UploadRequest {
            filename: "hi.txt".to_string(),
            data: b"hello".to_vec(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["data"], "aGVsbG8=");
    }

    #[test]
    fn test_bad_base64_rejected() {
        let result: Result<UploadRequest, _> =
            serde_json::from_str(r#"{"filename": "x", "data": "not base64!"}"#);
        assert!(result.is_err());
    }
}
