//! Metadata types for stored files.
//!
//! A `FileRecord` is what the index keeps per content hash. When sidecars are
//! enabled it is also serialized as JSON next to the object store so the
//! original filename survives a restart.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one stored file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    /// Content hash of the bytes; also the object key.
    pub id: ContentHash,

    /// Filename supplied by the uploader.
    ///
    /// Records rebuilt from a bare object (no sidecar) carry the id here.
    pub filename: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Size of the content in bytes.
    pub size: u64,
}

impl FileRecord {
    /// Record for a freshly written file; both timestamps are `now`.
    pub fn new(id: ContentHash, filename: impl Into<String>, size: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename: filename.into(),
            created_at: now,
            updated_at: now,
            size,
        }
    }

    /// Record rebuilt from an object found on disk without a sidecar.
    pub fn recovered(id: ContentHash, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            filename: id.as_str().to_string(),
            id,
            created_at: modified,
            updated_at: modified,
            size,
        }
    }
}

/// A file's record together with its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub record: FileRecord,
    pub data: Vec<u8>,
}

/// Aggregate over the index at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub file_count: usize,
    pub total_bytes: u64,
}
