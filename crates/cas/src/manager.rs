//! StorageManager: validate -> hash -> deduplicate -> persist -> index.
//!
//! The manager owns the metadata index and the byte stores. Object bytes are
//! always written before the index learns about them, so a crash can leave
//! an unindexed object (picked up by the next startup scan) but never an
//! index entry without bytes.

use std::sync::Arc;

use anyhow::Context;

use crate::config::CasConfig;
use crate::error::StorageError;
use crate::hash::ContentHash;
use crate::index::MetadataIndex;
use crate::metadata::{FileRecord, StorageStats, StoredFile};
use crate::store::{FileStore, ObjectStore};

/// Largest accepted upload, in bytes (10 MiB).
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct StorageManager {
    objects: Arc<dyn ObjectStore>,
    /// Record sidecars, keyed `{id}.json`. `None` when disabled.
    sidecars: Option<Arc<dyn ObjectStore>>,
    index: MetadataIndex,
}

fn sidecar_key(id: &ContentHash) -> String {
    format!("{}.json", id)
}

/// Blank ids are rejected. Anything else that is not a content hash can
/// never be indexed, so it resolves to `None` and never reaches a store.
fn parse_id(id: &str) -> Result<Option<ContentHash>, StorageError> {
    if id.trim().is_empty() {
        return Err(StorageError::InvalidId);
    }
    Ok(ContentHash::from_str_checked(id).ok())
}

fn validate_upload(filename: &str, data: &[u8]) -> Result<(), StorageError> {
    if filename.trim().is_empty() {
        return Err(StorageError::InvalidFilename);
    }
    if data.len() > MAX_FILE_SIZE {
        return Err(StorageError::FileTooLarge {
            size: data.len(),
            limit: MAX_FILE_SIZE,
        });
    }
    if data.is_empty() {
        return Err(StorageError::FileEmpty);
    }
    Ok(())
}

impl StorageManager {
    /// Open filesystem-backed storage, creating directories as needed and
    /// rebuilding the index from whatever objects are already on disk.
    pub fn open(config: &CasConfig) -> anyhow::Result<Self> {
        let objects: Arc<dyn ObjectStore> = Arc::new(
            FileStore::open(config.objects_dir()).context("failed to open object store")?,
        );

        let sidecars: Option<Arc<dyn ObjectStore>> = if config.store_metadata {
            Some(Arc::new(
                FileStore::open(config.metadata_dir()).context("failed to open metadata store")?,
            ))
        } else {
            None
        };

        let manager =
            Self::with_stores(objects, sidecars).context("failed to load existing files")?;

        tracing::info!(
            storage.path = %config.base_path.display(),
            storage.files = manager.index.len(),
            storage.sidecars = config.store_metadata,
            "Storage opened"
        );

        Ok(manager)
    }

    /// Build a manager over arbitrary stores and scan them.
    pub fn with_stores(
        objects: Arc<dyn ObjectStore>,
        sidecars: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, StorageError> {
        let manager = Self {
            objects,
            sidecars,
            index: MetadataIndex::new(),
        };
        manager.load_existing()?;
        Ok(manager)
    }

    /// Rebuild index entries from the objects present in the byte store.
    fn load_existing(&self) -> Result<usize, StorageError> {
        let entries = self
            .objects
            .scan()
            .map_err(StorageError::StorageUnavailable)?;

        let mut loaded = 0;
        for entry in entries {
            let id = match ContentHash::from_str_checked(&entry.key) {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(object.key = %entry.key, "Skipping object whose key is not a content hash");
                    continue;
                }
            };

            let record = match self.read_sidecar(&id) {
                Some(mut record) => {
                    record.size = entry.size;
                    record
                }
                None => FileRecord::recovered(id, entry.size, entry.modified),
            };

            if self.index.insert(record) {
                loaded += 1;
            }
        }

        tracing::debug!(files = loaded, "Index rebuilt from byte store");
        Ok(loaded)
    }

    fn read_sidecar(&self, id: &ContentHash) -> Option<FileRecord> {
        let sidecars = self.sidecars.as_ref()?;

        let bytes = match sidecars.get(&sidecar_key(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                tracing::warn!(file.id = %id, error = %e, "Failed to read record sidecar");
                return None;
            }
        };

        match serde_json::from_slice::<FileRecord>(&bytes) {
            Ok(record) if &record.id == id => Some(record),
            Ok(record) => {
                tracing::warn!(file.id = %id, sidecar.id = %record.id, "Ignoring sidecar for a different id");
                None
            }
            Err(e) => {
                tracing::warn!(file.id = %id, error = %e, "Ignoring unparseable record sidecar");
                None
            }
        }
    }

    fn write_sidecar(&self, record: &FileRecord) {
        let Some(sidecars) = self.sidecars.as_ref() else {
            return;
        };

        let result = serde_json::to_vec(record)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                sidecars
                    .put(&sidecar_key(&record.id), &json)
                    .map_err(|e| e.to_string())
            });

        if let Err(e) = result {
            tracing::warn!(file.id = %record.id, error = %e, "Failed to write record sidecar");
        }
    }

    fn remove_sidecar(&self, id: &ContentHash) {
        let Some(sidecars) = self.sidecars.as_ref() else {
            return;
        };

        match sidecars.delete(&sidecar_key(id)) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(file.id = %id, error = %e, "Failed to remove record sidecar"),
        }
    }

    /// Store `data` under its content hash and return the hash.
    ///
    /// Content that is already indexed is not written again.
    pub fn save(&self, filename: &str, data: &[u8]) -> Result<ContentHash, StorageError> {
        validate_upload(filename, data)?;

        let id = ContentHash::from_data(data);
        if self.index.contains(&id) {
            tracing::debug!(file.id = %id, file.name = %filename, "Duplicate content, skipping write");
            return Ok(id);
        }

        self.objects
            .put(id.as_str(), data)
            .map_err(StorageError::StorageUnavailable)?;

        let record = FileRecord::new(id.clone(), filename, data.len() as u64);
        if self.index.insert(record.clone()) {
            self.write_sidecar(&record);
            tracing::info!(
                file.id = %id,
                file.name = %filename,
                file.size = data.len(),
                "File stored"
            );
        }

        Ok(id)
    }

    /// Fetch a file's record and bytes.
    ///
    /// An index entry whose object has vanished is evicted and reported as
    /// not found.
    pub fn get(&self, id: &str) -> Result<StoredFile, StorageError> {
        let Some(id) = parse_id(id)? else {
            return Err(StorageError::NotFound(id.to_string()));
        };
        let record = self
            .index
            .get(&id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        match self.objects.get(id.as_str()) {
            Ok(data) => Ok(StoredFile { record, data }),
            Err(e) if e.is_not_found() => {
                self.index.remove(&id);
                self.remove_sidecar(&id);
                tracing::warn!(file.id = %id, "Object missing from byte store, evicted index entry");
                Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => Err(StorageError::StorageUnavailable(e)),
        }
    }

    /// Fetch a file's record without touching the byte store.
    pub fn metadata(&self, id: &str) -> Result<FileRecord, StorageError> {
        parse_id(id)?
            .and_then(|hash| self.index.get(&hash))
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Snapshot of all records, in no particular order.
    pub fn list(&self) -> Vec<FileRecord> {
        self.index.snapshot()
    }

    /// Delete a file. Deleting an absent file succeeds.
    pub fn delete(&self, id: &str) -> Result<(), StorageError> {
        let Some(id) = parse_id(id)? else {
            tracing::debug!(file.id = %id, "Not a content hash, nothing to delete");
            return Ok(());
        };

        match self.objects.delete(id.as_str()) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(file.id = %id, "Object already absent");
            }
            Err(e) => return Err(StorageError::DeleteFailed(e)),
        }

        self.remove_sidecar(&id);
        if self.index.remove(&id).is_some() {
            tracing::info!(file.id = %id, "File deleted");
        }

        Ok(())
    }

    pub fn stats(&self) -> StorageStats {
        self.index.stats()
    }
}
