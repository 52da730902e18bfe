//! Byte stores: where object bytes actually live.
//!
//! `ObjectStore` is a flat key-value surface. Keys are opaque to the store
//! apart from being required to be plain file names. `FileStore` keeps one
//! file per key in a single directory:
//!
//! ```text
//! {root}/
//! ├── 5c735d76fe3537a0f35cf4a4eb14a532
//! ├── 9a0364b9e99bb480dd25e1f0284c8555
//! └── .tmpXXXXXX          # in-flight write, never a valid key
//! ```
//!
//! Writes land in a temp file in the same directory and are renamed into
//! place, so a key is either absent or holds complete bytes.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors from a byte store.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("i/o error on object {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

impl ObjectError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectError::NotFound(_))
    }

    fn from_io(key: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            ObjectError::NotFound(key.to_string())
        } else {
            ObjectError::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

/// One object found by `ObjectStore::scan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    /// Storage-level last-modified time.
    pub modified: DateTime<Utc>,
}

/// Trait for byte storage backends.
///
/// Same-key writes are expected to carry identical bytes, so implementations
/// need no cross-call locking.
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Write `data` under `key`, replacing any previous object.
    fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectError>;

    /// Read the object under `key`. Absent objects yield `ObjectError::NotFound`.
    fn get(&self, key: &str) -> Result<Vec<u8>, ObjectError>;

    /// Remove the object under `key`. Absent objects yield `ObjectError::NotFound`.
    fn delete(&self, key: &str) -> Result<(), ObjectError>;

    /// List every object currently present, in storage order.
    fn scan(&self) -> Result<Vec<ObjectEntry>, ObjectError>;
}

fn validate_key(key: &str) -> Result<(), ObjectError> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
        return Err(ObjectError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Filesystem-based byte store, one file per key in a flat directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if it doesn't exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create storage directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path where an object would be stored.
    pub fn object_path(&self, key: &str) -> Result<PathBuf, ObjectError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FileStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectError> {
        let path = self.object_path(key)?;

        let mut tmp = NamedTempFile::new_in(&self.root).map_err(|e| ObjectError::from_io(key, e))?;
        tmp.write_all(data).map_err(|e| ObjectError::from_io(key, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| ObjectError::from_io(key, e))?;
        tmp.persist(&path)
            .map_err(|e| ObjectError::from_io(key, e.error))?;

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, ObjectError> {
        let path = self.object_path(key)?;
        fs::read(&path).map_err(|e| ObjectError::from_io(key, e))
    }

    fn delete(&self, key: &str) -> Result<(), ObjectError> {
        let path = self.object_path(key)?;
        fs::remove_file(&path).map_err(|e| ObjectError::from_io(key, e))
    }

    fn scan(&self) -> Result<Vec<ObjectEntry>, ObjectError> {
        let root_key = self.root.display().to_string();
        let entries = fs::read_dir(&self.root).map_err(|e| ObjectError::Io {
            key: root_key,
            source: e,
        })?;

        let mut objects = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };

            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_key(&key).is_err() {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(object.key = %key, error = %e, "skipping object with unreadable metadata");
                    continue;
                }
            };

            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            objects.push(ObjectEntry {
                key,
                size: meta.len(),
                modified,
            });
        }

        Ok(objects)
    }
}

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// In-memory byte store (HashMap-backed).
///
/// `set_failing(true)` makes every call fail with an I/O error, which is how
/// tests simulate a misbehaving backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, MemoryObject>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of objects held.
    pub fn len(&self) -> usize {
        self.objects.read().expect("memory store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_failing(&self, key: &str) -> Result<(), ObjectError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ObjectError::Io {
                key: key.to_string(),
                source: io::Error::other("memory store is failing"),
            });
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectError> {
        validate_key(key)?;
        self.check_failing(key)?;
        let mut objects = self.objects.write().expect("memory store lock poisoned");
        objects.insert(
            key.to_string(),
            MemoryObject {
                data: data.to_vec(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, ObjectError> {
        validate_key(key)?;
        self.check_failing(key)?;
        let objects = self.objects.read().expect("memory store lock poisoned");
        objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| ObjectError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), ObjectError> {
        validate_key(key)?;
        self.check_failing(key)?;
        let mut objects = self.objects.write().expect("memory store lock poisoned");
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ObjectError::NotFound(key.to_string()))
    }

    fn scan(&self) -> Result<Vec<ObjectEntry>, ObjectError> {
        self.check_failing("*")?;
        let objects = self.objects.read().expect("memory store lock poisoned");
        Ok(objects
            .iter()
            .map(|(key, o)| ObjectEntry {
                key: key.clone(),
                size: o.data.len() as u64,
                modified: o.modified,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::open(temp_dir.path())?;

        store.put("abc", b"Hello, World!")?;
        assert_eq!(store.get("abc")?, b"Hello, World!");

        Ok(())
    }

    #[test]
    fn test_layout_is_flat() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::open(temp_dir.path())?;

        store.put("5c735d76fe3537a0f35cf4a4eb14a532", b"flat")?;

        let path = temp_dir.path().join("5c735d76fe3537a0f35cf4a4eb14a532");
        assert!(path.is_file());
        assert_eq!(fs::read_dir(temp_dir.path())?.count(), 1);

        Ok(())
    }

    #[test]
    fn test_open_creates_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("nested").join("objects");

        FileStore::open(&root)?;
        assert!(root.is_dir());

        Ok(())
    }

    #[test]
    fn test_missing_object_is_not_found() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::open(temp_dir.path())?;

        assert!(store.get("nope").unwrap_err().is_not_found());
        assert!(store.delete("nope").unwrap_err().is_not_found());

        Ok(())
    }

    #[test]
    fn test_read_of_directory_is_io_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::open(temp_dir.path())?;
        fs::create_dir(temp_dir.path().join("dir"))?;

        let err = store.get("dir").unwrap_err();
        assert!(matches!(err, ObjectError::Io { .. }));

        Ok(())
    }

    #[test]
    fn test_rejects_path_keys() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::open(temp_dir.path())?;

        for key in ["", ".", "..", "../escape", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(store.put(key, b"x"), Err(ObjectError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }

        Ok(())
    }

    #[test]
    fn test_scan_lists_files_only() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::open(temp_dir.path())?;

        store.put("one", b"1")?;
        store.put("two", b"22")?;
        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join(".tmpabc"), b"partial")?;

        let mut entries = store.scan()?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "one");
        assert_eq!(entries[0].size, 1);
        assert_eq!(entries[1].key, "two");
        assert_eq!(entries[1].size, 2);

        Ok(())
    }

    #[test]
    fn test_put_leaves_no_temp_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::open(temp_dir.path())?;

        store.put("key", &vec![7u8; 64 * 1024])?;
        store.put("key", &vec![7u8; 64 * 1024])?;

        let names: Vec<_> = fs::read_dir(temp_dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("key")]);

        Ok(())
    }

    #[test]
    fn test_memory_store_roundtrip_and_failure() {
        let store = MemoryStore::new();
        store.put("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), b"v");
        assert_eq!(store.len(), 1);

        store.set_failing(true);
        assert!(matches!(store.get("k"), Err(ObjectError::Io { .. })));
        assert!(matches!(store.delete("k"), Err(ObjectError::Io { .. })));

        store.set_failing(false);
        store.delete("k").unwrap();
        assert!(store.get("k").unwrap_err().is_not_found());
        assert!(store.is_empty());
    }
}
