//! In-memory metadata index: content hash -> file record.
//!
//! One `RwLock` guards the whole map. Lookups, listing and stats share the
//! read lock; insert and remove take the write lock. No byte-store I/O ever
//! happens while the lock is held.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::hash::ContentHash;
use crate::metadata::{FileRecord, StorageStats};

#[derive(Debug, Default)]
pub struct MetadataIndex {
    records: RwLock<HashMap<ContentHash, FileRecord>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from records, later duplicates replacing earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            records: RwLock::new(map),
        }
    }

    // Records stay consistent across a panicking holder, so poison is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ContentHash, FileRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ContentHash, FileRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &ContentHash) -> Option<FileRecord> {
        let records = self.read();
        records.get(id).cloned()
    }

    pub fn contains(&self, id: &ContentHash) -> bool {
        let records = self.read();
        records.contains_key(id)
    }

    /// Insert a record unless one already exists for its id.
    ///
    /// Returns `true` if the record was inserted. Racing duplicate saves keep
    /// whichever record landed first.
    pub fn insert(&self, record: FileRecord) -> bool {
        let mut records = self.write();
        if records.contains_key(&record.id) {
            return false;
        }
        records.insert(record.id.clone(), record);
        true
    }

    pub fn remove(&self, id: &ContentHash) -> Option<FileRecord> {
        let mut records = self.write();
        records.remove(id)
    }

    /// Copy of every record, in no particular order.
    pub fn snapshot(&self) -> Vec<FileRecord> {
        let records = self.read();
        records.values().cloned().collect()
    }

    pub fn stats(&self) -> StorageStats {
        let records = self.read();
        StorageStats {
            file_count: records.len(),
            total_bytes: records.values().map(|r| r.size).sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn record(data: &[u8], name: &str) -> FileRecord {
        FileRecord::new(ContentHash::from_data(data), name, data.len() as u64)
    }

    #[test]
    fn test_insert_and_get() {
        let index = MetadataIndex::new();
        let r = record(b"hello", "hello.txt");

        assert!(index.insert(r.clone()));
        assert_eq!(index.get(&r.id), Some(r.clone()));
        assert!(index.contains(&r.id));
    }

    #[test]
    fn test_insert_keeps_first_record() {
        let index = MetadataIndex::new();
        let first = record(b"same", "first.txt");
        let second = record(b"same", "second.txt");

        assert!(index.insert(first.clone()));
        assert!(!index.insert(second));
        assert_eq!(index.get(&first.id).unwrap().filename, "first.txt");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove() {
        let index = MetadataIndex::new();
        let r = record(b"gone", "gone.txt");
        index.insert(r.clone());

        assert_eq!(index.remove(&r.id), Some(r.clone()));
        assert_eq!(index.remove(&r.id), None);
        assert!(index.is_empty());
    }

    #[test]
    fn test_stats_sums_sizes() {
        let index = MetadataIndex::from_records(vec![
            record(b"a", "a"),
            record(b"bb", "b"),
            record(b"ccc", "c"),
        ]);

        let stats = index.stats();
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.total_bytes, 6);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let index = MetadataIndex::new();
        let r = record(b"snap", "snap");
        index.insert(r.clone());

        let snapshot = index.snapshot();
        index.remove(&r.id);

        assert_eq!(snapshot, vec![r]);
        assert!(index.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_inserts() {
        let index = Arc::new(MetadataIndex::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = index.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        let data = format!("{i}-{j}");
                        index.insert(record(data.as_bytes(), &data));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len(), 800);
    }
}
