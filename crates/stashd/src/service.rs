//! File service: cancellation-aware async facade over `StorageManager`.
//!
//! Storage calls do blocking disk I/O, so each one runs on tokio's blocking
//! pool. Cancellation is checked once on entry; a disk operation that has
//! started runs to completion.

use std::sync::Arc;

use cas::{ContentHash, FileRecord, StorageError, StorageManager, StorageStats, StoredFile};
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;

#[derive(Debug, Clone)]
pub struct FileService {
    storage: Arc<StorageManager>,
}

impl FileService {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    async fn run<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T, RpcError>
    where
        F: FnOnce(&StorageManager) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }

        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || op(&storage))
            .await
            .map_err(|e| RpcError::Internal(format!("storage task failed: {e}")))?
            .map_err(RpcError::from)
    }

    pub async fn upload(
        &self,
        cancel: &CancellationToken,
        filename: String,
        data: Vec<u8>,
    ) -> Result<ContentHash, RpcError> {
        self.run(cancel, move |s| s.save(&filename, &data)).await
    }

    pub async fn download(
        &self,
        cancel: &CancellationToken,
        id: String,
    ) -> Result<StoredFile, RpcError> {
        self.run(cancel, move |s| s.get(&id)).await
    }

    pub async fn metadata(
        &self,
        cancel: &CancellationToken,
        id: String,
    ) -> Result<FileRecord, RpcError> {
        self.run(cancel, move |s| s.metadata(&id)).await
    }

    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<FileRecord>, RpcError> {
        self.run(cancel, |s| Ok(s.list())).await
    }

    pub async fn delete(&self, cancel: &CancellationToken, id: String) -> Result<(), RpcError> {
        self.run(cancel, move |s| s.delete(&id)).await
    }

    pub async fn stats(&self, cancel: &CancellationToken) -> Result<StorageStats, RpcError> {
        self.run(cancel, |s| Ok(s.stats())).await
    }
}
