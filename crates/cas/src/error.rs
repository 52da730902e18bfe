use thiserror::Error;

use crate::store::ObjectError;

/// Errors returned by `StorageManager` operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid filename: must not be empty or whitespace")]
    InvalidFilename,

    #[error("file too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },

    #[error("file is empty")]
    FileEmpty,

    #[error("invalid file id: must not be empty or whitespace")]
    InvalidId,

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] ObjectError),

    #[error("failed to delete file: {0}")]
    DeleteFailed(#[source] ObjectError),
}

impl StorageError {
    /// Caller mistakes: bad filename, bad payload size, blank id.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidFilename
                | StorageError::FileTooLarge { .. }
                | StorageError::FileEmpty
                | StorageError::InvalidId
        )
    }
}
