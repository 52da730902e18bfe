//! Transport-level errors and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cas::StorageError;
use thiserror::Error;

use crate::admission::{AdmissionError, OperationClass};
use crate::protocol::ErrorBody;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("too many concurrent {class} requests (limit {limit})")]
    TooManyConcurrentRequests { class: OperationClass, limit: usize },

    #[error("request cancelled")]
    Cancelled,

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AdmissionError> for RpcError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::TooManyConcurrentRequests { class, limit } => {
                RpcError::TooManyConcurrentRequests { class, limit }
            }
            AdmissionError::Cancelled => RpcError::Cancelled,
        }
    }
}

impl RpcError {
    /// Stable snake_case error kind carried in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Storage(e) => match e {
                StorageError::InvalidFilename => "invalid_filename",
                StorageError::FileTooLarge { .. } => "file_too_large",
                StorageError::FileEmpty => "file_empty",
                StorageError::InvalidId => "invalid_id",
                StorageError::NotFound(_) => "not_found",
                StorageError::StorageUnavailable(_) => "storage_unavailable",
                StorageError::DeleteFailed(_) => "delete_failed",
            },
            RpcError::TooManyConcurrentRequests { .. } => "too_many_concurrent_requests",
            RpcError::Cancelled => "cancelled",
            RpcError::UnknownOperation(_) => "unknown_operation",
            RpcError::MalformedRequest(_) => "malformed_request",
            RpcError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            RpcError::Storage(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            RpcError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RpcError::TooManyConcurrentRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            RpcError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            RpcError::UnknownOperation(_) => StatusCode::NOT_FOUND,
            RpcError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            RpcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error.code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(error.code = self.code(), error = %self, "Request rejected");
        }

        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas::ObjectError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (RpcError::from(StorageError::NotFound("x".into())), StatusCode::NOT_FOUND),
            (RpcError::from(StorageError::InvalidFilename), StatusCode::BAD_REQUEST),
            (RpcError::from(StorageError::FileEmpty), StatusCode::BAD_REQUEST),
            (
                RpcError::from(StorageError::FileTooLarge { size: 2, limit: 1 }),
                StatusCode::BAD_REQUEST,
            ),
            (RpcError::from(StorageError::InvalidId), StatusCode::BAD_REQUEST),
            (
                RpcError::from(StorageError::StorageUnavailable(ObjectError::NotFound("x".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RpcError::from(StorageError::DeleteFailed(ObjectError::InvalidKey("x".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RpcError::from(AdmissionError::TooManyConcurrentRequests {
                    class: OperationClass::Transfer,
                    limit: 10,
                }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (RpcError::from(AdmissionError::Cancelled), StatusCode::REQUEST_TIMEOUT),
            (RpcError::UnknownOperation("Rename".into()), StatusCode::NOT_FOUND),
        ];

        for (error, status) in cases {
            assert_eq!(error.status(), status, "{error}");
        }
    }

    #[test]
    fn test_codes() {
        assert_eq!(RpcError::from(StorageError::FileEmpty).code(), "file_empty");
        assert_eq!(RpcError::Cancelled.code(), "cancelled");
        assert_eq!(
            RpcError::UnknownOperation("Rename".into()).code(),
            "unknown_operation"
        );
    }
}
