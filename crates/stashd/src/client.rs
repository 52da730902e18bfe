//! Typed HTTP client for a Stash server.

use std::time::Duration;

use cas::{ContentHash, StorageStats};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::admission::ConcurrencySnapshot;
use crate::protocol::{
    DownloadResponse, Empty, ErrorBody, FileInfo, IdRequest, ListResponse, Operation,
    UploadRequest, UploadResponse, REQUEST_TIMEOUT_HEADER,
};

/// Error kinds reported by the server, decoded from the `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidFilename,
    FileTooLarge,
    FileEmpty,
    InvalidId,
    NotFound,
    StorageUnavailable,
    DeleteFailed,
    TooManyConcurrentRequests,
    Cancelled,
    UnknownOperation,
    MalformedRequest,
    Internal,
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    fn parse(code: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(code.to_string()))
            .unwrap_or(ErrorCode::Unknown)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{operation} failed ({status}): {message}")]
    Rpc {
        operation: Operation,
        status: u16,
        code: ErrorCode,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    /// Server-reported error kind, if the server answered at all.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Rpc { code, .. } => Some(*code),
            ClientError::Transport(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(ErrorCode::NotFound)
    }
}

#[derive(Debug, Clone)]
pub struct StashClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Option<Duration>,
}

impl StashClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            request_timeout: None,
        }
    }

    /// Ask the server to cancel requests still waiting after `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    async fn call<Req, Resp>(&self, operation: Operation, body: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, operation.path()))
            .json(body);
        if let Some(timeout) = self.request_timeout {
            request = request.header(REQUEST_TIMEOUT_HEADER, timeout.as_millis().to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Resp>().await?);
        }

        let (code, message) = match response.json::<ErrorBody>().await {
            Ok(body) => (ErrorCode::parse(&body.code), body.message),
            Err(_) => (ErrorCode::Unknown, status.to_string()),
        };
        tracing::debug!(rpc.operation = %operation, status = status.as_u16(), ?code, "RPC error");

        Err(ClientError::Rpc {
            operation,
            status: status.as_u16(),
            code,
            message,
        })
    }

    pub async fn upload(&self, filename: &str, data: &[u8]) -> Result<ContentHash, ClientError> {
        let request = UploadRequest {
            filename: filename.to_string(),
            data: data.to_vec(),
        };
        let response: UploadResponse = self.call(Operation::Upload, &request).await?;
        Ok(response.id)
    }

    pub async fn download(&self, id: &str) -> Result<DownloadResponse, ClientError> {
        self.call(Operation::Download, &IdRequest { id: id.to_string() })
            .await
    }

    pub async fn list(&self) -> Result<Vec<FileInfo>, ClientError> {
        let response: ListResponse = self.call(Operation::List, &Empty {}).await?;
        Ok(response.files)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let _: Empty = self
            .call(Operation::Delete, &IdRequest { id: id.to_string() })
            .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<StorageStats, ClientError> {
        self.call(Operation::Stats, &Empty {}).await
    }

    pub async fn metadata(&self, id: &str) -> Result<FileInfo, ClientError> {
        self.call(Operation::Metadata, &IdRequest { id: id.to_string() })
            .await
    }

    pub async fn server_stats(&self) -> Result<ConcurrencySnapshot, ClientError> {
        self.call(Operation::ServerStats, &Empty {}).await
    }

    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_parse() {
        assert_eq!(ErrorCode::parse("not_found"), ErrorCode::NotFound);
        assert_eq!(
            ErrorCode::parse("too_many_concurrent_requests"),
            ErrorCode::TooManyConcurrentRequests
        );
        assert_eq!(ErrorCode::parse("something_new"), ErrorCode::Unknown);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = StashClient::new("http://127.0.0.1:8080/");
        assert_eq!(client.base_url, "http://127.0.0.1:8080");
    }
}
