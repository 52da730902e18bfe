//! HTTP endpoints for Stash.
//!
//! Every operation is `POST /rpc/{Operation}` with a JSON body. A middleware
//! layer resolves the operation, builds the request's cancellation token,
//! takes an admission slot and opens the request span before the handler
//! runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::admission::AdmissionController;
use crate::error::RpcError;
use crate::protocol::{
    DownloadResponse, Empty, FileInfo, IdRequest, ListResponse, Operation, UploadRequest,
    UploadResponse, MAX_REQUEST_BODY, REQUEST_TIMEOUT_HEADER, TRACEPARENT_HEADER,
};
use crate::service::FileService;
use crate::telemetry;

/// Shared state for RPC handlers
#[derive(Clone)]
pub struct RpcState {
    pub service: FileService,
    pub admission: AdmissionController,
    pub started: Instant,
}

impl RpcState {
    pub fn new(service: FileService, admission: AdmissionController) -> Self {
        Self {
            service,
            admission,
            started: Instant::now(),
        }
    }
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/rpc/{operation}", post(dispatch))
        .route_layer(middleware::from_fn_with_state(state.clone(), request_context))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .with_state(state)
}

/// Cancellation token for the current request. Fires when the client goes
/// away or the request deadline passes.
#[derive(Clone, Debug)]
pub struct RequestCancel(pub CancellationToken);

fn request_deadline(headers: &HeaderMap) -> Result<Option<Duration>, RpcError> {
    let Some(value) = headers.get(REQUEST_TIMEOUT_HEADER) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|ms| Some(Duration::from_millis(ms)))
        .ok_or_else(|| {
            RpcError::MalformedRequest(format!("{REQUEST_TIMEOUT_HEADER} must be whole milliseconds"))
        })
}

/// Arm `cancel` to fire after `deadline`. The timer task exits early once the
/// token fires for any other reason.
fn arm_deadline(cancel: &CancellationToken, deadline: Duration) {
    if deadline.is_zero() {
        cancel.cancel();
        return;
    }

    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                tracing::debug!(deadline_ms = deadline.as_millis() as u64, "Request deadline elapsed");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });
}

async fn request_context(
    State(state): State<RpcState>,
    Path(operation): Path<String>,
    mut req: Request,
    next: Next,
) -> Response {
    let operation: Operation = match operation.parse() {
        Ok(op) => op,
        Err(name) => return RpcError::UnknownOperation(name).into_response(),
    };
    let class = operation.class();

    let cancel = CancellationToken::new();
    // Fires if this future is dropped, i.e. the connection went away.
    let _guard = cancel.clone().drop_guard();

    match request_deadline(req.headers()) {
        Ok(Some(deadline)) => arm_deadline(&cancel, deadline),
        Ok(None) => {}
        Err(e) => return e.into_response(),
    }

    let traceparent = req
        .headers()
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let span = tracing::info_span!(
        "rpc",
        rpc.operation = %operation,
        rpc.class = %class,
    );
    if let Some(parent) = telemetry::parse_traceparent(traceparent.as_deref()) {
        span.set_parent(parent);
    }

    req.extensions_mut().insert(operation);
    req.extensions_mut().insert(RequestCancel(cancel.clone()));

    let admission = state.admission.clone();
    async move {
        admission
            .admit(class, &cancel, async {
                Ok::<_, RpcError>(next.run(req).await)
            })
            .await
            .unwrap_or_else(IntoResponse::into_response)
    }
    .instrument(span)
    .await
}

/// Parse a JSON body. An empty body reads as `{}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, RpcError> {
    let bytes: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(bytes).map_err(|e| RpcError::MalformedRequest(e.to_string()))
}

async fn dispatch(
    State(state): State<RpcState>,
    Extension(operation): Extension<Operation>,
    Extension(RequestCancel(cancel)): Extension<RequestCancel>,
    body: Bytes,
) -> Result<Response, RpcError> {
    let service = &state.service;

    let response = match operation {
        Operation::Upload => {
            let req: UploadRequest = parse_body(&body)?;
            drop(body);
            let id = service.upload(&cancel, req.filename, req.data).await?;
            Json(UploadResponse { id }).into_response()
        }
        Operation::Download => {
            let req: IdRequest = parse_body(&body)?;
            let file = service.download(&cancel, req.id).await?;
            Json(DownloadResponse {
                filename: file.record.filename,
                data: file.data,
            })
            .into_response()
        }
        Operation::List => {
            let _: Empty = parse_body(&body)?;
            let files = service.list(&cancel).await?;
            Json(ListResponse {
                files: files.into_iter().map(FileInfo::from).collect(),
            })
            .into_response()
        }
        Operation::Delete => {
            let req: IdRequest = parse_body(&body)?;
            service.delete(&cancel, req.id).await?;
            Json(Empty {}).into_response()
        }
        Operation::Stats => {
            let _: Empty = parse_body(&body)?;
            Json(service.stats(&cancel).await?).into_response()
        }
        Operation::Metadata => {
            let req: IdRequest = parse_body(&body)?;
            let record = service.metadata(&cancel, req.id).await?;
            Json(FileInfo::from(record)).into_response()
        }
        Operation::ServerStats => {
            let _: Empty = parse_body(&body)?;
            Json(state.admission.stats()).into_response()
        }
    };

    Ok(response)
}

async fn health_handler(State(state): State<RpcState>) -> Json<serde_json::Value> {
    let storage: &Arc<cas::StorageManager> = state.service.storage();
    let files = storage.stats();
    let admission = state.admission.stats();

    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.started.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "files": {
            "count": files.file_count,
            "total_bytes": files.total_bytes,
        },
        "admission": admission,
    }))
}
