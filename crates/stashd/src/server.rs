//! Server wiring: storage, admission, router, background tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cas::{CasConfig, StorageManager};
use stashconf::StashConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::rpc::{self, RpcState};
use crate::service::FileService;

/// Open storage and build handler state from config.
pub fn build_state(config: &StashConfig) -> Result<RpcState> {
    let cas_config = CasConfig {
        base_path: config.paths.storage_dir.clone(),
        store_metadata: config.storage.store_metadata,
    };
    let storage = StorageManager::open(&cas_config).context("Failed to open storage")?;

    Ok(RpcState::new(
        FileService::new(Arc::new(storage)),
        AdmissionController::from_config(&config.admission),
    ))
}

/// Serve RPC requests on `listener` until `shutdown` fires, then drain
/// in-flight requests.
pub async fn serve(listener: TcpListener, state: RpcState, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    tracing::info!(server.addr = %addr, "Serving RPC");

    axum::serve(listener, rpc::router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Server shutdown signal received");
        })
        .await
        .context("Server error")
}

/// Wait for either `signal` or the server task to finish, cancel `shutdown`,
/// and return the server's result.
///
/// A server that dies on its own is reported immediately instead of after the
/// next signal.
pub async fn supervise(
    mut server: JoinHandle<Result<()>>,
    signal: impl Future<Output = ()>,
    shutdown: CancellationToken,
) -> Result<()> {
    let finished = tokio::select! {
        _ = signal => None,
        finished = &mut server => Some(finished),
    };
    shutdown.cancel();

    let outcome = match finished {
        Some(outcome) => outcome,
        None => server.await,
    };

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::error!("Server shutdown with error: {:?}", e);
            Err(e)
        }
        Err(e) => {
            tracing::error!("Server task failed: {:?}", e);
            Err(e).context("Server task failed")
        }
    }
}

/// Periodically log admission and storage statistics until `shutdown` fires.
pub fn spawn_stats_reporter(
    state: &RpcState,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let admission = state.admission.clone();
    let storage = state.service.storage().clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = admission.stats();
                    let files = storage.stats();
                    tracing::info!(
                        admission.transfer_active = snapshot.transfer_active,
                        admission.transfer_total = snapshot.transfer_total,
                        admission.listing_active = snapshot.listing_active,
                        admission.listing_total = snapshot.listing_total,
                        files.count = files.file_count,
                        files.total_bytes = files.total_bytes,
                        "{}", snapshot
                    );
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }
    })
}

/// Resolve when SIGINT (Ctrl+C) or SIGTERM arrives.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to set up SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_state_from_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut config = StashConfig::default();
        config.paths.storage_dir = temp_dir.path().join("files");
        config.admission.transfer_limit = 3;

        let state = build_state(&config)?;

        assert_eq!(state.admission.stats().transfer_limit, 3);
        assert!(temp_dir.path().join("files/objects").is_dir());
        Ok(())
    }

    #[tokio::test]
    async fn test_supervise_reports_early_server_failure() -> Result<()> {
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(async { Err::<(), _>(anyhow::anyhow!("address in use")) });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            supervise(server, std::future::pending(), shutdown.clone()),
        )
        .await?;

        assert!(result.is_err());
        assert!(shutdown.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn test_supervise_drains_server_on_signal() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut config = StashConfig::default();
        config.paths.storage_dir = temp_dir.path().to_path_buf();
        let state = build_state(&config)?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;

        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, state, shutdown.clone()));

        tokio::time::timeout(
            Duration::from_secs(5),
            supervise(server, std::future::ready(()), shutdown.clone()),
        )
        .await??;

        assert!(shutdown.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_reporter_stops_on_shutdown() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut config = StashConfig::default();
        config.paths.storage_dir = temp_dir.path().to_path_buf();
        let state = build_state(&config)?;

        let shutdown = CancellationToken::new();
        let handle = spawn_stats_reporter(&state, Duration::from_millis(5), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle).await??;
        Ok(())
    }
}
