use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stashconf::StashConfig;
use tokio_util::sync::CancellationToken;

use stashd::{server, telemetry};

/// Content addressed file server with admission control
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, replacing ./stash.toml in the load order
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for stored files
    #[arg(short, long)]
    storage: Option<PathBuf>,

    /// Log admission statistics periodically
    #[arg(long)]
    stats: bool,

    /// OTLP gRPC endpoint for OpenTelemetry (e.g., "127.0.0.1:4317")
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut StashConfig) {
        if let Some(port) = self.port {
            config.bind.port = port;
        }
        if let Some(storage) = &self.storage {
            config.paths.storage_dir = storage.clone();
        }
        if self.stats {
            config.admission.report_stats = true;
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            config.telemetry.otlp_endpoint = Some(endpoint.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = StashConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.apply(&mut config);

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let telemetry = telemetry::init(
        &config.telemetry.log_level,
        config.telemetry.otlp_endpoint.as_deref(),
    )
    .context("Failed to initialize telemetry")?;

    tracing::info!(
        config.files = ?sources.files,
        config.env = ?sources.env_overrides,
        "Configuration loaded"
    );

    let state = server::build_state(&config)?;

    let addr = config.bind.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown = CancellationToken::new();

    if config.admission.report_stats {
        server::spawn_stats_reporter(
            &state,
            Duration::from_secs(config.admission.stats_interval_secs),
            shutdown.clone(),
        );
    }

    let server = tokio::spawn(server::serve(listener, state, shutdown.clone()));
    let result = server::supervise(server, server::shutdown_signal(), shutdown).await;

    tracing::info!("Shutdown complete");
    telemetry.shutdown()?;

    result
}
