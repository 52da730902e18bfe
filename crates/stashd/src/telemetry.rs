//! Tracing and OpenTelemetry initialization.
//!
//! Console logging is always on. With an OTLP endpoint configured, traces,
//! logs and metrics are also exported over gRPC.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::{BatchLogProcessor, SdkLoggerProvider};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{BatchSpanProcessor, RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE_NAME: &str = "stashd";

/// Owns the OTLP providers so their pending batches can be flushed at exit.
///
/// The global registry keeps its own handles forever, so dropping those never
/// flushes anything. Call [`TelemetryGuard::shutdown`] before the process
/// ends.
#[derive(Default)]
#[must_use = "dropping the guard skips the final telemetry flush"]
pub struct TelemetryGuard {
    providers: Option<OtlpProviders>,
}

struct OtlpProviders {
    tracer: SdkTracerProvider,
    logger: SdkLoggerProvider,
    meter: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Flush and stop every exporter. Console-only telemetry has nothing to
    /// flush.
    pub fn shutdown(self) -> Result<()> {
        let Some(providers) = self.providers else {
            return Ok(());
        };
        tracing::info!("Shutting down telemetry");

        let mut failures = Vec::new();
        if let Err(e) = providers.tracer.shutdown() {
            failures.push(format!("traces: {e}"));
        }
        if let Err(e) = providers.logger.shutdown() {
            failures.push(format!("logs: {e}"));
        }
        if let Err(e) = providers.meter.shutdown() {
            failures.push(format!("metrics: {e}"));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Telemetry shutdown incomplete: {}", failures.join("; "))
        }
    }
}

fn env_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(log_level).with_context(|| format!("Invalid log filter: {log_level}"))
}

/// Initialize logging, exporting over OTLP when `otlp_endpoint` is set.
pub fn init(log_level: &str, otlp_endpoint: Option<&str>) -> Result<TelemetryGuard> {
    let Some(otlp_endpoint) = otlp_endpoint else {
        tracing_subscriber::registry()
            .with(env_filter(log_level)?)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(TelemetryGuard::default());
    };

    let endpoint = if otlp_endpoint.contains("://") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{otlp_endpoint}")
    };
    let resource = Resource::builder_empty()
        .with_service_name(SERVICE_NAME)
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let providers = OtlpProviders {
        tracer: tracer_provider(&endpoint, resource.clone())?,
        logger: logger_provider(&endpoint, resource.clone())?,
        meter: meter_provider(&endpoint, resource)?,
    };

    let tracer = providers.tracer.tracer(SERVICE_NAME);
    global::set_tracer_provider(providers.tracer.clone());
    global::set_meter_provider(providers.meter.clone());

    tracing_subscriber::registry()
        .with(env_filter(log_level)?)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(
            opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(
                &providers.logger,
            ),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(otlp.endpoint = %endpoint, "OpenTelemetry initialized");

    Ok(TelemetryGuard {
        providers: Some(providers),
    })
}

fn tracer_provider(endpoint: &str, resource: Resource) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    Ok(SdkTracerProvider::builder()
        .with_span_processor(BatchSpanProcessor::builder(exporter).build())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build())
}

fn logger_provider(endpoint: &str, resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    Ok(SdkLoggerProvider::builder()
        .with_log_processor(BatchLogProcessor::builder(exporter).build())
        .with_resource(resource)
        .build())
}

fn meter_provider(endpoint: &str, resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP metric exporter")?;

    Ok(SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter).build())
        .with_resource(resource)
        .build())
}

/// Parse a W3C traceparent header and return an OpenTelemetry Context.
///
/// Format: `{version}-{trace_id}-{span_id}-{trace_flags}`
/// Example: `00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
///
/// Returns None if the traceparent is invalid or missing.
pub fn parse_traceparent(traceparent: Option<&str>) -> Option<opentelemetry::Context> {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    let tp = traceparent?;
    let parts: Vec<&str> = tp.split('-').collect();

    if parts.len() != 4 {
        tracing::warn!("Invalid traceparent format: {}", tp);
        return None;
    }

    if parts[0] != "00" {
        tracing::warn!("Unsupported traceparent version: {}", parts[0]);
        return None;
    }

    let trace_id = match hex_to_bytes::<16>(parts[1]) {
        Some(bytes) => TraceId::from_bytes(bytes),
        None => {
            tracing::warn!("Invalid trace_id in traceparent: {}", parts[1]);
            return None;
        }
    };

    let span_id = match hex_to_bytes::<8>(parts[2]) {
        Some(bytes) => SpanId::from_bytes(bytes),
        None => {
            tracing::warn!("Invalid span_id in traceparent: {}", parts[2]);
            return None;
        }
    };

    let flags = u8::from_str_radix(parts[3], 16).unwrap_or(0);

    let span_context = SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::new(flags),
        true,
        TraceState::default(),
    );

    Some(opentelemetry::Context::current().with_remote_span_context(span_context))
}

/// Helper to convert hex string to fixed-size byte array
fn hex_to_bytes<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 {
        return None;
    }

    let mut bytes = [0u8; N];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_bytes() {
        let result: Option<[u8; 4]> = hex_to_bytes("deadbeef");
        assert_eq!(result, Some([0xde, 0xad, 0xbe, 0xef]));

        let result: Option<[u8; 4]> = hex_to_bytes("short");
        assert_eq!(result, None);

        let result: Option<[u8; 4]> = hex_to_bytes("not_hex!");
        assert_eq!(result, None);
    }

    #[test]
    fn test_parse_traceparent_valid() {
        let tp = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        assert!(parse_traceparent(Some(tp)).is_some());
    }

    #[test]
    fn test_parse_traceparent_none() {
        assert!(parse_traceparent(None).is_none());
    }

    #[test]
    fn test_parse_traceparent_invalid_format() {
        assert!(parse_traceparent(Some("not-a-valid-traceparent")).is_none());
    }

    #[test]
    fn test_parse_traceparent_wrong_version() {
        let tp = "01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        assert!(parse_traceparent(Some(tp)).is_none());
    }

    #[test]
    fn test_console_guard_shutdown_is_noop() -> Result<()> {
        TelemetryGuard::default().shutdown()
    }

    #[test]
    fn test_guard_shutdown_stops_providers() -> Result<()> {
        let tracer = SdkTracerProvider::builder().build();
        let logger = SdkLoggerProvider::builder().build();
        let meter = SdkMeterProvider::builder().build();
        let guard = TelemetryGuard {
            providers: Some(OtlpProviders {
                tracer: tracer.clone(),
                logger: logger.clone(),
                meter: meter.clone(),
            }),
        };

        guard.shutdown()?;

        // A second shutdown is refused once the first has run.
        assert!(tracer.shutdown().is_err());
        assert!(logger.shutdown().is_err());
        assert!(meter.shutdown().is_err());
        Ok(())
    }

    #[test]
    fn test_env_filter_rejects_garbage() {
        assert!(env_filter("info,stashd=debug").is_ok());
        assert!(env_filter("stashd=loud").is_err());
    }
}
