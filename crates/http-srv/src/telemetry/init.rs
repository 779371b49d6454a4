//! Tracing subscriber and optional OTLP pipeline initialisation.

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace::Tracer, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// Configures:
/// - A JSON-formatted [`tracing_subscriber`] layer for structured log output.
/// - When `otlp_endpoint` is set, a [`tracing_opentelemetry`] layer exporting
///   spans to it over gRPC.
///
/// # Errors
///
/// Returns an error if the OTLP pipeline cannot be installed or a global
/// subscriber is already set.
pub fn init_telemetry(log_level: &str, otlp_endpoint: Option<&str>) -> Result<()> {
    let otel_layer = match otlp_endpoint {
        Some(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(endpoint)?)),
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel_layer)
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    Ok(())
}

/// Flush and stop the OTLP exporter. A no-op when none was installed.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

fn otlp_tracer(endpoint: &str) -> Result<Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default().with_resource(service_resource()),
        )
        .install_batch(runtime::Tokio)
        .context("failed to install OTLP tracing pipeline")
}

fn service_resource() -> Resource {
    Resource::new(vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            env!("CARGO_PKG_NAME"),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ])
}
