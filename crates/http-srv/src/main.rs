//! `http-srv` — binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`ServerConfig`] (`config.json`, then `HTTP_*` env).
//! 2. Initialise the telemetry pipeline.
//! 3. Build the static authorization backend, if configured.
//! 4. Build the Axum router and start the server.
//! 5. On SIGTERM / Ctrl-C, drain for at most [`SHUTDOWN_TIMEOUT`].

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use http_srv::{
    auth::{AuthProvider, StaticAuthProvider},
    config::ServerConfig,
    server::{
        lifecycle::shutdown_signal, router, HttpServer, ShutdownOutcome, SHUTDOWN_TIMEOUT,
    },
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = ServerConfig::load().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(&cfg.log_level, cfg.otel_exporter_otlp_endpoint.as_deref())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %cfg.address(),
        "http-srv starting"
    );

    // -----------------------------------------------------------------------
    // 3. Authorization backend
    // -----------------------------------------------------------------------
    let provider = cfg.auth.as_ref().map(|auth| {
        info!(
            secured_routes = auth.secured_routes.len(),
            tokens = auth.tokens.len(),
            "route authorization enabled"
        );
        Arc::new(StaticAuthProvider::new(auth)) as Arc<dyn AuthProvider>
    });
    if provider.is_none() {
        warn!("no auth section configured; every route is public");
    }

    // -----------------------------------------------------------------------
    // 4. HTTP server
    // -----------------------------------------------------------------------
    let app = router::build(router::demo_routes(), &cfg, provider);
    let mut server = HttpServer::new(cfg.address(), app);
    server.start().await?;

    // -----------------------------------------------------------------------
    // 5. Shutdown
    // -----------------------------------------------------------------------
    shutdown_signal().await?;
    if server.stop(SHUTDOWN_TIMEOUT).await? == ShutdownOutcome::Forced {
        warn!("some connections were closed before completing");
    }

    telemetry::shutdown_telemetry();
    Ok(())
}
