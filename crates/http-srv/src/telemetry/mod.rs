//! Tracing setup: structured JSON logs, plus OTLP span export when an
//! endpoint is configured.
//!
//! Log level comes from `log_level` in the configuration and can be
//! overridden with `RUST_LOG`.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
