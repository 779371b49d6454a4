//! `http-srv` — an HTTP listener with a managed lifecycle and bearer-token
//! route authorization.
//!
//! ```no_run
//! use std::sync::Arc;
//! use http_srv::{config::ServerConfig, server::{router, HttpServer, SHUTDOWN_TIMEOUT}};
//!
//! # async fn run(provider: Arc<dyn http_srv::auth::AuthProvider>) -> anyhow::Result<()> {
//! let cfg = ServerConfig::load()?;
//! let app = router::build(router::demo_routes(), &cfg, Some(provider));
//!
//! let mut server = HttpServer::new(cfg.address(), app);
//! server.start().await?;
//! http_srv::server::lifecycle::shutdown_signal().await?;
//! server.stop(SHUTDOWN_TIMEOUT).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod telemetry;

pub use error::ServerError;
