//! HTTP server, routing, and middleware.
//!
//! # Responsibilities
//! - Own the listening socket and its lifecycle ([`lifecycle::HttpServer`]).
//! - Gate secured routes behind bearer-token authorization ([`auth`]).
//! - Apply the shared request logging, CORS, timeout, and panic layers.

pub mod auth;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod router;

pub use lifecycle::{HttpServer, LifecycleState, ShutdownOutcome, SHUTDOWN_TIMEOUT};
