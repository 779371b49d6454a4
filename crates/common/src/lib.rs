//! Common types, protocol definitions, and errors shared across `http-srv` crates.

pub mod error;
pub mod protocol;

pub use error::AuthError;
pub use protocol::{ErrorResponse, HealthResponse, Identity};
