//! Errors produced by the server lifecycle.

use std::io;

use thiserror::Error;

use crate::server::lifecycle::LifecycleState;

/// Lifecycle and serving failures.
///
/// [`ServerError::Bind`] is fatal at startup; [`ServerError::ServeLoop`] is
/// fatal after startup and is routed through the server's fault handler.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound (port in use, malformed address, ...).
    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The accept loop stopped for a reason other than an intentional shutdown.
    #[error("serve loop failed: {0}")]
    ServeLoop(#[source] io::Error),

    /// `stop` was called before the server was started.
    #[error("server has not been started")]
    NotStarted,

    /// `start` was called on a server that already left the `Created` state.
    #[error("server already started (state: {0:?})")]
    AlreadyStarted(LifecycleState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_address() {
        let e = ServerError::Bind {
            address: "127.0.0.1:80".into(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(e.to_string().contains("127.0.0.1:80"));
    }
}
