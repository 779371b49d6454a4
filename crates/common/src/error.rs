//! Authorization error taxonomy shared by the middleware and its backends.

use thiserror::Error;

/// Reason an inbound request could not be authorized.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`AuthError::MissingToken`] → 401
/// - [`AuthError::MalformedToken`] → 401
/// - [`AuthError::Forbidden`] → 403
/// - [`AuthError::Backend`] → 403
///
/// Both failure kinds produced by a backend collapse into the same 403; the
/// middleware does not distinguish a deliberate denial from a backend outage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `Authorization` header, or an empty one.
    #[error("missing authorization token")]
    MissingToken,

    /// The header is not exactly `<scheme> <token>`.
    #[error("invalid authorization token")]
    MalformedToken,

    /// The backend evaluated the token and denied access.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The backend could not reach a decision (validation service down, bad response, ...).
    #[error("authorization backend error: {0}")]
    Backend(String),
}

impl AuthError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::MissingToken | AuthError::MalformedToken => 401,
            AuthError::Forbidden(_) | AuthError::Backend(_) => 403,
        }
    }

    /// Message placed in the `message` field of the JSON error body.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::MissingToken | AuthError::MalformedToken => self.to_string(),
            other => format!("authorization failed: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_codes() {
        assert_eq!(AuthError::MissingToken.http_status(), 401);
        assert_eq!(AuthError::MalformedToken.http_status(), 401);
        assert_eq!(AuthError::Forbidden("x".into()).http_status(), 403);
        assert_eq!(AuthError::Backend("x".into()).http_status(), 403);
    }

    #[test]
    fn token_errors_keep_fixed_messages() {
        assert_eq!(
            AuthError::MissingToken.public_message(),
            "missing authorization token"
        );
        assert_eq!(
            AuthError::MalformedToken.public_message(),
            "invalid authorization token"
        );
    }

    #[test]
    fn backend_failures_are_prefixed_with_cause() {
        let e = AuthError::Forbidden("token revoked".into());
        assert_eq!(
            e.public_message(),
            "authorization failed: forbidden: token revoked"
        );
        let e = AuthError::Backend("connection refused".into());
        assert_eq!(
            e.public_message(),
            "authorization failed: authorization backend error: connection refused"
        );
    }
}
