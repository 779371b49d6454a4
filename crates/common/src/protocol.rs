//! Types exchanged between the server, its authorization backends, and
//! HTTP callers.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The authenticated principal resolved by a successful authorization.
///
/// Inserted into the request extensions by the auth middleware; handlers
/// read it back with `Extension<Identity>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Login name of the principal.
    pub username: String,
    /// Backend-specific attributes. Opaque to the server.
    #[serde(default)]
    pub claims: serde_json::Value,
}

impl Identity {
    /// An identity with no claims.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            claims: serde_json::Value::Null,
        }
    }

    /// Attach backend claims.
    pub fn with_claims(mut self, claims: serde_json::Value) -> Self {
        self.claims = claims;
        self
    }
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// JSON body returned on any rejected request: `{"message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server accepts requests.
    pub status: String,
    /// Crate version of the running binary.
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_response_has_only_message() {
        let body = serde_json::to_value(ErrorResponse::new("missing authorization token")).unwrap();
        assert_eq!(body, json!({"message": "missing authorization token"}));
    }

    #[test]
    fn identity_claims_default_to_null() {
        let id: Identity = serde_json::from_value(json!({"username": "alice"})).unwrap();
        assert_eq!(id, Identity::new("alice"));
        assert!(id.claims.is_null());
    }

    #[test]
    fn identity_with_claims() {
        let id = Identity::new("bob").with_claims(json!({"roles": ["admin"]}));
        assert_eq!(id.claims["roles"][0], "admin");
    }
}
