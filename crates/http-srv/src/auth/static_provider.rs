//! [`StaticAuthProvider`]: in-memory token table for the demo binary and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::http::request::Parts;
use common::{AuthError, Identity};
use serde_json::json;

use super::AuthProvider;
use crate::config::{AuthConfig, TokenGrant};

/// Authorization backend backed by a fixed set of tokens.
///
/// Immutable after construction, so it is safe to share without locking.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthProvider {
    secured_routes: HashSet<String>,
    grants: HashMap<String, TokenGrant>,
}

impl StaticAuthProvider {
    pub fn new(cfg: &AuthConfig) -> Self {
        Self {
            secured_routes: cfg.secured_routes.iter().cloned().collect(),
            grants: cfg
                .tokens
                .iter()
                .map(|g| (g.token.clone(), g.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    fn is_route_secured(&self, route: &str) -> bool {
        self.secured_routes.contains(route)
    }

    async fn authorize(
        &self,
        _request: &Parts,
        route: &str,
        token: &str,
    ) -> Result<Identity, AuthError> {
        let grant = self
            .grants
            .get(token)
            .ok_or_else(|| AuthError::Forbidden("unknown token".into()))?;

        if let Some(routes) = &grant.routes {
            if !routes.iter().any(|r| r == route) {
                return Err(AuthError::Forbidden(format!(
                    "user {} may not access {route}",
                    grant.username
                )));
            }
        }

        Ok(Identity::new(&grant.username).with_claims(json!({ "routes": grant.routes })))
    }
}
