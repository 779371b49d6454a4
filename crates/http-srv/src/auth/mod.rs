//! Authorization port consumed by the auth middleware.
//!
//! The server never validates tokens itself. It asks an [`AuthProvider`]
//! whether a route is secured and, if so, hands it the bearer token to turn
//! into an [`Identity`].
//!
//! # Header contract
//!
//! The `Authorization` header must be exactly `<scheme> <token>`: one space,
//! no trimming. The scheme word is not inspected.

pub mod static_provider;

pub use static_provider::StaticAuthProvider;

use async_trait::async_trait;
use axum::{
    extract::{MatchedPath, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use common::{AuthError, Identity};

/// Decision backend for route protection.
///
/// Implementations are shared across all in-flight requests and must handle
/// their own internal synchronisation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Whether `route` requires a bearer token.
    ///
    /// Called on every request; must not perform I/O.
    fn is_route_secured(&self, route: &str) -> bool;

    /// Resolve `token` presented for `route` into an [`Identity`].
    ///
    /// `request` gives access to the method, URI and headers of the request
    /// being authorized.
    ///
    /// # Errors
    ///
    /// [`AuthError::Forbidden`] when the token is rejected,
    /// [`AuthError::Backend`] when no decision could be reached.
    async fn authorize(
        &self,
        request: &Parts,
        route: &str,
        token: &str,
    ) -> Result<Identity, AuthError>;
}

/// Route identifier of `request`: the pattern matched by the router
/// (`/users/:id`), or the literal path if no route was matched yet.
pub fn route_identifier(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned())
}

/// Extract the token from an `Authorization: <scheme> <token>` header.
///
/// # Errors
///
/// [`AuthError::MissingToken`] when the header is absent or empty,
/// [`AuthError::MalformedToken`] when it holds bytes outside visible ASCII
/// or does not split into exactly two parts on a single space.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = match headers.get(AUTHORIZATION) {
        Some(v) if !v.is_empty() => v,
        _ => return Err(AuthError::MissingToken),
    };
    let value = value.to_str().map_err(|_| AuthError::MalformedToken)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_scheme), Some(token), None) => Ok(token),
        _ => Err(AuthError::MalformedToken),
    }
}
