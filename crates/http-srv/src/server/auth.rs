//! Bearer-token authorization middleware.
//!
//! Installed with [`axum::Router::route_layer`] so it runs after routing and
//! sees the matched route pattern. Per request:
//!
//! 1. Unsecured routes are forwarded untouched; no header is read.
//! 2. Missing or malformed `Authorization` headers get a 401.
//! 3. The token is handed to the [`AuthProvider`]; any failure is a 403.
//! 4. On success the [`Identity`] is inserted into the request extensions and
//!    the request continues to the handler, whose response is returned as is.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use common::{AuthError, ErrorResponse, Identity};
use tracing::{error, info};

use super::middleware::ResponseError;
use crate::auth::{bearer_token, route_identifier, AuthProvider};

/// State handed to [`require_authorization`].
#[derive(Clone)]
pub struct AuthState {
    pub provider: Arc<dyn AuthProvider>,
}

impl AuthState {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self { provider }
    }
}

/// Axum middleware enforcing the [`AuthProvider`] policy on every routed request.
pub async fn require_authorization(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let route = route_identifier(&request);

    if !auth.provider.is_route_secured(&route) {
        return next.run(request).await;
    }

    let token = match bearer_token(request.headers()) {
        Ok(t) => t.to_owned(),
        Err(e) => {
            error!(%route, error = %e, "rejecting request");
            return reject(&e);
        }
    };

    let (mut parts, body) = request.into_parts();
    let identity: Identity = match auth.provider.authorize(&parts, &route, &token).await {
        Ok(identity) => identity,
        Err(e) => {
            error!(%route, error = %e, "authorization failed");
            return reject(&e);
        }
    };

    info!(%route, user = %identity.username, "authorization succeeded");
    parts.extensions.insert(identity);

    next.run(Request::from_parts(parts, body)).await
}

/// Build the 401 / 403 JSON response for `err`.
fn reject(err: &AuthError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::FORBIDDEN);
    (
        status,
        ResponseError::part(err.to_string()),
        Json(ErrorResponse::new(err.public_message())),
    )
        .into_response()
}
