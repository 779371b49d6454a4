//! Request handlers mounted by the demo binary, and the catch-all 404.

use axum::{http::StatusCode, response::IntoResponse, Extension, Json};
use common::{ErrorResponse, HealthResponse, Identity};

use super::middleware::ResponseError;

/// `GET /health` — liveness check. Never secured by the static backend
/// unless listed explicitly.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// `GET /whoami` — echoes the identity attached by the auth middleware.
///
/// Returns `401` when the route is not secured and no identity was attached.
pub async fn whoami(identity: Option<Extension<Identity>>) -> axum::response::Response {
    match identity {
        Some(Extension(identity)) => Json(identity).into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("no authenticated identity")),
        )
            .into_response(),
    }
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        ResponseError::part("not found"),
        Json(ErrorResponse::new("not found")),
    )
}
