//! Axum router construction.

use std::{sync::Arc, time::Duration};

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    auth::{require_authorization, AuthState},
    handlers,
    middleware::{self, LogResponse, RequestSpan},
};
use crate::{auth::AuthProvider, config::ServerConfig};

/// Wrap `app` with the auth middleware (when `auth` is set) and the shared
/// layers, and install the JSON 404 fallback.
///
/// The auth middleware is a route layer: it only runs for requests that
/// matched one of `app`'s routes. An `app` without routes has nothing to
/// protect and is served without it.
pub fn build(app: Router, cfg: &ServerConfig, auth: Option<Arc<dyn AuthProvider>>) -> Router {
    let app = match auth {
        Some(provider) if app.has_routes() => app.route_layer(from_fn_with_state(
            AuthState::new(provider),
            require_authorization,
        )),
        _ => app,
    };

    app.fallback(handlers::not_found).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(
                middleware::REQUEST_ID_HEADER,
                MakeRequestUuid,
            ))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(RequestSpan)
                    .on_response(LogResponse),
            )
            .layer(PropagateRequestIdLayer::new(middleware::REQUEST_ID_HEADER))
            .layer(middleware::cors_layer(cfg))
            .layer(TimeoutLayer::new(Duration::from_secs(
                cfg.request_timeout_secs,
            )))
            .layer(CatchPanicLayer::custom(middleware::panic_response)),
    )
}

/// Routes served by the `http-srv` binary.
pub fn demo_routes() -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/whoami", get(handlers::whoami))
}
