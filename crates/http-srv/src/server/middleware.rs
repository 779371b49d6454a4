//! Tower layers applied to every route: request logging, CORS and panic
//! recovery. Assembled in [`super::router::build`].

use std::{any::Any, net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderName, HeaderValue, Method, Request, Response, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use common::ErrorResponse;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::{MakeSpan, OnResponse},
};
use tracing::{error, info, Span};

use crate::config::ServerConfig;

/// Header carrying the per-request id, generated when the client sends none.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Opens one `request` span per request, carrying the fields logged by the
/// access log.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let remote_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default();

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            protocol = ?request.version(),
            host = header_str(request, header::HOST),
            user_agent = header_str(request, header::USER_AGENT),
            request_id = header_str(request, REQUEST_ID_HEADER),
            remote_ip = %remote_ip,
        )
    }
}

/// Error text a handler or middleware attaches to its response, reported in
/// the `error` field of the access log.
#[derive(Debug, Clone)]
pub struct ResponseError(pub String);

impl ResponseError {
    /// Response part carrying `message`.
    pub fn part(message: impl Into<String>) -> Extension<Self> {
        Extension(Self(message.into()))
    }
}

/// Emits the access-log line once the response head is ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogResponse;

impl<B> OnResponse<B> for LogResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &Span) {
        info!(
            status = response.status().as_u16(),
            error = response_error(response),
            latency_ms = latency.as_millis() as u64,
            "request"
        );
    }
}

fn response_error<B>(response: &Response<B>) -> &str {
    response
        .extensions()
        .get::<ResponseError>()
        .map(|e| e.0.as_str())
        .unwrap_or_default()
}

fn header_str<B>(request: &Request<B>, name: HeaderName) -> &str {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// CORS policy from the configured origin / header / method lists.
/// A `"*"` entry in a list allows anything for that list.
pub fn cors_layer(cfg: &ServerConfig) -> CorsLayer {
    let origins = if is_wildcard(&cfg.allowed_origins) {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            cfg.allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    let headers = if is_wildcard(&cfg.allowed_headers) {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(
            cfg.allowed_headers
                .iter()
                .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok()),
        )
    };

    let methods = if is_wildcard(&cfg.allowed_methods) {
        AllowMethods::any()
    } else {
        AllowMethods::list(
            cfg.allowed_methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_headers(headers)
        .allow_methods(methods)
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}

/// Turns a handler panic into a 500 JSON response instead of a dropped connection.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!(panic = detail, "handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ResponseError::part(format!("panic: {detail}")),
        Json(ErrorResponse::new("internal server error")),
    )
        .into_response()
}
