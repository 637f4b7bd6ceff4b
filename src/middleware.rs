//! Request middleware: bearer auth, per-client rate limiting and access logging.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::{ApiError, ProxyError};
use crate::logging::AccessRecord;
use crate::server::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id assigned to the request, or `"unknown"` outside the
/// request-id layer.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Key identifying the client for rate limiting: a valid `X-Real-IP`, else
/// the first valid `X-Forwarded-For` entry, else the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_ip = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or_default().trim())
            .filter(|ip| ip.parse::<IpAddr>().is_ok())
            .map(str::to_string)
    };

    header_ip("x-real-ip")
        .or_else(|| header_ip("x-forwarded-for"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn token_prefix(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}...")
}

/// Reject requests without `Authorization: Bearer <configured token>`.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let Some(token) = auth.strip_prefix("Bearer ") else {
        tracing::warn!(
            method = %request.method(),
            uri = %request.uri(),
            "missing or malformed authorization header"
        );
        return ApiError::new(
            ProxyError::unauthorized("invalid authorization header"),
            request_id(headers),
        )
        .into_response();
    };

    let expected = &state.config.security.bearer_token;
    if token.is_empty() || token != expected {
        tracing::warn!(
            method = %request.method(),
            uri = %request.uri(),
            token = %token_prefix(token),
            "invalid bearer token"
        );
        return ApiError::new(ProxyError::unauthorized("invalid token"), request_id(headers))
            .into_response();
    }

    next.run(request).await
}

/// Admit the request through the client's token bucket. A no-op when rate
/// limiting is disabled.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(registry) = state.rate_limiter.as_ref() else {
        return next.run(request).await;
    };

    let key = client_key(request.headers(), peer_addr(&request));
    if let Err(err) = registry.check(&key) {
        tracing::debug!(client = %key, "rate limit exceeded");
        return ApiError::new(err, request_id(request.headers())).into_response();
    }

    next.run(request).await
}

/// Record one access log entry per request once the response is produced.
pub async fn log_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(log) = state.request_log.clone() else {
        return next.run(request).await;
    };

    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let request_id = request_id(request.headers());
    let client = client_key(request.headers(), peer_addr(&request));

    let response = next.run(request).await;

    log.record(AccessRecord {
        timestamp: chrono::Utc::now(),
        request_id,
        method,
        path,
        status: response.status().as_u16(),
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        client,
    });

    response
}
