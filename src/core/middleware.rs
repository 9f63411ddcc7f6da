//! HTTP middleware for request tracking and client identification.
//!
//! Not to be confused with the payload middleware units in
//! [`crate::pipeline`]: this module wraps the axum router.

use crate::core::metrics::get_metrics;
use axum::{
    extract::{MatchedPath, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;

/// Resolve the caller's address.
///
/// Prefers the first entry of `X-Forwarded-For` (the relay usually sits behind
/// a reverse proxy), then the socket peer, then `"unknown"`.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(addr) = forwarded {
        return addr.to_string();
    }

    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Label used when a request reached no route.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Holds one `active_calls` slot for a route; released on drop so a
/// cancelled handler future does not leak the gauge.
struct ActiveCall {
    route: String,
}

impl ActiveCall {
    fn enter(route: String) -> Self {
        get_metrics().active_calls.with_label_values(&[&route]).inc();
        Self { route }
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        get_metrics()
            .active_calls
            .with_label_values(&[&self.route])
            .dec();
    }
}

/// Middleware for tracking HTTP request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track active requests and log each request with its duration.
    ///
    /// Gauges are labelled by the matched route template (`/records/:id`),
    /// never the raw path, so the series count stays bounded. Mount with
    /// `Router::route_layer` so the matched path is available.
    ///
    /// For streaming responses the logged duration is time to first byte,
    /// since `next.run()` returns once headers are ready.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
        let method = request.method().to_string();

        // Skip metrics endpoint itself to avoid recursion
        if route == "/metrics" {
            return next.run(request).await;
        }

        let _active = ActiveCall::enter(route.clone());

        let start = Instant::now();
        let response = next.run(request).await;
        let duration = start.elapsed().as_secs_f64();

        let is_streaming = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        if is_streaming {
            tracing::info!(
                "{} {} - status={} ttfb={:.3}s",
                method,
                route,
                response.status().as_u16(),
                duration
            );
        } else {
            tracing::info!(
                "{} {} - status={} duration={:.3}s",
                method,
                route,
                response.status().as_u16(),
                duration
            );
        }

        response
    }
}
