//! SSE response construction for relayed completion streams.

use crate::core::{AppError, Result};
use crate::services::RelayStream;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;

/// Header carrying the call id so clients can look up the call record.
pub const CALL_ID_HEADER: &str = "x-request-id";

/// Wrap a relay stream in a `text/event-stream` response.
pub fn sse_response(stream: RelayStream, call_id: &str) -> Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .header(CALL_ID_HEADER, call_id)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Failed to build stream response: {}", e)))
}
