//! Error types and handling for the relay.
//!
//! [`AppError`] carries the call-level failure taxonomy (upstream, middleware,
//! monitor lookups, client disconnects) plus configuration errors,
//! and converts into an OpenAI-style JSON error response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Pipeline phase in which a middleware unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Response,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Request => write!(f, "request"),
            Phase::Response => write!(f, "response"),
        }
    }
}

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Transport or connection failure reaching the LLM backend
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Backend reachable but returned a failure or an unparsable payload
    #[error("Upstream error: {message}")]
    UpstreamError {
        status: Option<u16>,
        message: String,
    },

    /// A middleware unit raised during request or response processing
    #[error("Middleware '{unit}' failed during {phase} processing: {message}")]
    MiddlewareFailure {
        unit: String,
        phase: Phase,
        message: String,
    },

    /// Call record id unknown to the store
    #[error("Record not found: {0}")]
    NotFound(String),

    /// `start` called with an id that is already tracked
    #[error("Duplicate record id: {0}")]
    DuplicateId(String),

    /// Client provided invalid data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Client went away before the call completed
    #[error("client disconnected")]
    ClientDisconnect,

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamError { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            AppError::MiddlewareFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateId(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // HTTP 408 rather than nginx's non-standard 499
            AppError::ClientDisconnect => StatusCode::REQUEST_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error type string used in the OpenAI-style error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::UpstreamUnavailable(_) | AppError::UpstreamError { .. } => "upstream_error",
            AppError::MiddlewareFailure { .. } => "middleware_error",
            AppError::NotFound(_) => "not_found",
            AppError::DuplicateId(_) => "conflict",
            AppError::BadRequest(_) => "invalid_request_error",
            _ => "api_error",
        }
    }

    /// OpenAI-style error body. Also used for in-stream error events.
    pub fn to_error_body(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status_code().as_u16()
            }
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if matches!(self, AppError::ClientDisconnect) {
            tracing::info!("Client disconnected before request completed");
        }
        (status, Json(self.to_error_body())).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
