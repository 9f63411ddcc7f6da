//! HTTP request handlers for the completion, model and health endpoints.

use crate::api::streaming::{sse_response, CALL_ID_HEADER};
use crate::api::AppState;
use crate::core::logging::generate_request_id;
use crate::core::middleware::client_address;
use crate::core::{AppError, Result};
use crate::services::{CallOrigin, CompletionKind, GatewayReply};
use crate::with_request_id;
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Upstream probe budget for `/health`.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle chat completion requests (streaming or not).
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Response> {
    handle_call(state, CompletionKind::Chat, peer, headers, payload).await
}

/// Handle legacy text completion requests.
pub async fn completions(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Response> {
    handle_call(state, CompletionKind::Text, peer, headers, payload).await
}

async fn handle_call(
    state: Arc<AppState>,
    kind: CompletionKind,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Value,
) -> Result<Response> {
    if !payload.is_object() {
        return Err(AppError::BadRequest(
            "Request body must be a JSON object".to_string(),
        ));
    }

    let origin = CallOrigin::new(
        client_address(&headers, peer.map(|ConnectInfo(addr)| addr)),
        "POST",
    );
    let call_id = generate_request_id();

    let outcome = with_request_id!(
        call_id.clone(),
        state
            .gateway
            .handle_with_id(call_id.clone(), kind, origin, payload)
    )?;

    match outcome.reply {
        GatewayReply::Json(body) => {
            Ok(([(CALL_ID_HEADER, outcome.call_id)], Json(body)).into_response())
        }
        GatewayReply::Stream(stream) => sse_response(stream, &outcome.call_id),
    }
}

/// List models available upstream.
pub async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let models = state.upstream.list_models().await?;
    Ok(Json(models))
}

/// Health report.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub llm_configured: bool,
    pub llm_base_url: String,
    pub modules_loaded: usize,
    pub llm_alive: bool,
    pub llm_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_models_count: Option<usize>,
}

/// Health check endpoint; probes the upstream model listing.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let probe = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, state.upstream.list_models()).await;

    let (llm_alive, llm_error, llm_models_count) = match probe {
        Ok(Ok(models)) => {
            let count = models
                .get("data")
                .and_then(Value::as_array)
                .map(|d| d.len())
                .unwrap_or(0);
            (true, None, Some(count))
        }
        Ok(Err(e)) => (false, Some(e.to_string()), None),
        Err(_) => (
            false,
            Some(format!(
                "Connection timeout after {}s",
                HEALTH_PROBE_TIMEOUT.as_secs()
            )),
            None,
        ),
    };

    if let Some(error) = &llm_error {
        tracing::warn!(error = %error, "Upstream health probe failed");
    }

    Json(HealthResponse {
        status: if llm_alive { "healthy" } else { "degraded" },
        llm_configured: state.upstream_configured,
        llm_base_url: state.upstream.base_url().to_string(),
        modules_loaded: state.pipeline.len(),
        llm_alive,
        llm_error,
        llm_models_count,
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}
