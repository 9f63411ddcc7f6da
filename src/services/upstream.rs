//! Upstream LLM client.
//!
//! [`UpstreamClient`] is the seam between the gateway and the backend; the
//! production implementation talks to any OpenAI-compatible server over HTTP.

use super::sse::{SseParser, DONE_MARKER};
use crate::core::config::UpstreamConfig;
use crate::core::{AppError, Result};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

/// Upstream error bodies are cut to this many characters before surfacing.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Which completion endpoint a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Chat,
    Text,
}

impl CompletionKind {
    /// Path relative to the upstream base URL.
    pub fn path(self) -> &'static str {
        match self {
            CompletionKind::Chat => "chat/completions",
            CompletionKind::Text => "completions",
        }
    }

    /// Endpoint recorded on call records and metrics.
    pub fn endpoint(self) -> &'static str {
        match self {
            CompletionKind::Chat => "/v1/chat/completions",
            CompletionKind::Text => "/v1/completions",
        }
    }
}

/// Stream of parsed response chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Upstream reply: one response object, or a sequence of chunks.
pub enum UpstreamReply {
    Single(Value),
    Chunked(ChunkStream),
}

impl std::fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamReply::Single(value) => f.debug_tuple("Single").field(value).finish(),
            UpstreamReply::Chunked(_) => f.write_str("Chunked(..)"),
        }
    }
}

/// Contract consumed by the gateway.
///
/// Transport failures must surface as [`AppError::UpstreamUnavailable`] and
/// backend failures as [`AppError::UpstreamError`], never as a success value.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Forward a completion request. The payload's `stream` flag selects a
    /// chunked reply.
    async fn create(&self, kind: CompletionKind, payload: Value) -> Result<UpstreamReply>;

    async fn list_models(&self) -> Result<Value>;

    /// Base URL reported by the health endpoint.
    fn base_url(&self) -> &str;
}

/// HTTP client for OpenAI-compatible backends (Ollama, vLLM, OpenAI).
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(anyhow::Error::new(e).context("Failed to build HTTP client")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            truncate_chars(&body, MAX_ERROR_BODY_CHARS)
        };
        Err(AppError::UpstreamError {
            status: Some(status.as_u16()),
            message,
        })
    }
}

#[async_trait]
impl UpstreamClient for OpenAiClient {
    async fn create(&self, kind: CompletionKind, payload: Value) -> Result<UpstreamReply> {
        let stream = payload
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let url = self.url(kind.path());

        tracing::debug!(url = %url, stream = stream, "Forwarding to upstream");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        if stream && is_event_stream {
            return Ok(UpstreamReply::Chunked(parse_chunk_stream(Box::pin(
                response.bytes_stream(),
            ))));
        }

        // Some backends ignore `stream` and answer with a single object
        let body = response.json::<Value>().await.map_err(|e| AppError::UpstreamError {
            status: None,
            message: format!("Invalid JSON from upstream: {}", e),
        })?;
        Ok(UpstreamReply::Single(body))
    }

    async fn list_models(&self) -> Result<Value> {
        let response = self
            .http
            .get(self.url("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        let response = Self::check_status(response).await?;

        response.json::<Value>().await.map_err(|e| AppError::UpstreamError {
            status: None,
            message: format!("Invalid JSON from upstream: {}", e),
        })
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

struct ChunkParseState<S> {
    bytes: S,
    parser: SseParser,
    ready: VecDeque<Result<Value>>,
    finished: bool,
}

/// Turn an upstream SSE byte stream into parsed JSON chunks, ending at
/// `[DONE]` or when the connection closes.
pub fn parse_chunk_stream<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = ChunkParseState {
        bytes,
        parser: SseParser::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    for event in state.parser.parse(bytes.as_ref()) {
                        let Some(data) = event.data else { continue };
                        if data.trim() == DONE_MARKER {
                            state.finished = true;
                            break;
                        }
                        let chunk = serde_json::from_str::<Value>(&data).map_err(|e| {
                            AppError::UpstreamError {
                                status: None,
                                message: format!("Malformed stream chunk: {}", e),
                            }
                        });
                        state.ready.push_back(chunk);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.ready.push_back(Err(AppError::UpstreamError {
                        status: None,
                        message: format!("Stream interrupted: {}", e),
                    }));
                }
                None => {
                    if state.parser.has_pending() {
                        tracing::debug!("Upstream stream closed with an unterminated event");
                    }
                    state.finished = true;
                }
            }
        }
    }))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
