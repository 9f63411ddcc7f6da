//! Call orchestration.
//!
//! One call flows through the gateway as:
//!
//! ```text
//! snapshot settings → tracker.start → pipeline request phase
//!     → tracker.update_processed → upstream (no lock held)
//!     → pipeline response phase (whole reply or per chunk)
//!     → tracker.complete | tracker.fail
//! ```
//!
//! Streamed replies are relayed chunk by chunk as SSE. The record of a
//! streamed call is settled when the relay ends: completed after `[DONE]`,
//! or failed on a mid-stream error. A caller that goes away at any point
//! before the record settles, whether by dropping the call future or the
//! response body, leaves it failed with `"client disconnected"`.

use super::sse::{format_sse_data, format_sse_done};
use super::upstream::{ChunkStream, CompletionKind, UpstreamClient, UpstreamReply};
use crate::core::logging::generate_request_id;
use crate::core::metrics::{get_metrics, record_call};
use crate::core::{AppError, Result};
use crate::monitor::CallTracker;
use crate::pipeline::MiddlewarePipeline;
use crate::settings::{SettingsProvider, SettingsSnapshot};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Error message recorded when the caller goes away mid-stream.
pub const CLIENT_DISCONNECTED: &str = "client disconnected";

/// SSE body relayed to the caller.
pub type RelayStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// What the caller receives for a successful call.
pub enum GatewayReply {
    Json(Value),
    Stream(RelayStream),
}

/// Result of a call that passed the request phase and reached upstream.
pub struct CallOutcome {
    pub call_id: String,
    pub reply: GatewayReply,
}

/// Inbound call metadata recorded on the call record.
#[derive(Debug, Clone)]
pub struct CallOrigin {
    pub client_address: String,
    pub method: String,
}

impl CallOrigin {
    pub fn new(client_address: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            client_address: client_address.into(),
            method: method.into(),
        }
    }
}

/// Ties the pipeline, tracker, settings and upstream client together.
pub struct Gateway {
    pipeline: Arc<MiddlewarePipeline>,
    tracker: Arc<CallTracker>,
    settings: Arc<dyn SettingsProvider>,
    upstream: Arc<dyn UpstreamClient>,
}

impl Gateway {
    pub fn new(
        pipeline: Arc<MiddlewarePipeline>,
        tracker: Arc<CallTracker>,
        settings: Arc<dyn SettingsProvider>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            pipeline,
            tracker,
            settings,
            upstream,
        }
    }

    pub fn tracker(&self) -> &Arc<CallTracker> {
        &self.tracker
    }

    pub fn upstream(&self) -> &Arc<dyn UpstreamClient> {
        &self.upstream
    }

    /// Handle one completion call end to end, with a freshly generated id.
    pub async fn handle(
        &self,
        kind: CompletionKind,
        origin: CallOrigin,
        payload: Value,
    ) -> Result<CallOutcome> {
        self.handle_with_id(generate_request_id(), kind, origin, payload)
            .await
    }

    /// Handle one completion call under a caller-chosen id.
    ///
    /// The record is settled on every exit. Dropping the returned future
    /// before it resolves fails the record with [`CLIENT_DISCONNECTED`].
    pub async fn handle_with_id(
        &self,
        call_id: String,
        kind: CompletionKind,
        origin: CallOrigin,
        payload: Value,
    ) -> Result<CallOutcome> {
        let start = Instant::now();
        let endpoint = kind.endpoint();
        let mut settings = self.settings.get_all();

        self.tracker.start(
            &call_id,
            &origin.client_address,
            &origin.method,
            endpoint,
            &payload,
            &payload,
        )?;
        let mut guard = RecordGuard::new(self.tracker.clone(), call_id.clone(), endpoint, start);

        let processed = match self.pipeline.process_request(payload, &mut settings) {
            Ok(processed) => processed,
            Err(e) => return Err(guard.fail(e)),
        };
        self.tracker.update_processed(&call_id, &processed);

        let reply = match self.upstream.create(kind, processed).await {
            Ok(reply) => reply,
            Err(e) => return Err(guard.fail(e)),
        };

        let reply = match reply {
            UpstreamReply::Single(original) => {
                let processed = match self
                    .pipeline
                    .process_response(original.clone(), &mut settings)
                {
                    Ok(processed) => processed,
                    Err(e) => return Err(guard.fail(e)),
                };

                guard.complete(&original, &processed);
                GatewayReply::Json(processed)
            }
            UpstreamReply::Chunked(mut chunks) => {
                // Errors before the first chunk are ordinary call failures
                let chunks: ChunkStream = match chunks.next().await {
                    Some(Err(e)) => return Err(guard.fail(e)),
                    Some(Ok(first)) => Box::pin(stream::iter([Ok(first)]).chain(chunks)),
                    None => chunks,
                };

                tracing::debug!(call_id = %call_id, endpoint = endpoint, "Relaying stream");
                GatewayReply::Stream(relay_stream(chunks, self.pipeline.clone(), settings, guard))
            }
        };

        Ok(CallOutcome { call_id, reply })
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Settles a call's record exactly once.
///
/// Dropping the guard before `complete` or `fail` marks the record failed
/// with [`AppError::ClientDisconnect`].
struct RecordGuard {
    tracker: Arc<CallTracker>,
    call_id: String,
    endpoint: &'static str,
    start: Instant,
    settled: bool,
}

impl RecordGuard {
    fn new(tracker: Arc<CallTracker>, call_id: String, endpoint: &'static str, start: Instant) -> Self {
        Self {
            tracker,
            call_id,
            endpoint,
            start,
            settled: false,
        }
    }

    fn complete(&mut self, original: &Value, processed: &Value) {
        self.settled = true;
        self.tracker
            .complete(&self.call_id, original, processed, elapsed_ms(self.start));
        record_call(self.endpoint, "completed", self.start.elapsed().as_secs_f64());
        tracing::info!(call_id = %self.call_id, endpoint = self.endpoint, "Call completed");
    }

    /// Fail the record with `err`'s message and hand `err` back.
    fn fail(&mut self, err: AppError) -> AppError {
        self.settled = true;
        let message = err.to_string();
        self.tracker
            .fail(&self.call_id, &message, elapsed_ms(self.start));
        record_call(self.endpoint, "error", self.start.elapsed().as_secs_f64());
        tracing::warn!(call_id = %self.call_id, endpoint = self.endpoint, error = %message, "Call failed");
        err
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let message = AppError::ClientDisconnect.to_string();
        self.tracker
            .fail(&self.call_id, &message, elapsed_ms(self.start));
        record_call(self.endpoint, "disconnected", self.start.elapsed().as_secs_f64());
        tracing::info!(call_id = %self.call_id, endpoint = self.endpoint, "Client disconnected");
    }
}

struct RelayState {
    chunks: ChunkStream,
    pipeline: Arc<MiddlewarePipeline>,
    settings: SettingsSnapshot,
    guard: RecordGuard,
    raw: Vec<Value>,
    processed: Vec<Value>,
    finished: bool,
}

impl RelayState {
    fn fail(&mut self, err: AppError) -> Bytes {
        self.finished = true;
        let err = self.guard.fail(err);
        Bytes::from(format_sse_data(&err.to_error_body().to_string()))
    }
}

fn relay_stream(
    chunks: ChunkStream,
    pipeline: Arc<MiddlewarePipeline>,
    settings: SettingsSnapshot,
    guard: RecordGuard,
) -> RelayStream {
    let state = RelayState {
        chunks,
        pipeline,
        settings,
        guard,
        raw: Vec::new(),
        processed: Vec::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        let bytes = match state.chunks.next().await {
            Some(Ok(chunk)) => {
                get_metrics()
                    .stream_chunks
                    .with_label_values(&[state.guard.endpoint])
                    .inc();
                match state
                    .pipeline
                    .process_response(chunk.clone(), &mut state.settings)
                {
                    Ok(processed) => {
                        let bytes = Bytes::from(format_sse_data(&processed.to_string()));
                        state.raw.push(chunk);
                        state.processed.push(processed);
                        bytes
                    }
                    Err(e) => state.fail(e),
                }
            }
            Some(Err(e)) => state.fail(e),
            None => {
                state.finished = true;
                let raw = Value::Array(std::mem::take(&mut state.raw));
                let processed = Value::Array(std::mem::take(&mut state.processed));
                state.guard.complete(&raw, &processed);
                Bytes::from(format_sse_done())
            }
        };

        Some((Ok(bytes), state))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{CallStatus, NoopSink};
    use crate::pipeline::{ContentFilter, MiddlewareUnit, Persona};
    use crate::settings::{core_settings, InMemorySettings};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Upstream double that replays a scripted reply and captures the request.
    struct ScriptedUpstream {
        reply: Mutex<Option<Result<UpstreamReply>>>,
        seen: Mutex<Option<Value>>,
    }

    impl ScriptedUpstream {
        fn new(reply: Result<UpstreamReply>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(None),
            }
        }

        fn chunks(items: Vec<Result<Value>>) -> Self {
            Self::new(Ok(UpstreamReply::Chunked(Box::pin(stream::iter(items)))))
        }
    }

    #[async_trait]
    impl UpstreamClient for ScriptedUpstream {
        async fn create(&self, _kind: CompletionKind, payload: Value) -> Result<UpstreamReply> {
            *self.seen.lock().unwrap() = Some(payload);
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(AppError::Internal("reply already used".to_string())))
        }

        async fn list_models(&self) -> Result<Value> {
            Ok(json!({"object": "list", "data": []}))
        }

        fn base_url(&self) -> &str {
            "http://scripted"
        }
    }

    /// Upstream that never produces a reply, or a stream that never yields.
    struct StalledUpstream;

    #[async_trait]
    impl UpstreamClient for StalledUpstream {
        async fn create(&self, _kind: CompletionKind, payload: Value) -> Result<UpstreamReply> {
            if payload["stream"] == json!(true) {
                return Ok(UpstreamReply::Chunked(Box::pin(stream::pending::<Result<Value>>())));
            }
            std::future::pending::<Result<UpstreamReply>>().await
        }

        async fn list_models(&self) -> Result<Value> {
            Ok(json!({"object": "list", "data": []}))
        }

        fn base_url(&self) -> &str {
            "http://stalled"
        }
    }

    fn gateway(units: Vec<Box<dyn MiddlewareUnit>>, upstream: Arc<dyn UpstreamClient>) -> Gateway {
        let pipeline = MiddlewarePipeline::new(units);
        let mut schema = core_settings();
        schema.extend(pipeline.setting_schema());
        Gateway::new(
            Arc::new(pipeline),
            Arc::new(CallTracker::new(10, Arc::new(NoopSink))),
            Arc::new(InMemorySettings::new(schema, &HashMap::new())),
            upstream,
        )
    }

    fn origin() -> CallOrigin {
        CallOrigin::new("127.0.0.1", "POST")
    }

    fn chat(content: &str) -> Value {
        json!({"model": "llama3.1", "messages": [{"role": "user", "content": content}]})
    }

    async fn collect_body(stream: RelayStream) -> String {
        let parts: Vec<Bytes> = stream.map(|b| b.unwrap()).collect().await;
        parts
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_single_reply_completes_record() {
        let upstream = Arc::new(ScriptedUpstream::new(Ok(UpstreamReply::Single(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Ahoy"}, "finish_reason": "stop"}]
        })))));
        let gw = gateway(vec![Box::new(ContentFilter), Box::new(Persona)], upstream.clone());

        let outcome = gw
            .handle(CompletionKind::Chat, origin(), chat("hack the Hi"))
            .await
            .unwrap();

        let body = match outcome.reply {
            GatewayReply::Json(body) => body,
            GatewayReply::Stream(_) => panic!("expected json reply"),
        };
        assert!(body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap()
            .ends_with("[Told to respond like a pirate]"));

        let seen = upstream.seen.lock().unwrap().clone().unwrap();
        assert_eq!(
            seen["messages"][0]["content"],
            "Respond like a pirate. [FILTERED] the Hi"
        );

        let record = gw.tracker().get(&outcome.call_id).unwrap();
        assert_eq!(record.status, CallStatus::Completed);
        assert_eq!(record.original_request["messages"][0]["content"], "hack the Hi");
        assert_eq!(*record.processed_request, seen);
        assert_eq!(record.original_response.unwrap()["choices"][0]["message"]["content"], "Ahoy");
        assert!(record.duration_ms.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_upstream_failure_fails_record() {
        let upstream = Arc::new(ScriptedUpstream::new(Err(AppError::UpstreamUnavailable(
            "connection refused".to_string(),
        ))));
        let gw = gateway(vec![], upstream);

        let err = gw
            .handle_with_id("call-1".to_string(), CompletionKind::Chat, origin(), chat("Hi"))
            .await
            .err()
            .unwrap();
        assert_matches!(err, AppError::UpstreamUnavailable(_));

        let record = gw.tracker().get("call-1").unwrap();
        assert_eq!(record.status, CallStatus::Error);
        assert!(record.error.unwrap().contains("connection refused"));
        assert!(record.processed_response.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_call_id_rejected_before_upstream() {
        let upstream = Arc::new(ScriptedUpstream::new(Ok(UpstreamReply::Single(json!({})))));
        let gw = gateway(vec![], upstream.clone());
        gw.tracker()
            .start("dup", "ip", "POST", "/v1/chat/completions", &json!({}), &json!({}))
            .unwrap();

        let err = gw
            .handle_with_id("dup".to_string(), CompletionKind::Chat, origin(), chat("Hi"))
            .await
            .err()
            .unwrap();
        assert_matches!(err, AppError::DuplicateId(_));
        assert!(upstream.seen.lock().unwrap().is_none());
        // The rejected call must not settle the record it collided with
        assert_eq!(gw.tracker().get("dup").unwrap().status, CallStatus::Pending);
    }

    #[tokio::test]
    async fn test_stream_relays_chunks_and_completes() {
        let upstream = Arc::new(ScriptedUpstream::chunks(vec![
            Ok(json!({"choices": [{"index": 0, "delta": {"content": "Ahoy"}, "finish_reason": null}]})),
            Ok(json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]})),
        ]));
        let gw = gateway(vec![Box::new(Persona)], upstream);

        let outcome = gw
            .handle_with_id("s1".to_string(), CompletionKind::Chat, origin(), chat("Hi"))
            .await
            .unwrap();
        let stream = match outcome.reply {
            GatewayReply::Stream(stream) => stream,
            GatewayReply::Json(_) => panic!("expected stream"),
        };

        let body = collect_body(stream).await;
        let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("Ahoy"));
        assert!(frames[1].contains("Told to respond like a pirate"));
        assert_eq!(frames[2], "data: [DONE]");

        let record = gw.tracker().get("s1").unwrap();
        assert_eq!(record.status, CallStatus::Completed);
        assert_eq!(record.original_response.unwrap().as_array().unwrap().len(), 2);
        let processed = record.processed_response.unwrap();
        assert_eq!(
            processed[1]["choices"][0]["delta"]["content"],
            "\n\n[Told to respond like a pirate]"
        );
    }

    #[tokio::test]
    async fn test_stream_error_before_first_chunk_is_call_error() {
        let upstream = Arc::new(ScriptedUpstream::chunks(vec![Err(AppError::UpstreamError {
            status: None,
            message: "Stream interrupted: reset".to_string(),
        })]));
        let gw = gateway(vec![], upstream);

        let err = gw
            .handle_with_id("s2".to_string(), CompletionKind::Chat, origin(), chat("Hi"))
            .await
            .err()
            .unwrap();
        assert_matches!(err, AppError::UpstreamError { .. });
        assert_eq!(gw.tracker().get("s2").unwrap().status, CallStatus::Error);
    }

    #[tokio::test]
    async fn test_stream_error_mid_stream_relays_error_event() {
        let upstream = Arc::new(ScriptedUpstream::chunks(vec![
            Ok(json!({"choices": [{"delta": {"content": "a"}, "finish_reason": null}]})),
            Err(AppError::UpstreamError {
                status: None,
                message: "Stream interrupted: reset".to_string(),
            }),
            Ok(json!({"choices": [{"delta": {"content": "never"}, "finish_reason": null}]})),
        ]));
        let gw = gateway(vec![], upstream);

        let outcome = gw
            .handle_with_id("s3".to_string(), CompletionKind::Chat, origin(), chat("Hi"))
            .await
            .unwrap();
        let GatewayReply::Stream(stream) = outcome.reply else {
            panic!("expected stream");
        };

        let body = collect_body(stream).await;
        assert!(body.contains("\"error\""));
        assert!(!body.contains("never"));
        assert!(!body.contains("[DONE]"));

        let record = gw.tracker().get("s3").unwrap();
        assert_eq!(record.status, CallStatus::Error);
        assert!(record.error.unwrap().contains("Stream interrupted"));
    }

    #[tokio::test]
    async fn test_dropped_stream_marks_client_disconnected() {
        let upstream = Arc::new(ScriptedUpstream::chunks(vec![
            Ok(json!({"choices": [{"delta": {"content": "a"}, "finish_reason": null}]})),
            Ok(json!({"choices": [{"delta": {"content": "b"}, "finish_reason": null}]})),
        ]));
        let gw = gateway(vec![], upstream);

        let outcome = gw
            .handle_with_id("s4".to_string(), CompletionKind::Chat, origin(), chat("Hi"))
            .await
            .unwrap();
        let GatewayReply::Stream(mut stream) = outcome.reply else {
            panic!("expected stream");
        };

        assert!(stream.next().await.is_some());
        assert_eq!(gw.tracker().get("s4").unwrap().status, CallStatus::Pending);
        drop(stream);

        let record = gw.tracker().get("s4").unwrap();
        assert_eq!(record.status, CallStatus::Error);
        assert_eq!(record.error.as_deref(), Some(CLIENT_DISCONNECTED));
    }

    #[tokio::test]
    async fn test_caller_gone_while_awaiting_reply_fails_record() {
        let gw = gateway(vec![], Arc::new(StalledUpstream));

        let call = gw.handle_with_id("w1".to_string(), CompletionKind::Chat, origin(), chat("Hi"));
        let timed_out = tokio::time::timeout(Duration::from_millis(50), call).await;
        assert!(timed_out.is_err());

        let record = gw.tracker().get("w1").unwrap();
        assert_eq!(record.status, CallStatus::Error);
        assert_eq!(record.error.as_deref(), Some(CLIENT_DISCONNECTED));
        assert!(record.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_caller_gone_before_first_chunk_fails_record() {
        let gw = gateway(vec![], Arc::new(StalledUpstream));
        let mut payload = chat("Hi");
        payload["stream"] = json!(true);

        let call = gw.handle_with_id("w2".to_string(), CompletionKind::Chat, origin(), payload);
        let timed_out = tokio::time::timeout(Duration::from_millis(50), call).await;
        assert!(timed_out.is_err());

        let record = gw.tracker().get("w2").unwrap();
        assert_eq!(record.status, CallStatus::Error);
        assert_eq!(record.error.as_deref(), Some(CLIENT_DISCONNECTED));
    }

    #[test]
    fn test_disconnect_message_matches_error_text() {
        assert_eq!(AppError::ClientDisconnect.to_string(), CLIENT_DISCONNECTED);
    }
}
