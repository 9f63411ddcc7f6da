//! Logs a summary of each request and response passing through the pipeline.

use super::MiddlewareUnit;
use crate::core::Result;
use crate::settings::SettingsSnapshot;
use serde_json::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogging;

impl RequestLogging {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Box<dyn MiddlewareUnit> {
        Box::new(Self::new())
    }
}

impl MiddlewareUnit for RequestLogging {
    fn name(&self) -> &'static str {
        "request_logging"
    }

    fn description(&self) -> &'static str {
        "Logs request and response summaries"
    }

    fn process_request(&self, payload: Value, _settings: &SettingsSnapshot) -> Result<Value> {
        let model = payload.get("model").and_then(Value::as_str).unwrap_or("unknown");
        let messages = payload
            .get("messages")
            .and_then(Value::as_array)
            .map(|m| m.len())
            .unwrap_or(0);
        let stream = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);

        tracing::info!(
            request_id = %crate::core::logging::get_request_id(),
            model = %model,
            messages = messages,
            stream = stream,
            "Incoming request"
        );
        Ok(payload)
    }

    fn process_response(&self, payload: Value, _settings: &SettingsSnapshot) -> Result<Value> {
        // Stream chunks carry no usage until the end; keep per-chunk noise at debug
        match payload.get("usage").filter(|u| !u.is_null()) {
            Some(usage) => {
                let model = payload.get("model").and_then(Value::as_str).unwrap_or("unknown");
                tracing::info!(
                    request_id = %crate::core::logging::get_request_id(),
                    model = %model,
                    usage = %usage,
                    "Outgoing response"
                );
            }
            None => {
                let id = payload.get("id").and_then(Value::as_str).unwrap_or("");
                tracing::debug!(
                    request_id = %crate::core::logging::get_request_id(),
                    id = %id,
                    "Outgoing response"
                );
            }
        }
        Ok(payload)
    }
}
