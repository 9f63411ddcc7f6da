//! Call record and its wire representation.

use chrono::{Local, TimeZone};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;

/// Lifecycle status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Completed,
    Error,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CallStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Completed => "completed",
            CallStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proxied call as seen by the monitor.
///
/// Serializes with a derived `datetime` field (local time, second precision)
/// computed from `timestamp`; deserialization ignores it.
///
/// Payloads are shared, so cloning a record never copies request or
/// response bodies.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallRecord {
    pub id: String,
    /// Seconds since the Unix epoch when the call started
    pub timestamp: f64,
    pub ip_address: String,
    pub method: String,
    pub endpoint: String,
    pub original_request: Arc<Value>,
    pub processed_request: Arc<Value>,
    #[serde(default)]
    pub original_response: Option<Arc<Value>>,
    #[serde(default)]
    pub processed_response: Option<Arc<Value>>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    pub status: CallStatus,
}

impl CallRecord {
    /// New pending record stamped with the current time.
    pub fn pending(
        id: String,
        ip_address: String,
        method: String,
        endpoint: String,
        original_request: Value,
        processed_request: Value,
    ) -> Self {
        Self {
            id,
            timestamp: now_timestamp(),
            ip_address,
            method,
            endpoint,
            original_request: Arc::new(original_request),
            processed_request: Arc::new(processed_request),
            original_response: None,
            processed_response: None,
            duration_ms: None,
            error: None,
            status: CallStatus::Pending,
        }
    }

    /// `timestamp` formatted as `YYYY-MM-DD HH:MM:SS` in local time.
    pub fn datetime(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

impl Serialize for CallRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CallRecord", 13)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("datetime", &self.datetime())?;
        state.serialize_field("ip_address", &self.ip_address)?;
        state.serialize_field("method", &self.method)?;
        state.serialize_field("endpoint", &self.endpoint)?;
        state.serialize_field("original_request", &self.original_request)?;
        state.serialize_field("processed_request", &self.processed_request)?;
        state.serialize_field("original_response", &self.original_response)?;
        state.serialize_field("processed_response", &self.processed_response)?;
        state.serialize_field("duration_ms", &self.duration_ms)?;
        state.serialize_field("error", &self.error)?;
        state.serialize_field("status", &self.status)?;
        state.end()
    }
}

/// Current time as fractional seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

fn format_timestamp(timestamp: f64) -> String {
    let secs = timestamp.floor() as i64;
    match Local.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}
