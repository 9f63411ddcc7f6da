//! Thread-safe call tracker.
//!
//! All store access is serialized through one mutex. Payloads are copied and
//! redacted before the lock is taken and stored behind `Arc`, so the store
//! lock only covers O(1) bookkeeping. Events are serialized after the store
//! lock is released, under a second lock taken before the release, so they
//! still leave in the order the records changed.

use super::events::{EventSink, MonitorEvent, MonitorEventType};
use super::record::{CallRecord, CallStatus};
use super::redact::{IdentityRedactor, Redactor};
use super::store::CallStore;
use crate::core::metrics::get_metrics;
use crate::core::{AppError, Result};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};

/// Records every call's lifecycle and broadcasts each transition.
pub struct CallTracker {
    store: Mutex<CallStore>,
    emit_order: Mutex<()>,
    sink: Arc<dyn EventSink>,
    redactor: Arc<dyn Redactor>,
}

impl CallTracker {
    pub fn new(capacity: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store: Mutex::new(CallStore::new(capacity)),
            emit_order: Mutex::new(()),
            sink,
            redactor: Arc::new(IdentityRedactor),
        }
    }

    /// Replace the redaction hook applied to stored payloads.
    pub fn with_redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redactor = redactor;
        self
    }

    fn lock(&self) -> MutexGuard<'_, CallStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self, payload: &Value) -> Arc<Value> {
        Arc::new(self.redactor.redact(payload.clone()))
    }

    /// Release the store lock, then serialize and emit `data`.
    ///
    /// The ordering lock is taken while `store` is still held, so two
    /// transitions are emitted in the order they were applied.
    fn publish(
        &self,
        store: MutexGuard<'_, CallStore>,
        event_type: MonitorEventType,
        data: EventData,
    ) {
        let _order = self.emit_order.lock().unwrap_or_else(|e| e.into_inner());
        drop(store);

        let data = match data {
            EventData::Record(record) => serde_json::to_value(&record).unwrap_or_else(|e| {
                tracing::warn!(id = %record.id, error = %e, "Failed to serialize call record for event");
                Value::Null
            }),
            EventData::Empty => json!({}),
        };
        self.sink.emit(MonitorEvent::new(event_type, data));
    }

    /// Begin tracking a call as `pending`.
    pub fn start(
        &self,
        id: &str,
        ip_address: &str,
        method: &str,
        endpoint: &str,
        original_request: &Value,
        processed_request: &Value,
    ) -> Result<()> {
        let record = CallRecord::pending(
            id.to_string(),
            ip_address.to_string(),
            method.to_string(),
            endpoint.to_string(),
            self.redactor.redact(original_request.clone()),
            self.redactor.redact(processed_request.clone()),
        );

        let mut store = self.lock();
        if store.contains(id) {
            return Err(AppError::DuplicateId(id.to_string()));
        }

        if let Some(evicted) = store.insert(record.clone()) {
            tracing::debug!(evicted = %evicted.id, "Evicted oldest call record");
        }
        get_metrics().monitor_records.set(store.len() as f64);
        self.publish(store, MonitorEventType::RequestStarted, EventData::Record(record));
        Ok(())
    }

    /// Overwrite the processed request of a pending record.
    pub fn update_processed(&self, id: &str, processed_request: &Value) {
        let processed = self.snapshot(processed_request);

        let mut store = self.lock();
        match store.get_mut(id) {
            Some(record) if record.status == CallStatus::Pending => {
                record.processed_request = processed;
            }
            Some(_) => tracing::debug!(%id, "Ignoring processed update for finished record"),
            None => tracing::debug!(%id, "Ignoring processed update for unknown record"),
        }
    }

    /// Mark a pending record `completed`.
    pub fn complete(
        &self,
        id: &str,
        original_response: &Value,
        processed_response: &Value,
        elapsed_ms: f64,
    ) {
        let original = self.snapshot(original_response);
        let processed = self.snapshot(processed_response);

        let mut store = self.lock();
        let Some(record) = store.get_mut(id) else {
            tracing::debug!(%id, "Ignoring completion for unknown record");
            return;
        };
        if record.status.is_terminal() {
            tracing::debug!(%id, status = %record.status, "Ignoring completion for finished record");
            return;
        }

        record.original_response = Some(original);
        record.processed_response = Some(processed);
        record.duration_ms = Some(elapsed_ms.max(0.0));
        record.status = CallStatus::Completed;
        let record = record.clone();
        self.publish(store, MonitorEventType::RequestCompleted, EventData::Record(record));
    }

    /// Mark a pending record `error` with `message`.
    pub fn fail(&self, id: &str, message: &str, elapsed_ms: f64) {
        let mut store = self.lock();
        let Some(record) = store.get_mut(id) else {
            tracing::debug!(%id, "Ignoring failure for unknown record");
            return;
        };
        if record.status.is_terminal() {
            tracing::debug!(%id, status = %record.status, "Ignoring failure for finished record");
            return;
        }

        record.error = Some(message.to_string());
        record.duration_ms = Some(elapsed_ms.max(0.0));
        record.status = CallStatus::Error;
        let record = record.clone();
        self.publish(store, MonitorEventType::RequestError, EventData::Record(record));
    }

    /// Records most-recent-first, truncated to `limit` when given.
    pub fn list(&self, limit: Option<usize>) -> Vec<CallRecord> {
        let store = self.lock();
        store
            .iter_recent()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<CallRecord> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut store = self.lock();
        store.clear();
        get_metrics().monitor_records.set(0.0);
        self.publish(store, MonitorEventType::RecordsCleared, EventData::Empty);
        tracing::info!("Call records cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }
}

enum EventData {
    Record(CallRecord),
    Empty,
}
