//! Monitor lifecycle events and the sinks that receive them.

use super::record::now_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered events per subscriber before slow subscribers start lagging.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventType {
    RequestStarted,
    RequestCompleted,
    RequestError,
    RecordsCleared,
}

/// Message delivered to monitor subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    #[serde(rename = "type")]
    pub event_type: MonitorEventType,
    /// Record wire object, or `{}` for `records_cleared`
    pub data: Value,
    pub timestamp: f64,
}

impl MonitorEvent {
    pub fn new(event_type: MonitorEventType, data: Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: now_timestamp(),
        }
    }
}

/// Best-effort destination for monitor events.
///
/// `emit` is called with the tracker's lock held, so implementations must not
/// block and must swallow their own failures.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MonitorEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: MonitorEvent) {}
}

/// Fans events out to any number of live subscribers.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl EventSink for EventBroadcaster {
    fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}
