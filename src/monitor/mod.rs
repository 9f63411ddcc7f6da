//! Live call monitor: bounded record store, lifecycle tracking and event
//! broadcasting.

pub mod events;
pub mod record;
pub mod redact;
pub mod store;
pub mod tracker;

pub use events::{
    EventBroadcaster, EventSink, MonitorEvent, MonitorEventType, NoopSink, DEFAULT_EVENT_BUFFER,
};
pub use record::{CallRecord, CallStatus};
pub use redact::{FieldRedactor, IdentityRedactor, Redactor};
pub use store::CallStore;
pub use tracker::CallTracker;
