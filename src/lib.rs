//! LLM Relay - an OpenAI-compatible pass-through gateway with a live monitor
//!
//! Every chat or text completion call is run through an ordered middleware
//! pipeline on the way out and on the way back, forwarded to an
//! OpenAI-compatible backend, and tracked from start to finish in a bounded
//! in-memory history that operators can query or follow live.
//!
//! - **Middleware Pipeline**: explicit, ordered registry of payload
//!   transformations, each toggled by a `use_<name>` setting
//! - **Call Tracker**: thread-safe ring buffer of call records with lifecycle
//!   events broadcast to subscribers
//! - **Streaming Passthrough**: chunk-by-chunk SSE relay with response
//!   middleware applied per chunk and records settled on completion,
//!   mid-stream failure or client disconnect
//! - **Metrics & Monitoring**: Prometheus metrics and structured tracing
//!
//! # Architecture
//!
//! - [`core`]: config, errors, logging context, metrics, HTTP middleware
//! - [`settings`]: setting schema, provider and per-call snapshots
//! - [`pipeline`]: middleware units and the pipeline that runs them
//! - [`monitor`]: call records, store, tracker and event sinks
//! - [`services`]: upstream client, SSE codec and call orchestration
//! - [`api`]: router, shared state and HTTP handlers
//!
//! # Configuration
//!
//! Configuration is read from `CONFIG_PATH` (default `config.yaml`) when the
//! file exists. Environment variables override it:
//! - `HOST`, `PORT`: bind address (default 0.0.0.0:5000)
//! - `OPENAI_BASE_URL`, `OPENAI_API_KEY`: upstream backend
//! - `VERIFY_SSL`: verify upstream certificates (default: true)
//! - `REQUEST_TIMEOUT_SECS`: upstream timeout (default: 300)
//! - `MONITOR_CAPACITY`: call records kept in memory (default: 1000)

pub mod api;
pub mod core;
pub mod monitor;
pub mod pipeline;
pub mod services;
pub mod settings;

// Re-export commonly used types for convenience
pub use api::{build_router, AppState};
pub use core::{AppConfig, AppError, Result};
pub use monitor::{CallRecord, CallStatus, CallTracker};
pub use pipeline::{MiddlewarePipeline, MiddlewareUnit};
pub use services::{Gateway, OpenAiClient, UpstreamClient};
