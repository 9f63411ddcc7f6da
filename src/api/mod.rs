//! HTTP layer: shared state, router and handlers.

pub mod handlers;
pub mod monitor;
pub mod settings;
pub mod streaming;

pub use handlers::{chat_completions, completions, health, list_models, metrics_handler};

use crate::core::config::AppConfig;
use crate::core::middleware::MetricsMiddleware;
use crate::monitor::{CallTracker, EventBroadcaster};
use crate::pipeline::MiddlewarePipeline;
use crate::services::{Gateway, UpstreamClient};
use crate::settings::{core_settings, InMemorySettings};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub pipeline: Arc<MiddlewarePipeline>,
    pub tracker: Arc<CallTracker>,
    pub settings: Arc<InMemorySettings>,
    pub events: Arc<EventBroadcaster>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub upstream_configured: bool,
}

impl AppState {
    /// Build state with the built-in middleware units.
    pub fn new(config: &AppConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self::with_pipeline(config, MiddlewarePipeline::with_default_units(), upstream)
    }

    /// Build state around an explicit pipeline.
    pub fn with_pipeline(
        config: &AppConfig,
        pipeline: MiddlewarePipeline,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        let mut schema = core_settings();
        schema.extend(pipeline.setting_schema());

        let pipeline = Arc::new(pipeline);
        let settings = Arc::new(InMemorySettings::new(schema, &config.settings));
        let events = Arc::new(EventBroadcaster::new(config.monitor.event_buffer));
        let tracker = Arc::new(CallTracker::new(config.monitor.capacity, events.clone()));
        let gateway = Arc::new(Gateway::new(
            pipeline.clone(),
            tracker.clone(),
            settings.clone(),
            upstream.clone(),
        ));

        tracing::info!(
            units = ?pipeline.names(),
            capacity = config.monitor.capacity,
            "Application state initialized"
        );

        Self {
            gateway,
            pipeline,
            tracker,
            settings,
            events,
            upstream,
            upstream_configured: !config.upstream.api_key.is_empty(),
        }
    }
}

/// Build the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/completions", post(handlers::completions))
        .route("/v1/models", get(handlers::list_models))
        // Operator endpoints
        .route(
            "/api/settings",
            get(settings::get_settings).post(settings::update_settings),
        )
        .route(
            "/api/monitor/records",
            get(monitor::list_records).delete(monitor::clear_records),
        )
        .route("/api/monitor/records/:id", get(monitor::get_record))
        .route("/api/monitor/events", get(monitor::monitor_events))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .route_layer(axum::middleware::from_fn(MetricsMiddleware::track_metrics))
        .with_state(state)
}
