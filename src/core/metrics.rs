//! Prometheus metrics for monitoring the relay.
//!
//! This module provides a centralized metrics registry for call outcomes,
//! latency, middleware failures and streaming throughput.

use prometheus::{
    register_gauge, register_gauge_vec, register_histogram_vec, register_int_counter_vec, Gauge,
    GaugeVec, HistogramVec, IntCounterVec,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of proxied calls by endpoint and terminal status
    pub call_count: IntCounterVec,

    /// Call duration histogram in seconds
    pub call_duration: HistogramVec,

    /// Number of HTTP requests currently being handled, by endpoint
    pub active_calls: GaugeVec,

    /// Middleware unit failures by unit name
    pub middleware_failures: IntCounterVec,

    /// Chunks relayed on streaming calls
    pub stream_chunks: IntCounterVec,

    /// Records currently held by the call monitor
    pub monitor_records: Gauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// This should be called once at application startup. Subsequent calls will
/// return the same instance.
///
/// # Examples
///
/// ```no_run
/// use llm_relay::core::metrics::init_metrics;
///
/// let metrics = init_metrics();
/// metrics.call_count.with_label_values(&["/v1/chat/completions", "completed"]).inc();
/// ```
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let call_count = register_int_counter_vec!(
            "llm_relay_calls_total",
            "Total number of proxied calls",
            &["endpoint", "status"]
        )
        .expect("Failed to register call_count metric");

        let call_duration = register_histogram_vec!(
            "llm_relay_call_duration_seconds",
            "Call duration in seconds",
            &["endpoint"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("Failed to register call_duration metric");

        let active_calls = register_gauge_vec!(
            "llm_relay_active_calls",
            "Number of active HTTP requests",
            &["endpoint"]
        )
        .expect("Failed to register active_calls metric");

        let middleware_failures = register_int_counter_vec!(
            "llm_relay_middleware_failures_total",
            "Middleware unit failures",
            &["unit"]
        )
        .expect("Failed to register middleware_failures metric");

        let stream_chunks = register_int_counter_vec!(
            "llm_relay_stream_chunks_total",
            "Chunks relayed on streaming calls",
            &["endpoint"]
        )
        .expect("Failed to register stream_chunks metric");

        let monitor_records = register_gauge!(
            "llm_relay_monitor_records",
            "Call records held by the monitor"
        )
        .expect("Failed to register monitor_records metric");

        Metrics {
            call_count,
            call_duration,
            active_calls,
            middleware_failures,
            stream_chunks,
            monitor_records,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Record a terminal call outcome.
pub fn record_call(endpoint: &str, status: &str, duration_secs: f64) {
    let metrics = get_metrics();
    metrics
        .call_count
        .with_label_values(&[endpoint, status])
        .inc();
    metrics
        .call_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}
