//! Prometheus metrics for the aggregation service
//!
//! This module provides metrics tracking for:
//! - Batching: identifiers requested and coalesced, flushes by trigger, resolutions
//! - Downstream: calls per endpoint and outcome, call latency
//! - API: aggregation requests and latency
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for batching and downstream metrics
struct BatchingMetrics {
    identifiers_requested: CounterVec,
    identifiers_coalesced: CounterVec,
    flushes: CounterVec,
    batches: CounterVec,
    identifiers_resolved: CounterVec,
    identifiers_missing: CounterVec,
    downstream_calls: CounterVec,
    downstream_duration: HistogramVec,
}

/// Container for inbound API metrics
struct ApiMetrics {
    api_requests: CounterVec,
    aggregation_duration: Histogram,
}

/// Global storage for batching metrics
static BATCHING_METRICS: OnceLock<BatchingMetrics> = OnceLock::new();

/// Global storage for API metrics
static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = aggregator::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let batching = BatchingMetrics {
        identifiers_requested: register_counter_vec!(
            "aggregator_identifiers_requested_total",
            "Distinct identifiers requested per resource",
            &["resource"]
        )?,
        identifiers_coalesced: register_counter_vec!(
            "aggregator_identifiers_coalesced_total",
            "Identifiers that joined an existing pending or in-flight lookup",
            &["resource"]
        )?,
        flushes: register_counter_vec!(
            "aggregator_flushes_total",
            "Flushes of the pending batch by trigger",
            &["resource", "trigger"]
        )?,
        batches: register_counter_vec!(
            "aggregator_batches_total",
            "Downstream batches dispatched",
            &["resource"]
        )?,
        identifiers_resolved: register_counter_vec!(
            "aggregator_identifiers_resolved_total",
            "Identifiers resolved with a value",
            &["resource"]
        )?,
        identifiers_missing: register_counter_vec!(
            "aggregator_identifiers_missing_total",
            "Identifiers resolved as missing",
            &["resource"]
        )?,
        downstream_calls: register_counter_vec!(
            "aggregator_downstream_calls_total",
            "Downstream calls by endpoint and outcome",
            &["endpoint", "outcome"]
        )?,
        downstream_duration: register_histogram_vec!(
            "aggregator_downstream_call_duration_seconds",
            "Downstream call duration in seconds",
            &["endpoint"],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let api = ApiMetrics {
        api_requests: register_counter_vec!(
            "aggregator_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        aggregation_duration: register_histogram!(
            "aggregator_aggregation_duration_seconds",
            "Time from aggregation request to complete response",
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 7.5, 10.0, 15.0, 30.0]
        )?,
    };

    BATCHING_METRICS
        .set(batching)
        .map_err(|_| "Batching metrics already initialized")?;
    API_METRICS.set(api).map_err(|_| "API metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record identifiers handed to a coalescer
///
/// `coalesced` counts the ones that joined an existing lookup.
pub fn record_identifiers(resource: &str, requested: usize, coalesced: usize) {
    let Some(m) = BATCHING_METRICS.get() else {
        return;
    };

    m.identifiers_requested
        .with_label_values(&[resource])
        .inc_by(requested as f64);
    if coalesced > 0 {
        m.identifiers_coalesced
            .with_label_values(&[resource])
            .inc_by(coalesced as f64);
    }
}

/// Record a flush and the number of batches it dispatched
pub fn record_flush(resource: &str, trigger: &str, batches: usize) {
    let Some(m) = BATCHING_METRICS.get() else {
        return;
    };

    m.flushes.with_label_values(&[resource, trigger]).inc();
    m.batches
        .with_label_values(&[resource])
        .inc_by(batches as f64);
}

/// Record how a batch resolved
pub fn record_resolution(resource: &str, resolved: usize, missing: usize) {
    let Some(m) = BATCHING_METRICS.get() else {
        return;
    };

    if resolved > 0 {
        m.identifiers_resolved
            .with_label_values(&[resource])
            .inc_by(resolved as f64);
    }
    if missing > 0 {
        m.identifiers_missing
            .with_label_values(&[resource])
            .inc_by(missing as f64);
    }
}

/// Record a downstream call
pub fn record_downstream_call(endpoint: &str, outcome: &str, duration_secs: f64) {
    let Some(m) = BATCHING_METRICS.get() else {
        return;
    };

    m.downstream_calls
        .with_label_values(&[endpoint, outcome])
        .inc();
    m.downstream_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16) {
    if let Some(m) = API_METRICS.get() {
        let status_str = status.to_string();
        m.api_requests
            .with_label_values(&[endpoint, &status_str])
            .inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an aggregation timer (returns a timer handle)
pub fn start_aggregation_timer() -> MetricsTimer {
    match API_METRICS.get() {
        Some(m) => MetricsTimer::new(m.aggregation_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
