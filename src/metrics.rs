//! Prometheus metrics registry and instruments.
//!
//! Instruments are process-wide; label values name the operation or query
//! so several open stores share one set of series.

use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Write Metrics
    pub static ref WRITES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedstore_writes_total", "Total number of serialized write transactions"),
        &["operation", "outcome"]
    ).expect("metric can be created");
    pub static ref WRITE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "feedstore_write_duration_seconds",
            "Write transaction duration in seconds, including any resume wait"
        ).buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5]),
        &["operation"]
    ).expect("metric can be created");
    pub static ref WRITE_RETRIES_TOTAL: IntCounter = IntCounter::new(
        "feedstore_write_retries_total",
        "Total number of writes retried after a resume signal"
    ).expect("metric can be created");

    // Observation Metrics
    pub static ref OBSERVER_RERUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedstore_observer_reruns_total", "Total number of observation query executions"),
        &["query"]
    ).expect("metric can be created");
    pub static ref OBSERVER_DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedstore_observer_deliveries_total", "Total number of values delivered to observers"),
        &["query"]
    ).expect("metric can be created");
    pub static ref OBSERVER_DISCARDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedstore_observer_discards_total", "Total number of results discarded because a commit landed mid-query"),
        &["query"]
    ).expect("metric can be created");
    pub static ref OBSERVERS_ACTIVE: IntGauge = IntGauge::new(
        "feedstore_observers_active",
        "Current number of live observations"
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedstore_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedstore_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(WRITES_TOTAL.clone()))
        .expect("WRITES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(WRITE_DURATION_SECONDS.clone()))
        .expect("WRITE_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(WRITE_RETRIES_TOTAL.clone()))
        .expect("WRITE_RETRIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(OBSERVER_RERUNS_TOTAL.clone()))
        .expect("OBSERVER_RERUNS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(OBSERVER_DELIVERIES_TOTAL.clone()))
        .expect("OBSERVER_DELIVERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(OBSERVER_DISCARDS_TOTAL.clone()))
        .expect("OBSERVER_DISCARDS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(OBSERVERS_ACTIVE.clone()))
        .expect("OBSERVERS_ACTIVE can be registered");
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Render the registry in the Prometheus text exposition format.
pub fn encode_metrics() -> String {
    use prometheus::TextEncoder;

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            String::new()
        }
    }
}
