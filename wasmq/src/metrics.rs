//! Prometheus metrics instrumentation.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `wasmq_tasks_published_total` - Tasks accepted by the validator and persisted
//! - `wasmq_tasks_claimed_total` - Successful claims handed to workers
//! - `wasmq_tasks_finished_total` - Tasks reaching a terminal state, by status
//! - `wasmq_tasks_retried_total` - Tasks returned to pending after a failure or reclaim
//!
//! ## Gauges
//! - `wasmq_queue_depth` - Audit rows by status
//!
//! ## Histograms
//! - `wasmq_task_processing_seconds` - Claim-to-completion duration in seconds
#![cfg(feature = "metrics")]

use prometheus::{
    exponential_buckets, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts,
    Registry,
};
use std::sync::LazyLock;

/// Global Prometheus registry for wasmq metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for tasks accepted and persisted.
pub static TASKS_PUBLISHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wasmq_tasks_published_total",
        "Tasks accepted by the validator and persisted",
    )
    .expect("wasmq_tasks_published_total metric creation failed")
});

/// Counter for successful claims.
pub static TASKS_CLAIMED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wasmq_tasks_claimed_total",
        "Successful claims handed to workers",
    )
    .expect("wasmq_tasks_claimed_total metric creation failed")
});

/// Counter for tasks reaching a terminal state.
///
/// Labels:
/// - `status`: `completed` or `failed`
pub static TASKS_FINISHED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "wasmq_tasks_finished_total",
        "Tasks reaching a terminal state",
    );
    IntCounterVec::new(opts, &["status"])
        .expect("wasmq_tasks_finished_total metric creation failed")
});

/// Counter for tasks returned to pending for another attempt.
pub static TASKS_RETRIED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wasmq_tasks_retried_total",
        "Tasks returned to pending after a failure or reclaim",
    )
    .expect("wasmq_tasks_retried_total metric creation failed")
});

/// Gauge for audit rows by status.
///
/// Labels:
/// - `status`: lifecycle state
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("wasmq_queue_depth", "Audit rows by status");
    GaugeVec::new(opts, &["status"]).expect("wasmq_queue_depth metric creation failed")
});

/// Histogram for claim-to-completion duration in seconds.
pub static TASK_PROCESSING_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = HistogramOpts::new(
        "wasmq_task_processing_seconds",
        "Claim-to-completion duration in seconds",
    )
    .buckets(buckets);
    Histogram::with_opts(opts).expect("wasmq_task_processing_seconds metric creation failed")
});

/// Initialize all metrics by registering them with the global registry.
///
/// Idempotent; duplicate registration attempts are ignored.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(TASKS_PUBLISHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(TASKS_CLAIMED_TOTAL.clone()),
        Box::new(TASKS_FINISHED_TOTAL.clone()),
        Box::new(TASKS_RETRIED_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(TASK_PROCESSING_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_task_published() {
    TASKS_PUBLISHED_TOTAL.inc();
}

pub fn record_task_claimed() {
    TASKS_CLAIMED_TOTAL.inc();
}

pub fn record_task_finished(status: &str) {
    TASKS_FINISHED_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_task_retried() {
    TASKS_RETRIED_TOTAL.inc();
}

pub fn set_queue_depth(status: &str, depth: f64) {
    QUEUE_DEPTH.with_label_values(&[status]).set(depth);
}

pub fn observe_processing_seconds(seconds: f64) {
    TASK_PROCESSING_SECONDS.observe(seconds);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
