//! Tracing and telemetry instrumentation.
//!
//! Span constructors for the queue lifecycle plus record helpers that log
//! through `tracing` and, when the `metrics` feature is enabled, forward to
//! the Prometheus registry in [`crate::metrics`]. Everything here is a
//! cheap no-op-ish call when the feature is off.

use tracing::{info_span, Span};

use crate::config::LogFormat;

/// Install the global tracing subscriber.
///
/// Honours `RUST_LOG` for filtering and emits JSON or human-readable text
/// per the configured format (the `LOG_FORMAT` override). Safe to call more
/// than once; later calls are ignored.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Create a tracing span for a publish operation.
#[must_use]
pub fn task_publish_span(created_by: u64) -> Span {
    info_span!("wasmq.publish", created_by = created_by)
}

/// Create a tracing span for a claim attempt.
///
/// The claimed task id, if any, is recorded by the handler after the fact;
/// workers are anonymous at claim time.
#[must_use]
pub fn task_claim_span() -> Span {
    info_span!("wasmq.claim", task_id = tracing::field::Empty)
}

/// Create a tracing span for a completion report.
#[must_use]
pub fn task_complete_span(task_id: u64, processed_by: u64) -> Span {
    info_span!("wasmq.complete", task_id = task_id, processed_by = processed_by)
}

/// Create a tracing span for a failure report.
#[must_use]
pub fn task_fail_span(task_id: u64) -> Span {
    info_span!("wasmq.fail", task_id = task_id)
}

/// Create a tracing span for a result-channel pop.
#[must_use]
pub fn result_consume_span(created_by: u64) -> Span {
    info_span!("wasmq.consume_result", created_by = created_by)
}

/// Create a tracing span for one reclaim sweep.
#[must_use]
pub fn sweep_span() -> Span {
    info_span!("wasmq.sweep")
}

/// Record a published task.
pub fn record_task_published() {
    #[cfg(feature = "metrics")]
    crate::metrics::record_task_published();
}

/// Record a successful claim.
pub fn record_task_claimed() {
    #[cfg(feature = "metrics")]
    crate::metrics::record_task_claimed();
}

/// Record a task reaching a terminal state (`completed` or `failed`).
pub fn record_task_finished(status: &str) {
    #[cfg(feature = "metrics")]
    crate::metrics::record_task_finished(status);
    #[cfg(not(feature = "metrics"))]
    let _ = status;
}

/// Record a task returned to pending for another attempt.
pub fn record_task_retried() {
    #[cfg(feature = "metrics")]
    crate::metrics::record_task_retried();
}

/// Observe one task's claim-to-completion duration.
pub fn observe_processing_seconds(seconds: f64) {
    tracing::debug!(processing_seconds = seconds, "task processing duration");

    #[cfg(feature = "metrics")]
    crate::metrics::observe_processing_seconds(seconds);
}

/// Update the queue depth gauge for one status.
pub fn set_queue_depth(status: &str, depth: u64) {
    tracing::debug!(status = status, depth = depth, "queue depth updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(status, depth as f64);
}
