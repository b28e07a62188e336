use serde::{Deserialize, Serialize};

/// Retry policy applied to failed and reclaimed tasks.
///
/// `max_retries` counts attempts after the first; a task is tried at most
/// `max_retries + 1` times in total.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// `true` once no further attempts remain for the given retry count.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Informational backoff for the next attempt: `2^retry_count` seconds.
///
/// The value is recorded, not enforced; a reclaimed task is immediately
/// eligible for re-claim and worker polling cadence provides the pacing.
pub fn backoff_seconds(retry_count: u32) -> u64 {
    1u64 << retry_count.min(62)
}

/// Annotation persisted when a failed task is returned for retry.
pub fn retry_annotation(retry_count: u32, max_retries: u32, error_msg: &str) -> String {
    format!(
        "Task failed (attempt {}/{}): {}. Will retry after backoff.",
        retry_count + 1,
        max_retries + 1,
        error_msg
    )
}

/// Annotation persisted when a failed task exhausts its retries.
pub fn terminal_annotation(retry_count: u32, error_msg: &str) -> String {
    format!("Task failed after {} retries: {}", retry_count + 1, error_msg)
}

/// Annotation persisted when the sweeper returns a stale task for retry.
pub fn stale_retry_annotation(timeout_seconds: u64) -> String {
    format!(
        "Task timed out (exceeded {} seconds), reclaiming for retry",
        timeout_seconds
    )
}

/// Annotation persisted when the sweeper expires a stale task for good.
pub fn stale_terminal_annotation(retry_count: u32, timeout_seconds: u64) -> String {
    format!(
        "Task timed out after {} retries (exceeded {} seconds)",
        retry_count + 1,
        timeout_seconds
    )
}
