use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::QueueError;
use crate::model::{
    ClaimedTask, ConsumedResult, TaskDraft, TaskId, TaskStats, TaskStatus, UserId,
};
use crate::reclaim::ShutdownToken;
use crate::retry::{
    backoff_seconds, retry_annotation, stale_retry_annotation, stale_terminal_annotation,
    terminal_annotation, RetryPolicy,
};
use crate::store::{AuditStore, AuditWithTask, NewResult, NewTask, ResultStore, TaskStore};
use crate::telemetry;
use crate::validate::validate_task;

/// Outcome of one reclaim sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepOutcome {
    /// Stale tasks returned to pending for another attempt.
    pub reclaimed: u64,
    /// Stale tasks that exhausted their retries and failed terminally.
    pub failed: u64,
}

impl SweepOutcome {
    pub fn total(&self) -> u64 {
        self.reclaimed + self.failed
    }
}

/// The queue engine: publish, claim, complete, fail, and the result channel.
///
/// Generic over the storage capability sets so the in-memory testkit store
/// and the PostgreSQL store slot in interchangeably. All state lives in the
/// store; the engine itself is immutable and freely shareable.
pub struct TaskQueue<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<S> Clone for TaskQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            timeout: self.timeout,
        }
    }
}

impl<S> TaskQueue<S>
where
    S: TaskStore + AuditStore + ResultStore,
{
    /// Create an engine over `store` with the given retry policy and
    /// processing deadline.
    pub fn new(store: Arc<S>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            store,
            policy,
            timeout,
        }
    }

    /// Get the configured retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Get the configured processing deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Validate and persist a task; returns the assigned id.
    ///
    /// Validation failures are returned unchanged and persist nothing. The
    /// task row and its pending audit are created atomically.
    pub async fn publish(
        &self,
        draft: &TaskDraft,
        created_by: UserId,
    ) -> Result<TaskId, QueueError> {
        validate_task(&draft.wasm_module, &draft.func, &draft.args)?;

        let args_json = serde_json::to_string(&draft.args)
            .map_err(|err| QueueError::Storage(anyhow::anyhow!("serializing args: {err}")))?;

        let task_id = self
            .store
            .create_task_with_audit(&NewTask {
                wasm_module: draft.wasm_module.clone(),
                func: draft.func.clone(),
                args_json,
                created_by,
            })
            .await
            .map_err(QueueError::Storage)?;

        info!(task_id = %task_id, created_by = %created_by, func = %draft.func, "task published");
        telemetry::record_task_published();
        Ok(task_id)
    }

    /// Claim the oldest pending task for processing.
    ///
    /// Safe under concurrent callers: the storage layer hands each pending
    /// row to at most one claimant. The worker stays anonymous here;
    /// `processed_by` is recorded only at completion.
    pub async fn claim(&self) -> Result<ClaimedTask, QueueError> {
        let Some(AuditWithTask { audit, task }) = self
            .store
            .find_and_claim_pending()
            .await
            .map_err(QueueError::Storage)?
        else {
            return Err(QueueError::NoTasksAvailable);
        };

        let args = decode_json_text(&task.args)
            .map_err(|err| QueueError::Storage(anyhow::anyhow!("decoding task args: {err}")))?;

        info!(task_id = %task.id, retry_count = audit.retry_count, "task claimed");
        telemetry::record_task_claimed();

        Ok(ClaimedTask {
            id: task.id,
            wasm_module: task.wasm_module,
            func: task.func,
            args,
            created_by: task.created_by,
        })
    }

    /// Record a successful completion and enqueue the result for the
    /// publishing tenant.
    ///
    /// `created_by` is the publisher identity asserted by the caller; only
    /// the original publisher's identity may post the completion. The audit
    /// update and the result insert are two steps; if the insert fails the
    /// audit is rolled to `failed` best-effort and the original error
    /// propagates.
    pub async fn complete(
        &self,
        task_id: TaskId,
        created_by: UserId,
        processed_by: UserId,
        result: &Value,
    ) -> Result<(), QueueError> {
        let row = self.load_processing(task_id, created_by).await?;

        let updated = self
            .store
            .mark_completed(task_id, processed_by)
            .await
            .map_err(QueueError::Storage)?;
        if !updated {
            // Lost a race with the sweeper or another report.
            return Err(QueueError::TaskNotFound);
        }

        let result_json = serde_json::to_string(result)
            .map_err(|err| QueueError::Storage(anyhow::anyhow!("serializing result: {err}")))?;

        let insert = self
            .store
            .create_result(&NewResult {
                task_id,
                created_by: row.task.created_by,
                processed_by,
                result_json,
            })
            .await;

        if let Err(insert_err) = insert {
            error!(task_id = %task_id, error = %insert_err, "result insert failed, rolling audit to failed");
            if let Err(rollback_err) = self
                .store
                .mark_failed(task_id, "failed to persist completion result")
                .await
            {
                error!(task_id = %task_id, error = %rollback_err, "compensating audit update failed");
            }
            return Err(QueueError::Storage(insert_err));
        }

        info!(task_id = %task_id, processed_by = %processed_by, "task completed");
        telemetry::record_task_finished("completed");
        if let Some(consumed_at) = row.audit.consumed_at {
            let elapsed = (chrono::Utc::now() - consumed_at).num_milliseconds() as f64 / 1000.0;
            telemetry::observe_processing_seconds(elapsed.max(0.0));
        }
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Below the retry ceiling the task returns to pending with an
    /// annotated reason and is immediately eligible for re-claim; the
    /// exponential backoff is informational only. At the ceiling the task
    /// fails terminally.
    pub async fn fail(
        &self,
        task_id: TaskId,
        created_by: UserId,
        processed_by: UserId,
        error_msg: &str,
    ) -> Result<(), QueueError> {
        let row = self.load_processing(task_id, created_by).await?;
        let retry_count = row.audit.retry_count;

        if self.policy.is_exhausted(retry_count) {
            let annotation = terminal_annotation(retry_count, error_msg);
            self.store
                .mark_failed_terminal(task_id, &annotation)
                .await
                .map_err(QueueError::Storage)?;

            warn!(
                task_id = %task_id,
                processed_by = %processed_by,
                retry_count = retry_count + 1,
                "task failed terminally"
            );
            telemetry::record_task_finished("failed");
        } else {
            let backoff = backoff_seconds(retry_count);
            let annotation = retry_annotation(retry_count, self.policy.max_retries, error_msg);
            self.store
                .reclaim(task_id, &annotation)
                .await
                .map_err(QueueError::Storage)?;

            warn!(
                task_id = %task_id,
                processed_by = %processed_by,
                retry_count = retry_count + 1,
                backoff_seconds = backoff,
                "task failed, returned for retry"
            );
            telemetry::record_task_retried();
        }

        Ok(())
    }

    /// Pop the oldest unconsumed result for a tenant.
    ///
    /// Delivery is at-least-once: the consumed flip is best-effort after
    /// the payload is decoded, so a flip failure can cause redelivery on a
    /// later call, never concurrent redelivery within one.
    pub async fn consume_result(&self, user_id: UserId) -> Result<ConsumedResult, QueueError> {
        let Some(row) = self
            .store
            .find_oldest_unconsumed_result(user_id)
            .await
            .map_err(QueueError::Storage)?
        else {
            return Err(QueueError::NoTasksAvailable);
        };

        let result = decode_json_text(&row.result)
            .map_err(|err| QueueError::Storage(anyhow::anyhow!("decoding result payload: {err}")))?;

        if let Err(err) = self.store.mark_result_consumed(row.id).await {
            warn!(result_id = %row.id, error = %err, "failed to mark result consumed");
        }

        Ok(ConsumedResult {
            task_id: row.task_id,
            created_by: row.created_by,
            result,
        })
    }

    /// One sweep over stale processing tasks.
    ///
    /// Each expired row is retried or failed terminally depending on its
    /// retry count; per-row errors are logged and the sweep continues. The
    /// optional token lets the reclaim loop stop between rows.
    pub async fn reclaim_stale(
        &self,
        shutdown: Option<&ShutdownToken>,
    ) -> Result<SweepOutcome, QueueError> {
        let stale = self
            .store
            .find_stale(self.timeout)
            .await
            .map_err(QueueError::Storage)?;

        let timeout_seconds = self.timeout.num_seconds().max(0) as u64;
        let mut outcome = SweepOutcome::default();

        for row in stale {
            if shutdown.is_some_and(ShutdownToken::is_cancelled) {
                break;
            }

            let task_id = row.audit.task_id;
            let retry_count = row.audit.retry_count;

            let step = if self.policy.is_exhausted(retry_count) {
                let annotation = stale_terminal_annotation(retry_count, timeout_seconds);
                self.store
                    .mark_failed_terminal(task_id, &annotation)
                    .await
                    .map(|()| {
                        outcome.failed += 1;
                        telemetry::record_task_finished("failed");
                    })
            } else {
                let annotation = stale_retry_annotation(timeout_seconds);
                self.store.reclaim(task_id, &annotation).await.map(|()| {
                    outcome.reclaimed += 1;
                    telemetry::record_task_retried();
                })
            };

            if let Err(err) = step {
                error!(task_id = %task_id, error = %err, "failed to expire stale task");
            }
        }

        Ok(outcome)
    }

    /// Queue-wide counts by status for the health collaborator.
    pub async fn queue_stats(&self) -> Result<TaskStats, QueueError> {
        self.store.queue_stats().await.map_err(QueueError::Storage)
    }

    /// Per-tenant counts by status for the dashboard collaborator.
    pub async fn tenant_stats(&self, user_id: UserId) -> Result<TaskStats, QueueError> {
        self.store
            .tenant_stats(user_id)
            .await
            .map_err(QueueError::Storage)
    }

    /// Load an audit for a worker report, enforcing publisher authorization
    /// and the processing-only transition guard.
    async fn load_processing(
        &self,
        task_id: TaskId,
        created_by: UserId,
    ) -> Result<AuditWithTask, QueueError> {
        let Some(row) = self
            .store
            .find_audit_by_task_id(task_id)
            .await
            .map_err(QueueError::Storage)?
        else {
            return Err(QueueError::TaskNotFound);
        };

        if row.task.created_by != created_by {
            return Err(QueueError::InvalidCreatedBy);
        }
        if row.audit.status != TaskStatus::Processing {
            // Terminal states are absorbing, and pending rows have no
            // attempt to report on.
            return Err(QueueError::TaskNotFound);
        }

        Ok(row)
    }
}

/// Decode persisted JSON text; empty text is the null value.
fn decode_json_text(text: &str) -> serde_json::Result<Value> {
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_text_decodes_to_null() {
        assert_eq!(decode_json_text("").unwrap(), Value::Null);
        assert_eq!(decode_json_text("5").unwrap(), Value::from(5));
        assert!(decode_json_text("{").is_err());
    }

    #[test]
    fn sweep_outcome_totals() {
        let outcome = SweepOutcome {
            reclaimed: 2,
            failed: 1,
        };
        assert_eq!(outcome.total(), 3);
    }
}
