//! Storage capability sets shared by the queue engine and the reclaim loop.
//!
//! Each layer — users, tasks, audits, results — is defined by the
//! operations it exposes, so implementations swap freely: the in-memory
//! store in `wasmq-testkit` for tests, [`postgres::PostgresStore`] in
//! production. Every method is a single logical transaction against the
//! backing store; errors carry backend context and surface opaque.

use async_trait::async_trait;
use chrono::Duration;

use crate::model::{
    ResultId, Task, TaskAudit, TaskId, TaskResult, TaskStats, User, UserId,
};

#[cfg(feature = "postgres")]
pub mod postgres;

/// An audit row with its immutable task joined, as returned by claim and
/// lookup operations.
#[derive(Clone, Debug)]
pub struct AuditWithTask {
    pub audit: TaskAudit,
    pub task: Task,
}

/// Insert payload for an atomic publish.
#[derive(Clone, Debug)]
pub struct NewTask {
    pub wasm_module: String,
    pub func: String,
    /// Argument vector already serialized to JSON text.
    pub args_json: String,
    pub created_by: UserId,
}

/// Insert payload for a completion outbox entry.
#[derive(Clone, Debug)]
pub struct NewResult {
    pub task_id: TaskId,
    pub created_by: UserId,
    pub processed_by: UserId,
    /// Worker payload already serialized to JSON text.
    pub result_json: String,
}

/// Identity principal storage consumed by the auth collaborator.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; `password` is an opaque verifier, hashed upstream.
    async fn create_user(&self, username: &str, password: &str) -> anyhow::Result<UserId>;

    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;

    async fn find_user_by_id(&self, id: UserId) -> anyhow::Result<Option<User>>;
}

/// Immutable work-unit storage.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert the task and its pending audit row atomically; either both
    /// rows exist afterwards or neither does.
    async fn create_task_with_audit(&self, task: &NewTask) -> anyhow::Result<TaskId>;

    async fn find_task(&self, id: TaskId) -> anyhow::Result<Option<Task>>;
}

/// Mutable lifecycle storage over the task-audit table.
///
/// Mutations that read-then-write a row use row-level locking or a
/// conditional predicate; see each method.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Atomically select the oldest pending audit (by `published_at`, then
    /// task id), flip it to processing with `consumed_at = now`, and return
    /// a coherent snapshot with the task joined. Safe under concurrent
    /// callers: each pending row is won by at most one claimant.
    async fn find_and_claim_pending(&self) -> anyhow::Result<Option<AuditWithTask>>;

    async fn find_audit_by_task_id(&self, task_id: TaskId)
        -> anyhow::Result<Option<AuditWithTask>>;

    /// Flip to processing and stamp `consumed_at`, only if `consumed_at`
    /// is currently null.
    async fn mark_consumed(&self, task_id: TaskId) -> anyhow::Result<()>;

    /// Record completion: status, `completed_at`, and the worker identity.
    /// Guarded on the row still being in processing; returns `false` when
    /// the guard did not match.
    async fn mark_completed(&self, task_id: TaskId, processed_by: UserId) -> anyhow::Result<bool>;

    /// Unconditional terminal failure preserving `retry_count`. Used for
    /// the compensating write after a result-insert failure.
    async fn mark_failed(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()>;

    /// Terminal failure that counts the final attempt: increments
    /// `retry_count` alongside the status flip. Guarded on processing.
    async fn mark_failed_terminal(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()>;

    /// Return a processing row to pending: clears `consumed_at`, records
    /// the reason, increments `retry_count`.
    async fn reclaim(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()>;

    /// Processing audits whose `consumed_at` is older than `now - timeout`.
    async fn find_stale(&self, timeout: Duration) -> anyhow::Result<Vec<AuditWithTask>>;

    /// Queue-wide counts by status.
    async fn queue_stats(&self) -> anyhow::Result<TaskStats>;

    /// Counts by status for one publishing tenant.
    async fn tenant_stats(&self, user_id: UserId) -> anyhow::Result<TaskStats>;
}

/// Durable per-tenant completion outbox.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create_result(&self, result: &NewResult) -> anyhow::Result<ResultId>;

    /// Oldest unconsumed entry for the tenant, FIFO by creation time.
    async fn find_oldest_unconsumed_result(
        &self,
        user_id: UserId,
    ) -> anyhow::Result<Option<TaskResult>>;

    async fn mark_result_consumed(&self, result_id: ResultId) -> anyhow::Result<()>;
}
