use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use wasmq::model::{
    ResultId, Task, TaskAudit, TaskId, TaskResult, TaskStats, TaskStatus, User, UserId,
};
use wasmq::store::{
    AuditStore, AuditWithTask, NewResult, NewTask, ResultStore, TaskStore, UserStore,
};

/// In-memory implementation of every wasmq storage capability set.
///
/// A single mutex guards all tables, so each operation is atomic exactly
/// like the single-transaction contract of the SQL store; in particular,
/// concurrent claims each win a distinct pending row.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<u64, User>,
    tasks: BTreeMap<u64, Task>,
    /// Keyed by task id; uniqueness of the audit per task by construction.
    audits: BTreeMap<u64, TaskAudit>,
    results: BTreeMap<u64, TaskResult>,
    next_user_id: u64,
    next_task_id: u64,
    next_audit_id: u64,
    next_result_id: u64,
    fail_next_result_insert: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_result` call fail, to exercise the
    /// compensating-write path in the queue engine.
    pub fn fail_next_result_insert(&self) {
        self.inner.lock().fail_next_result_insert = true;
    }

    /// Move a claimed task's `consumed_at` into the past, simulating a
    /// worker that vanished `seconds` ago.
    pub fn backdate_consumed_at(&self, task_id: TaskId, seconds: i64) {
        let mut inner = self.inner.lock();
        if let Some(audit) = inner.audits.get_mut(&task_id.0) {
            audit.consumed_at = audit
                .consumed_at
                .map(|at| at - Duration::seconds(seconds));
        }
    }

    /// Number of stored task rows.
    pub fn task_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Number of stored result rows.
    pub fn result_count(&self) -> usize {
        self.inner.lock().results.len()
    }
}

fn joined(inner: &Inner, audit: &TaskAudit) -> Option<AuditWithTask> {
    let task = inner.tasks.get(&audit.task_id.0)?.clone();
    Some(AuditWithTask {
        audit: audit.clone(),
        task,
    })
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, username: &str, password: &str) -> anyhow::Result<UserId> {
        let mut inner = self.inner.lock();
        if inner.users.values().any(|u| u.username == username) {
            anyhow::bail!("username already taken: {}", username);
        }
        inner.next_user_id += 1;
        let id = UserId(inner.next_user_id);
        let now = Utc::now();
        inner.users.insert(
            id.0,
            User {
                id,
                username: username.to_string(),
                password: password.to_string(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let inner = self.inner.lock();
        Ok(inner
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_user_by_id(&self, id: UserId) -> anyhow::Result<Option<User>> {
        Ok(self.inner.lock().users.get(&id.0).cloned())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task_with_audit(&self, task: &NewTask) -> anyhow::Result<TaskId> {
        let mut inner = self.inner.lock();
        inner.next_task_id += 1;
        inner.next_audit_id += 1;
        let task_id = TaskId(inner.next_task_id);
        let audit_id = inner.next_audit_id;
        let now = Utc::now();

        inner.tasks.insert(
            task_id.0,
            Task {
                id: task_id,
                wasm_module: task.wasm_module.clone(),
                func: task.func.clone(),
                args: task.args_json.clone(),
                created_by: task.created_by,
                created_at: now,
                updated_at: now,
            },
        );
        inner.audits.insert(
            task_id.0,
            TaskAudit {
                id: audit_id,
                task_id,
                status: TaskStatus::Pending,
                processed_by: None,
                published_at: now,
                consumed_at: None,
                completed_at: None,
                retry_count: 0,
                error_msg: String::new(),
                created_at: now,
                updated_at: now,
            },
        );

        Ok(task_id)
    }

    async fn find_task(&self, id: TaskId) -> anyhow::Result<Option<Task>> {
        Ok(self.inner.lock().tasks.get(&id.0).cloned())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn find_and_claim_pending(&self) -> anyhow::Result<Option<AuditWithTask>> {
        let mut inner = self.inner.lock();

        let oldest = inner
            .audits
            .values()
            .filter(|a| a.status == TaskStatus::Pending)
            .min_by_key(|a| (a.published_at, a.task_id))
            .map(|a| a.task_id);

        let Some(task_id) = oldest else {
            return Ok(None);
        };

        let now = Utc::now();
        let audit = inner.audits.get_mut(&task_id.0).expect("audit exists");
        audit.status = TaskStatus::Processing;
        audit.consumed_at = Some(now);
        audit.updated_at = now;
        let audit = audit.clone();

        Ok(joined(&inner, &audit))
    }

    async fn find_audit_by_task_id(
        &self,
        task_id: TaskId,
    ) -> anyhow::Result<Option<AuditWithTask>> {
        let inner = self.inner.lock();
        Ok(inner
            .audits
            .get(&task_id.0)
            .and_then(|audit| joined(&inner, audit)))
    }

    async fn mark_consumed(&self, task_id: TaskId) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(audit) = inner.audits.get_mut(&task_id.0) {
            if audit.consumed_at.is_none() {
                audit.status = TaskStatus::Processing;
                audit.consumed_at = Some(Utc::now());
                audit.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn mark_completed(&self, task_id: TaskId, processed_by: UserId) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock();
        let Some(audit) = inner.audits.get_mut(&task_id.0) else {
            return Ok(false);
        };
        if audit.status != TaskStatus::Processing {
            return Ok(false);
        }
        let now = Utc::now();
        audit.status = TaskStatus::Completed;
        audit.completed_at = Some(now);
        audit.processed_by = Some(processed_by);
        audit.updated_at = now;
        Ok(true)
    }

    async fn mark_failed(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(audit) = inner.audits.get_mut(&task_id.0) {
            audit.status = TaskStatus::Failed;
            audit.error_msg = error_msg.to_string();
            audit.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed_terminal(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(audit) = inner.audits.get_mut(&task_id.0) {
            if audit.status == TaskStatus::Processing {
                audit.status = TaskStatus::Failed;
                audit.error_msg = error_msg.to_string();
                audit.retry_count += 1;
                audit.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn reclaim(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(audit) = inner.audits.get_mut(&task_id.0) {
            audit.status = TaskStatus::Pending;
            audit.consumed_at = None;
            audit.error_msg = error_msg.to_string();
            audit.retry_count += 1;
            audit.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_stale(&self, timeout: Duration) -> anyhow::Result<Vec<AuditWithTask>> {
        let inner = self.inner.lock();
        let threshold = Utc::now() - timeout;

        let mut stale: Vec<_> = inner
            .audits
            .values()
            .filter(|a| a.status == TaskStatus::Processing)
            .filter(|a| a.consumed_at.is_some_and(|at| at < threshold))
            .filter_map(|a| joined(&inner, a))
            .collect();
        stale.sort_by_key(|row| row.audit.consumed_at);

        Ok(stale)
    }

    async fn queue_stats(&self) -> anyhow::Result<TaskStats> {
        let inner = self.inner.lock();
        Ok(count_statuses(inner.audits.values()))
    }

    async fn tenant_stats(&self, user_id: UserId) -> anyhow::Result<TaskStats> {
        let inner = self.inner.lock();
        let stats = count_statuses(inner.audits.values().filter(|a| {
            inner
                .tasks
                .get(&a.task_id.0)
                .is_some_and(|t| t.created_by == user_id)
        }));
        Ok(stats)
    }
}

fn count_statuses<'a>(audits: impl Iterator<Item = &'a TaskAudit>) -> TaskStats {
    let mut stats = TaskStats::default();
    for audit in audits {
        match audit.status {
            TaskStatus::Pending => stats.pending += 1,
            TaskStatus::Processing => stats.processing += 1,
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::Failed => stats.failed += 1,
        }
    }
    stats
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create_result(&self, result: &NewResult) -> anyhow::Result<ResultId> {
        let mut inner = self.inner.lock();
        if inner.fail_next_result_insert {
            inner.fail_next_result_insert = false;
            anyhow::bail!("injected result insert failure");
        }

        inner.next_result_id += 1;
        let id = ResultId(inner.next_result_id);
        let now = Utc::now();
        inner.results.insert(
            id.0,
            TaskResult {
                id,
                task_id: result.task_id,
                created_by: result.created_by,
                processed_by: result.processed_by,
                result: result.result_json.clone(),
                consumed: false,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn find_oldest_unconsumed_result(
        &self,
        user_id: UserId,
    ) -> anyhow::Result<Option<TaskResult>> {
        let inner = self.inner.lock();
        Ok(inner
            .results
            .values()
            .filter(|r| r.created_by == user_id && !r.consumed)
            .min_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn mark_result_consumed(&self, result_id: ResultId) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(result) = inner.results.get_mut(&result_id.0) {
            result.consumed = true;
            result.updated_at = Utc::now();
        }
        Ok(())
    }
}
