use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, warn};

use crate::config::{DatabaseConfig, PersistenceConfig};
use crate::model::{
    ResultId, Task, TaskAudit, TaskId, TaskResult, TaskStats, TaskStatus, User, UserId,
};
use crate::store::{
    AuditStore, AuditWithTask, NewResult, NewTask, ResultStore, TaskStore, UserStore,
};

const AUDIT_WITH_TASK_COLUMNS: &str = r#"
    ta.id AS audit_id, ta.task_id, ta.status, ta.processed_by, ta.published_at,
    ta.consumed_at, ta.completed_at, ta.retry_count, ta.error_msg,
    ta.created_at AS audit_created_at, ta.updated_at AS audit_updated_at,
    t.wasm_module, t.func, t.args, t.created_by,
    t.created_at AS task_created_at, t.updated_at AS task_updated_at
"#;

/// Build the shared connection pool from config.
///
/// The pool is bounded with an idle timeout; it is the single shared
/// mutable resource in the process.
pub async fn connect_pool(
    database: &DatabaseConfig,
    tuning: &PersistenceConfig,
) -> anyhow::Result<PgPool> {
    let options = PgConnectOptions::new()
        .host(&database.host)
        .port(database.port)
        .username(&database.user)
        .password(&database.password)
        .database(&database.database);

    let pool = PgPoolOptions::new()
        .max_connections(tuning.max_connections)
        .min_connections(tuning.min_connections)
        .acquire_timeout(StdDuration::from_secs(tuning.acquire_timeout_seconds))
        .idle_timeout(StdDuration::from_secs(tuning.idle_timeout_seconds))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// PostgreSQL-backed implementation of every storage capability set.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_audit_with_task(
        &self,
        task_id: TaskId,
    ) -> anyhow::Result<Option<AuditWithTask>> {
        let query = format!(
            r#"
            SELECT {AUDIT_WITH_TASK_COLUMNS}
            FROM task_audit ta
            JOIN tasks t ON t.id = ta.task_id
            WHERE ta.task_id = $1
            "#,
        );

        let row = sqlx::query(&query)
            .bind(task_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_audit_with_task).transpose()
    }
}

fn map_audit_with_task(row: &PgRow) -> anyhow::Result<AuditWithTask> {
    let task_id = TaskId::from_i64(row.try_get("task_id")?);
    let status: String = row.try_get("status")?;

    let audit = TaskAudit {
        id: row.try_get::<i64, _>("audit_id")? as u64,
        task_id,
        status: status.parse()?,
        processed_by: row
            .try_get::<Option<i64>, _>("processed_by")?
            .map(UserId::from_i64),
        published_at: row.try_get("published_at")?,
        consumed_at: row.try_get("consumed_at")?,
        completed_at: row.try_get("completed_at")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        error_msg: row.try_get("error_msg")?,
        created_at: row.try_get("audit_created_at")?,
        updated_at: row.try_get("audit_updated_at")?,
    };

    let task = Task {
        id: task_id,
        wasm_module: row.try_get("wasm_module")?,
        func: row.try_get("func")?,
        args: row.try_get("args")?,
        created_by: UserId::from_i64(row.try_get("created_by")?),
        created_at: row.try_get("task_created_at")?,
        updated_at: row.try_get("task_updated_at")?,
    };

    Ok(AuditWithTask { audit, task })
}

fn map_result(row: &PgRow) -> anyhow::Result<TaskResult> {
    Ok(TaskResult {
        id: ResultId::from_i64(row.try_get("id")?),
        task_id: TaskId::from_i64(row.try_get("task_id")?),
        created_by: UserId::from_i64(row.try_get("created_by")?),
        processed_by: UserId::from_i64(row.try_get("processed_by")?),
        result: row.try_get("result")?,
        consumed: row.try_get("consumed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_user(row: &PgRow) -> anyhow::Result<User> {
    Ok(User {
        id: UserId::from_i64(row.try_get("id")?),
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn stats_from_row(row: &PgRow) -> anyhow::Result<TaskStats> {
    Ok(TaskStats {
        pending: row.try_get::<i64, _>("pending")? as u64,
        processing: row.try_get::<i64, _>("processing")? as u64,
        completed: row.try_get::<i64, _>("completed")? as u64,
        failed: row.try_get::<i64, _>("failed")? as u64,
    })
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn create_user(&self, username: &str, password: &str) -> anyhow::Result<UserId> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, password, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(username)
        .bind(password)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserId::from_i64(row.try_get("id")?))
    }

    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, password, created_at, updated_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    async fn find_user_by_id(&self, id: UserId) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, password, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }
}

#[async_trait]
impl TaskStore for PostgresStore {
    async fn create_task_with_audit(&self, task: &NewTask) -> anyhow::Result<TaskId> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO tasks (wasm_module, func, args, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(&task.wasm_module)
        .bind(&task.func)
        .bind(&task.args_json)
        .bind(task.created_by.as_i64())
        .fetch_one(&mut *tx)
        .await?;

        let task_id = TaskId::from_i64(row.try_get("id")?);

        sqlx::query(
            r#"
            INSERT INTO task_audit (
                task_id, status, published_at, retry_count, error_msg,
                created_at, updated_at
            )
            VALUES ($1, 'pending', NOW(), 0, '', NOW(), NOW())
            "#,
        )
        .bind(task_id.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(task_id = %task_id, "created task and pending audit");
        Ok(task_id)
    }

    async fn find_task(&self, id: TaskId) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query(
            r#"
            SELECT id, wasm_module, func, args, created_by, created_at, updated_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(Task {
            id: TaskId::from_i64(row.try_get("id")?),
            wasm_module: row.try_get("wasm_module")?,
            func: row.try_get("func")?,
            args: row.try_get("args")?,
            created_by: UserId::from_i64(row.try_get("created_by")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

#[async_trait]
impl AuditStore for PostgresStore {
    async fn find_and_claim_pending(&self) -> anyhow::Result<Option<AuditWithTask>> {
        let mut tx = self.pool.begin().await?;

        let selected = sqlx::query(
            r#"
            SELECT task_id
            FROM task_audit
            WHERE status = 'pending'
            ORDER BY published_at ASC, task_id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = selected else {
            drop(tx);
            return Ok(None);
        };
        let task_id = TaskId::from_i64(row.try_get("task_id")?);

        let claimed = sqlx::query(
            r#"
            UPDATE task_audit
            SET status = 'processing',
                consumed_at = NOW(),
                updated_at = NOW()
            WHERE task_id = $1
              AND status = 'pending'
            RETURNING task_id
            "#,
        )
        .bind(task_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            drop(tx);
            return Ok(None);
        }

        tx.commit().await?;

        debug!(task_id = %task_id, "claimed pending task");

        // Coherent snapshot with the task joined, read after commit.
        self.fetch_audit_with_task(task_id).await
    }

    async fn find_audit_by_task_id(
        &self,
        task_id: TaskId,
    ) -> anyhow::Result<Option<AuditWithTask>> {
        self.fetch_audit_with_task(task_id).await
    }

    async fn mark_consumed(&self, task_id: TaskId) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE task_audit
            SET status = 'processing',
                consumed_at = NOW(),
                updated_at = NOW()
            WHERE task_id = $1
              AND consumed_at IS NULL
            "#,
        )
        .bind(task_id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_completed(&self, task_id: TaskId, processed_by: UserId) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE task_audit
            SET status = 'completed',
                completed_at = NOW(),
                processed_by = $2,
                updated_at = NOW()
            WHERE task_id = $1
              AND status = 'processing'
            "#,
        )
        .bind(task_id.as_i64())
        .bind(processed_by.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn mark_failed(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE task_audit
            SET status = 'failed',
                error_msg = $2,
                updated_at = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id.as_i64())
        .bind(error_msg)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed_terminal(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE task_audit
            SET status = 'failed',
                error_msg = $2,
                retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE task_id = $1
              AND status = 'processing'
            "#,
        )
        .bind(task_id.as_i64())
        .bind(error_msg)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() > 0 {
            warn!(task_id = %task_id, "task failed terminally");
        }
        Ok(())
    }

    async fn reclaim(&self, task_id: TaskId, error_msg: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE task_audit
            SET status = 'pending',
                consumed_at = NULL,
                error_msg = $2,
                retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id.as_i64())
        .bind(error_msg)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_stale(&self, timeout: Duration) -> anyhow::Result<Vec<AuditWithTask>> {
        let threshold: DateTime<Utc> = Utc::now() - timeout;

        let query = format!(
            r#"
            SELECT {AUDIT_WITH_TASK_COLUMNS}
            FROM task_audit ta
            JOIN tasks t ON t.id = ta.task_id
            WHERE ta.status = 'processing'
              AND ta.consumed_at < $1
            ORDER BY ta.consumed_at ASC
            "#,
        );

        let rows = sqlx::query(&query)
            .bind(threshold)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_audit_with_task).collect()
    }

    async fn queue_stats(&self) -> anyhow::Result<TaskStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) FILTER (WHERE status = 'pending')    AS pending,
                   COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                   COUNT(*) FILTER (WHERE status = 'completed')  AS completed,
                   COUNT(*) FILTER (WHERE status = 'failed')     AS failed
            FROM task_audit
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        stats_from_row(&row)
    }

    async fn tenant_stats(&self, user_id: UserId) -> anyhow::Result<TaskStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) FILTER (WHERE ta.status = 'pending')    AS pending,
                   COUNT(*) FILTER (WHERE ta.status = 'processing') AS processing,
                   COUNT(*) FILTER (WHERE ta.status = 'completed')  AS completed,
                   COUNT(*) FILTER (WHERE ta.status = 'failed')     AS failed
            FROM task_audit ta
            JOIN tasks t ON t.id = ta.task_id
            WHERE t.created_by = $1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_one(&self.pool)
        .await?;

        stats_from_row(&row)
    }
}

#[async_trait]
impl ResultStore for PostgresStore {
    async fn create_result(&self, result: &NewResult) -> anyhow::Result<ResultId> {
        let row = sqlx::query(
            r#"
            INSERT INTO results (
                task_id, created_by, processed_by, result, consumed,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, FALSE, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(result.task_id.as_i64())
        .bind(result.created_by.as_i64())
        .bind(result.processed_by.as_i64())
        .bind(&result.result_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(ResultId::from_i64(row.try_get("id")?))
    }

    async fn find_oldest_unconsumed_result(
        &self,
        user_id: UserId,
    ) -> anyhow::Result<Option<TaskResult>> {
        let row = sqlx::query(
            r#"
            SELECT id, task_id, created_by, processed_by, result, consumed,
                   created_at, updated_at
            FROM results
            WHERE created_by = $1
              AND consumed = FALSE
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_result).transpose()
    }

    async fn mark_result_consumed(&self, result_id: ResultId) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE results
            SET consumed = TRUE,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(result_id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
