//! Integration tests for the PostgreSQL store: claim ordering under
//! `FOR UPDATE SKIP LOCKED`, the `consumed_at IS NULL` guard, and the
//! retry ceiling.
//!
//! Requires a running Postgres instance with the wasmq schema applied.
//! Run with: `cargo test --test postgres_queue --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use sqlx::PgPool;
use wasmq::store::postgres::PostgresStore;
use wasmq::store::{AuditStore, UserStore};
use wasmq::{QueueError, RetryPolicy, TaskDraft, TaskQueue, TaskStatus, UserId};
use wasmq_testkit::{add_i32_module, module_base64};

async fn connect() -> PgPool {
    PgPool::connect(&std::env::var("DATABASE_URL").expect("DATABASE_URL required"))
        .await
        .expect("connect")
}

fn draft() -> TaskDraft {
    TaskDraft {
        wasm_module: module_base64(&add_i32_module()),
        func: "add".to_string(),
        args: json!([2, 3]),
    }
}

/// Usernames are unique; suffix them so reruns do not collide.
fn unique(name: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{name}-{nanos}")
}

async fn cleanup(pool: &PgPool, user_id: UserId) {
    // tasks cascade into task_audit and results
    sqlx::query("DELETE FROM tasks WHERE created_by = $1")
        .bind(user_id.as_i64())
        .execute(pool)
        .await
        .ok();
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id.as_i64())
        .execute(pool)
        .await
        .ok();
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn publish_claim_complete_consume_roundtrip() {
    let pool = connect().await;
    let store = Arc::new(PostgresStore::new(pool.clone()));

    let publisher = store
        .create_user(&unique("pg-publisher"), "verifier")
        .await
        .expect("create publisher");
    let worker = store
        .create_user(&unique("pg-worker"), "verifier")
        .await
        .expect("create worker");

    let queue = TaskQueue::new(
        Arc::clone(&store),
        RetryPolicy::new(3),
        Duration::seconds(300),
    );

    let task_id = queue.publish(&draft(), publisher).await.expect("publish");

    let claimed = queue.claim().await.expect("claim");
    assert_eq!(claimed.id, task_id);
    assert_eq!(claimed.args, json!([2, 3]));
    assert_eq!(claimed.created_by, publisher);

    queue
        .complete(task_id, publisher, worker, &json!(5))
        .await
        .expect("complete");

    let result = queue.consume_result(publisher).await.expect("consume");
    assert_eq!(result.result, json!(5));
    assert!(matches!(
        queue.consume_result(publisher).await,
        Err(QueueError::NoTasksAvailable)
    ));

    cleanup(&pool, publisher).await;
    cleanup(&pool, worker).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn claim_hands_out_oldest_published_first() {
    let pool = connect().await;
    let store = Arc::new(PostgresStore::new(pool.clone()));

    let publisher = store
        .create_user(&unique("pg-fifo"), "verifier")
        .await
        .expect("create publisher");
    let queue = TaskQueue::new(
        Arc::clone(&store),
        RetryPolicy::new(3),
        Duration::seconds(300),
    );

    let first = queue.publish(&draft(), publisher).await.expect("publish 1");
    let second = queue.publish(&draft(), publisher).await.expect("publish 2");

    assert_eq!(queue.claim().await.expect("claim 1").id, first);
    assert_eq!(queue.claim().await.expect("claim 2").id, second);

    cleanup(&pool, publisher).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn mark_consumed_guard_does_not_restamp() {
    let pool = connect().await;
    let store = Arc::new(PostgresStore::new(pool.clone()));

    let publisher = store
        .create_user(&unique("pg-guard"), "verifier")
        .await
        .expect("create publisher");
    let queue = TaskQueue::new(
        Arc::clone(&store),
        RetryPolicy::new(3),
        Duration::seconds(300),
    );

    let task_id = queue.publish(&draft(), publisher).await.expect("publish");
    queue.claim().await.expect("claim");

    let before = store
        .find_audit_by_task_id(task_id)
        .await
        .expect("lookup")
        .expect("audit exists")
        .audit;
    let stamped = before.consumed_at.expect("claim stamped consumed_at");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    store.mark_consumed(task_id).await.expect("mark_consumed");

    let after = store
        .find_audit_by_task_id(task_id)
        .await
        .expect("lookup")
        .expect("audit exists")
        .audit;
    assert_eq!(after.consumed_at, Some(stamped), "guarded update must not restamp");

    cleanup(&pool, publisher).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn fail_at_ceiling_is_terminal() {
    let pool = connect().await;
    let store = Arc::new(PostgresStore::new(pool.clone()));

    let publisher = store
        .create_user(&unique("pg-ceiling"), "verifier")
        .await
        .expect("create publisher");
    let worker = store
        .create_user(&unique("pg-ceiling-worker"), "verifier")
        .await
        .expect("create worker");
    let queue = TaskQueue::new(
        Arc::clone(&store),
        RetryPolicy::new(1),
        Duration::seconds(300),
    );

    let task_id = queue.publish(&draft(), publisher).await.expect("publish");

    queue.claim().await.expect("claim 1");
    queue
        .fail(task_id, publisher, worker, "boom")
        .await
        .expect("fail 1");

    queue.claim().await.expect("claim 2");
    queue
        .fail(task_id, publisher, worker, "boom")
        .await
        .expect("fail 2");

    let audit = store
        .find_audit_by_task_id(task_id)
        .await
        .expect("lookup")
        .expect("audit exists")
        .audit;
    assert_eq!(audit.status, TaskStatus::Failed);
    assert_eq!(audit.retry_count, 2);
    assert!(audit.error_msg.contains("after 2 retries"));

    cleanup(&pool, publisher).await;
    cleanup(&pool, worker).await;
}
