//! Stale-task sweeping: reclaim-for-retry, terminal expiry, and the
//! background sweeper's shutdown behavior.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde_json::json;
use tokio::time::timeout;
use wasmq::store::{AuditStore, UserStore};
use wasmq::{QueueError, ReclaimSweeper, RetryPolicy, ShutdownToken, TaskDraft, TaskQueue, TaskStatus, UserId};
use wasmq_testkit::{add_i32_module, module_base64, MemoryStore};

fn draft() -> TaskDraft {
    TaskDraft {
        wasm_module: module_base64(&add_i32_module()),
        func: "add".to_string(),
        args: json!([2, 3]),
    }
}

async fn setup(max_retries: u32) -> (Arc<MemoryStore>, TaskQueue<MemoryStore>, UserId, UserId) {
    let store = Arc::new(MemoryStore::new());
    let publisher = store.create_user("publisher", "verifier").await.unwrap();
    let worker = store.create_user("worker", "verifier").await.unwrap();
    let queue = TaskQueue::new(
        Arc::clone(&store),
        RetryPolicy::new(max_retries),
        Duration::seconds(30),
    );
    (store, queue, publisher, worker)
}

#[tokio::test]
async fn stale_task_is_reclaimed_for_retry() {
    let (store, queue, publisher, _worker) = setup(3).await;

    let task_id = queue.publish(&draft(), publisher).await.unwrap();
    queue.claim().await.unwrap();

    // Worker vanishes; the claim is now past the 30s deadline.
    store.backdate_consumed_at(task_id, 60);

    let outcome = queue.reclaim_stale(None).await.unwrap();
    assert_eq!(outcome.reclaimed, 1);
    assert_eq!(outcome.failed, 0);

    let audit = store
        .find_audit_by_task_id(task_id)
        .await
        .unwrap()
        .unwrap()
        .audit;
    assert_eq!(audit.status, TaskStatus::Pending);
    assert_eq!(audit.retry_count, 1);
    assert!(audit.consumed_at.is_none());
    assert!(audit.error_msg.contains("timed out"));
    assert!(audit.error_msg.contains("reclaiming for retry"));

    // The same task is claimable again.
    assert_eq!(queue.claim().await.unwrap().id, task_id);
}

#[tokio::test]
async fn fresh_claims_are_not_swept() {
    let (store, queue, publisher, _worker) = setup(3).await;

    let task_id = queue.publish(&draft(), publisher).await.unwrap();
    queue.claim().await.unwrap();

    let outcome = queue.reclaim_stale(None).await.unwrap();
    assert_eq!(outcome.total(), 0);

    let audit = store
        .find_audit_by_task_id(task_id)
        .await
        .unwrap()
        .unwrap()
        .audit;
    assert_eq!(audit.status, TaskStatus::Processing);
}

#[tokio::test]
async fn completed_tasks_are_never_stale() {
    let (store, queue, publisher, worker) = setup(3).await;

    let task_id = queue.publish(&draft(), publisher).await.unwrap();
    queue.claim().await.unwrap();
    queue
        .complete(task_id, publisher, worker, &json!(5))
        .await
        .unwrap();
    store.backdate_consumed_at(task_id, 3600);

    let outcome = queue.reclaim_stale(None).await.unwrap();
    assert_eq!(outcome.total(), 0);
}

#[tokio::test]
async fn exhausted_stale_task_fails_terminally() {
    let (store, queue, publisher, _worker) = setup(1).await;

    let task_id = queue.publish(&draft(), publisher).await.unwrap();

    // First expiry: below the ceiling, reclaimed for retry.
    queue.claim().await.unwrap();
    store.backdate_consumed_at(task_id, 60);
    let outcome = queue.reclaim_stale(None).await.unwrap();
    assert_eq!(outcome.reclaimed, 1);

    // Second expiry: retry_count == max_retries, expired for good.
    queue.claim().await.unwrap();
    store.backdate_consumed_at(task_id, 60);
    let outcome = queue.reclaim_stale(None).await.unwrap();
    assert_eq!(outcome.failed, 1);

    let audit = store
        .find_audit_by_task_id(task_id)
        .await
        .unwrap()
        .unwrap()
        .audit;
    assert_eq!(audit.status, TaskStatus::Failed);
    assert_eq!(audit.retry_count, 2);
    assert!(audit.error_msg.contains("after 2 retries"));
    assert!(audit.error_msg.contains("exceeded 30 seconds"));

    assert!(matches!(
        queue.claim().await,
        Err(QueueError::NoTasksAvailable)
    ));
}

#[tokio::test]
async fn sweeper_reclaims_on_startup_and_stops_on_cancel() {
    let (store, queue, publisher, _worker) = setup(3).await;

    let task_id = queue.publish(&draft(), publisher).await.unwrap();
    queue.claim().await.unwrap();
    store.backdate_consumed_at(task_id, 60);

    let shutdown = ShutdownToken::new();
    let sweeper = ReclaimSweeper::new(
        queue.clone(),
        StdDuration::from_millis(50),
        shutdown.clone(),
    );
    let handle = sweeper.spawn();

    // The initial sweep runs before the first tick.
    timeout(StdDuration::from_secs(5), async {
        loop {
            let audit = store
                .find_audit_by_task_id(task_id)
                .await
                .unwrap()
                .unwrap()
                .audit;
            if audit.status == TaskStatus::Pending {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await
    .expect("sweeper did not reclaim the stale task within 5 seconds");

    shutdown.cancel();
    timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("sweeper did not stop within 5 seconds")
        .expect("sweeper task panicked");
}
