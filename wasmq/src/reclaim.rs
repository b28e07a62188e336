use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::queue::TaskQueue;
use crate::store::{AuditStore, ResultStore, TaskStore};

/// Token for signaling graceful shutdown to background tasks.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// Create a new shutdown token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic background sweeper that expires stale processing tasks.
///
/// A single sweeper task owns the reclaim loop for the lifetime of the
/// process. Running more than one process is safe but duplicates sweep
/// work. The loop observes its cancellation token between ticks and
/// between rows, so shutdown is bounded by one storage round-trip.
pub struct ReclaimSweeper<S> {
    queue: TaskQueue<S>,
    interval: Duration,
    shutdown: ShutdownToken,
}

impl<S> ReclaimSweeper<S>
where
    S: TaskStore + AuditStore + ResultStore + Send + Sync + 'static,
{
    pub fn new(queue: TaskQueue<S>, interval: Duration, shutdown: ShutdownToken) -> Self {
        Self {
            queue,
            interval,
            shutdown,
        }
    }

    /// Spawn the sweeper onto the runtime, returning its join handle.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the sweep loop: once at startup, then on every interval tick
    /// until cancelled.
    pub async fn run(self) {
        info!(
            interval_seconds = self.interval.as_secs(),
            "stale task sweeper started"
        );

        self.sweep_once().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("stale task sweeper stopped");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    async fn sweep_once(&self) {
        match self.queue.reclaim_stale(Some(&self.shutdown)).await {
            Ok(outcome) if outcome.total() > 0 => {
                info!(
                    reclaimed = outcome.reclaimed,
                    failed = outcome.failed,
                    "expired stale tasks"
                );
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "stale task sweep failed");
            }
        }
    }
}
