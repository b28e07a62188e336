//! wasmq - Persistent multi-tenant task queue for WASM work units.
//!
//! A foundational crate brokering WebAssembly work units between publishers
//! (task authors) and workers (executors): durable storage, delivery of each
//! task to exactly one worker at a time, automatic reclamation of abandoned
//! work, bounded retry with backoff, and result delivery back to the
//! originating tenant.
//!
//! # Core Concepts
//!
//! - **Task**: An immutable published work unit — a base64-encoded WASM
//!   binary, an entry-point export name, and a JSON argument vector.
//!   Validated structurally at publish time by [`validate::validate_task`].
//!
//! - **Audit**: The mutable lifecycle twin of a task
//!   ([`model::TaskAudit`]), moving through
//!   `pending -> processing -> completed | failed` with the single backward
//!   edge `processing -> pending` when a stale task is reclaimed.
//!
//! - **Queue engine**: [`queue::TaskQueue`] implements publish, claim,
//!   complete, fail, and the per-tenant result channel over swappable
//!   storage capability sets.
//!
//! - **Reclaim loop**: [`reclaim::ReclaimSweeper`] is the single background
//!   task that expires processing tasks past their deadline.
//!
//! - **Stores**: The [`store`] module defines the capability traits;
//!   production uses PostgreSQL, tests use the in-memory store from
//!   `wasmq-testkit`.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL persistence support via sqlx (requires database setup)
//! - `metrics` - Prometheus metrics support
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wasmq::{RetryPolicy, TaskDraft, TaskQueue, UserId};
//! use wasmq_testkit::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let queue = TaskQueue::new(store, RetryPolicy::new(3), chrono::Duration::seconds(300));
//!
//!     let publisher = UserId(1);
//!     // let task_id = queue.publish(&draft, publisher).await?;
//!     // let claimed = queue.claim().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # PostgreSQL Schema
//!
//! With the `postgres` feature the storage layer expects the four-table
//! schema from `migrations/001_initial_schema.sql`: `users`, `tasks`, the
//! one-to-one `task_audit` lifecycle table, and the per-tenant `results`
//! outbox. Claims take the oldest pending audit under
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never contend on the
//! same row.

/// Configuration structures: YAML file plus environment overrides.
///
/// The `config` module defines [`AppConfig`] and its sections, along with
/// [`PersistenceConfig`] for connection pool tuning.
pub mod config;

/// Error taxonomy for the validator and the queue engine.
pub mod error;

/// Core records and wire DTOs.
///
/// The `model` module defines the persisted entities ([`User`], [`Task`],
/// [`TaskAudit`], [`TaskResult`]), the [`TaskStatus`] lifecycle enum, the
/// identifier newtypes, and the request/response shapes exchanged with the
/// transport collaborator.
pub mod model;

/// The queue engine: publish, claim, complete, fail, result channel.
pub mod queue;

/// Stale-task reclamation: [`ShutdownToken`] and the periodic
/// [`ReclaimSweeper`].
pub mod reclaim;

/// Retry policy and backoff computation.
pub mod retry;

/// Storage capability traits and the PostgreSQL implementation.
pub mod store;

/// Tracing spans and telemetry record helpers.
pub mod telemetry;

/// Structural WASM validation performed at publish time.
pub mod validate;

#[cfg(feature = "metrics")]
/// Prometheus metrics instrumentation.
pub mod metrics;

pub use config::{AppConfig, LogFormat, PersistenceConfig};
pub use error::{QueueError, ValidationError};
pub use model::{
    ClaimedTask, ConsumedResult, ResultId, Task, TaskAudit, TaskDraft, TaskId, TaskResult,
    TaskStats, TaskStatus, User, UserId,
};
pub use queue::{SweepOutcome, TaskQueue};
pub use reclaim::{ReclaimSweeper, ShutdownToken};
pub use retry::RetryPolicy;
pub use store::{AuditStore, AuditWithTask, NewResult, NewTask, ResultStore, TaskStore, UserStore};
pub use validate::validate_task;
