use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Identifier of a registered tenant principal.
///
/// Identifiers are dense 64-bit integers assigned by the store.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Identifier of a published task.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

/// Identifier of a result outbox entry.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ResultId(pub u64);

macro_rules! impl_id {
    ($ty:ident) => {
        impl $ty {
            /// Convert to the signed representation used at the SQL boundary.
            pub fn as_i64(self) -> i64 {
                self.0 as i64
            }

            /// Convert from the signed representation used at the SQL boundary.
            pub fn from_i64(value: i64) -> Self {
                Self(value as u64)
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

impl_id!(UserId);
impl_id!(TaskId);
impl_id!(ResultId);

/// Lifecycle states of a task audit record.
///
/// `Completed` and `Failed` are terminal and absorbing; the only backward
/// edge is `Processing -> Pending` when a stale task is reclaimed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Published and waiting to be claimed.
    Pending,
    /// Claimed by a worker; `consumed_at` holds the claim time.
    Processing,
    /// Worker reported success; a result row exists.
    Completed,
    /// Retries exhausted or unrecoverable failure.
    Failed,
}

impl TaskStatus {
    /// Get the wire/storage representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// `true` for absorbing states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(anyhow::anyhow!("unknown task status: {}", other)),
        }
    }
}

/// Identity principal. Immutable after creation as far as the queue core
/// is concerned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Opaque password verifier; never serialized outward.
    #[serde(skip_serializing)]
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The immutable published work unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Base64 text of the compiled WASM binary.
    pub wasm_module: String,
    /// Entry-point export name.
    pub func: String,
    /// JSON-encoded argument vector, as persisted.
    pub args: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The mutable lifecycle record, one-to-one with [`Task`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskAudit {
    pub id: u64,
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Worker recorded at completion; null while in flight.
    pub processed_by: Option<UserId>,
    pub published_at: DateTime<Utc>,
    /// Time of the last claim; cleared only by reclaim.
    pub consumed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Past attempts that ended in fail or reclaim.
    pub retry_count: u32,
    /// Last failure reason.
    pub error_msg: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable outbox entry holding a completion payload for its tenant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: ResultId,
    pub task_id: TaskId,
    pub created_by: UserId,
    pub processed_by: UserId,
    /// Opaque JSON text from the worker.
    pub result: String,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Publish input as received from the transport collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDraft {
    pub wasm_module: String,
    pub func: String,
    /// Argument vector; `null` means the empty sequence.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Snapshot handed to a worker on a successful claim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimedTask {
    pub id: TaskId,
    pub wasm_module: String,
    pub func: String,
    pub args: serde_json::Value,
    pub created_by: UserId,
}

/// Completion payload handed back to the publishing tenant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsumedResult {
    pub task_id: TaskId,
    pub created_by: UserId,
    pub result: serde_json::Value,
}

/// Aggregate task counts by status, per tenant or queue-wide.
///
/// Consumed by the external health and dashboard collaborators.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl TaskStats {
    /// Total number of tracked tasks.
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}
