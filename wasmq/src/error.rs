use thiserror::Error;

/// Rejections produced by structural WASM validation at publish time.
///
/// These are user errors and are returned to the publisher verbatim.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid base64 encoding for WASM module: {0}")]
    InvalidBase64(String),

    #[error("invalid WASM module: {0}")]
    InvalidWasm(String),

    #[error("function '{func}' is not exported. Available exported functions: {available:?}")]
    FunctionNotExported {
        func: String,
        available: Vec<String>,
    },

    #[error("function arguments do not match signature: {0}")]
    InvalidFunctionArgs(String),
}

/// Errors surfaced by the queue engine to its collaborators.
///
/// `NoTasksAvailable` and `TaskNotFound` map to 404 at the transport,
/// `InvalidCreatedBy` to 403, `Validation` to 400; `Storage` stays opaque.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no tasks available")]
    NoTasksAvailable,

    #[error("task not found")]
    TaskNotFound,

    #[error("created_by does not match task record")]
    InvalidCreatedBy,

    #[error("task validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Storage(err)
    }
}
