//! Engine error types

use uuid::Uuid;

use cascade_storage::StoreError;

/// Errors from engine operations
///
/// Per-step failures never surface here: they are recovered at the
/// execution boundary (execution FAILED, dependents SKIPPED). Validation
/// errors propagate to the caller before anything is persisted.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed pipeline definition, unknown action type, invalid params
    /// or callback topics; the execution is not created
    #[error("pipeline validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Version-conflict retries exhausted for an execution update
    #[error("version conflict persisted after {attempts} attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
