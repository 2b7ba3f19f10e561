//! PipelineStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use cascade_core::{DeliveryStatus, StepStatus};

use crate::models::*;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Step not found
    #[error("step not found: {0}")]
    StepNotFound(Uuid),

    /// Subscription not found
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    /// Optimistic locking failed: the row's version moved on
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i32, actual: i32 },

    /// A uniqueness invariant would be violated
    #[error("duplicate {field}: {value}")]
    Duplicate { field: &'static str, value: String },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether this is an optimistic-lock conflict callers may retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Durable store for executions, steps, progress events and subscriptions
///
/// Every updating method takes the version the caller read earlier and
/// raises [`StoreError::VersionConflict`] on mismatch; on success the
/// stored version is incremented and returned. Implementations must be
/// thread-safe and keep `progress_percentage` monotone per row.
#[async_trait]
pub trait PipelineStore: Send + Sync + 'static {
    // =========================================================================
    // Pipeline executions
    // =========================================================================

    async fn create_execution(&self, new: NewExecution) -> Result<PipelineExecution, StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<Option<PipelineExecution>, StoreError>;

    /// Filtered, newest-first page plus the total match count
    async fn list_executions(
        &self,
        filter: ExecutionFilter,
        page: PageRequest,
    ) -> Result<(Vec<PipelineExecution>, u64), StoreError>;

    /// Version-checked update; returns the new version
    async fn update_execution(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: ExecutionPatch,
    ) -> Result<i32, StoreError>;

    /// Returns false when the execution did not exist (idempotent delete)
    async fn delete_execution(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Terminal executions created before the cutoff, oldest first
    async fn list_expired_executions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError>;

    // =========================================================================
    // Step executions
    // =========================================================================

    /// Materialize the step rows for an execution
    async fn insert_steps(
        &self,
        steps: Vec<NewStepExecution>,
    ) -> Result<Vec<StepExecution>, StoreError>;

    async fn get_step(&self, id: Uuid) -> Result<Option<StepExecution>, StoreError>;

    /// Steps of an execution ordered by sequence number
    async fn get_steps_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError>;

    /// Version-checked update; returns the new version
    ///
    /// Setting `awaiting_event` with an `external_workflow_id` that another
    /// awaiting step already holds is a [`StoreError::Duplicate`].
    async fn update_step(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: StepPatch,
    ) -> Result<i32, StoreError>;

    /// The step currently awaiting an event for this external workflow id
    async fn get_step_by_external_workflow_id(
        &self,
        external_workflow_id: &str,
    ) -> Result<Option<StepExecution>, StoreError>;

    async fn get_awaiting_steps_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError>;

    /// Awaiting steps whose event deadline has elapsed
    async fn list_awaiting_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StepExecution>, StoreError>;

    /// Close an awaiting step from the event router or timeout scheduler:
    /// sets the final status and outputs, stamps `end_time` and clears the
    /// wait marker. Returns the new version.
    async fn complete_step_from_event(
        &self,
        id: Uuid,
        expected_version: i32,
        status: StepStatus,
        outputs: Value,
        error_message: Option<String>,
    ) -> Result<i32, StoreError>;

    async fn delete_steps_for_execution(&self, execution_id: Uuid) -> Result<u64, StoreError>;

    // =========================================================================
    // Progress events
    // =========================================================================

    /// Append an event, atomically assigning the next per-execution
    /// sequence number
    async fn append_progress_event(
        &self,
        execution_id: Uuid,
        event: NewProgressEvent,
    ) -> Result<ProgressEvent, StoreError>;

    /// Events in sequence order, optionally limited
    async fn list_progress_events(
        &self,
        execution_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<ProgressEvent>, StoreError>;

    /// The most recent `limit` events, returned in chronological order
    async fn recent_progress_events(
        &self,
        execution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ProgressEvent>, StoreError>;

    async fn count_progress_events(&self, execution_id: Uuid) -> Result<u64, StoreError>;

    async fn delete_progress_events_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<u64, StoreError>;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Batch-insert subscriptions with `delivery_status = active`
    ///
    /// Topics already subscribed for this execution are skipped, making
    /// the call idempotent. Returns the created rows.
    async fn insert_subscriptions(
        &self,
        execution_id: Uuid,
        topics: &[String],
        expiry_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExecutionSubscription>, StoreError>;

    async fn list_subscriptions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<ExecutionSubscription>, StoreError>;

    async fn get_active_topics(&self, execution_id: Uuid) -> Result<Vec<String>, StoreError>;

    async fn set_delivery_status(
        &self,
        subscription_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<(), StoreError>;

    async fn delete_subscriptions_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<u64, StoreError>;
}
