// Entity models and store inputs (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use cascade_core::{DeliveryStatus, ExecutionStatus, ProgressEventType, StepStatus};

/// Maximum length persisted for `current_step_desc`
pub const STEP_DESC_MAX_LEN: usize = 500;

// ============================================
// Pipeline executions
// ============================================

/// Pipeline execution row
#[derive(Debug, Clone)]
pub struct PipelineExecution {
    pub id: Uuid,
    /// Optimistic locking version, incremented on each update
    pub version: i32,
    /// Complete pipeline DAG definition
    pub pipeline_definition: Value,
    pub initiator: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    /// Overall progress (0.00-100.00), monotonically non-decreasing
    pub progress_percentage: Decimal,
    pub final_outputs: Option<Value>,
    pub error_info: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a pipeline execution
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub id: Uuid,
    pub pipeline_definition: Value,
    pub initiator: String,
}

impl NewExecution {
    pub fn new(pipeline_definition: Value, initiator: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            pipeline_definition,
            initiator: initiator.into(),
        }
    }
}

/// Version-checked update for a pipeline execution
///
/// `None` fields are left unchanged. Progress writes are clamped to the
/// stored value so the percentage never decreases.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub status: Option<ExecutionStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress_percentage: Option<Decimal>,
    pub final_outputs: Option<Value>,
    pub error_info: Option<Value>,
}

/// Filters for listing executions
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub status: Option<ExecutionStatus>,
    pub initiator: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Matches the `name` field of the stored pipeline definition
    pub pipeline_name: Option<String>,
}

/// Page request for list queries
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.page_size as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }
}

// ============================================
// Step executions
// ============================================

/// Step execution row
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub version: i32,
    /// Step identifier from the pipeline definition
    pub step_id: String,
    pub step_name: String,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress_percentage: Decimal,
    /// Sanitized output data
    pub outputs: Option<Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    /// Execution order within the pipeline, unique per execution
    pub sequence_number: i32,
    /// Action type used to look up the executor for event routing
    pub handler_type: String,
    pub awaiting_event: bool,
    /// Set iff `awaiting_event`; unique across all awaiting steps
    pub external_workflow_id: Option<String>,
    /// Set iff `awaiting_event`
    pub event_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StepExecution {
    /// Current outputs as an object map (empty when unset)
    pub fn outputs_map(&self) -> serde_json::Map<String, Value> {
        self.outputs
            .as_ref()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// Input for materializing a step execution
#[derive(Debug, Clone)]
pub struct NewStepExecution {
    pub execution_id: Uuid,
    pub step_id: String,
    pub step_name: String,
    pub handler_type: String,
    pub sequence_number: i32,
}

/// Version-checked update for a step execution
#[derive(Debug, Clone, Default)]
pub struct StepPatch {
    pub status: Option<StepStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress_percentage: Option<Decimal>,
    pub outputs: Option<Value>,
    pub error_message: Option<String>,
    pub retry_count: Option<i32>,
    pub awaiting_event: Option<bool>,
    pub external_workflow_id: Option<String>,
    pub event_deadline: Option<DateTime<Utc>>,
}

// ============================================
// Progress events
// ============================================

/// Append-only progress event row
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub event_type: ProgressEventType,
    pub progress_percentage: Decimal,
    pub eta_seconds: Option<i32>,
    pub current_step_desc: Option<String>,
    pub event_details: Option<Value>,
    pub timestamp: DateTime<Utc>,
    /// Strictly increasing per execution, assigned by the store
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a progress event
#[derive(Debug, Clone)]
pub struct NewProgressEvent {
    pub event_type: ProgressEventType,
    pub progress_percentage: Decimal,
    pub eta_seconds: Option<i32>,
    pub current_step_desc: Option<String>,
    pub event_details: Option<Value>,
}

impl NewProgressEvent {
    pub fn workflow_progress(progress: Decimal, current_step_desc: Option<String>) -> Self {
        Self {
            event_type: ProgressEventType::WorkflowProgress,
            progress_percentage: progress,
            eta_seconds: None,
            current_step_desc: current_step_desc.map(truncate_desc),
            event_details: None,
        }
    }

    pub fn step_completed(
        progress: Decimal,
        step_id: &str,
        step_name: &str,
        duration_seconds: Option<i64>,
    ) -> Self {
        Self {
            event_type: ProgressEventType::StepCompleted,
            progress_percentage: progress,
            eta_seconds: None,
            current_step_desc: Some(truncate_desc(format!("Completed: {step_name}"))),
            event_details: Some(serde_json::json!({
                "step_id": step_id,
                "step_name": step_name,
                "duration_seconds": duration_seconds,
            })),
        }
    }

    pub fn workflow_completed(success: bool, progress: Decimal, message: Option<String>) -> Self {
        let fallback = if success { "Completed" } else { "Failed" };
        Self {
            event_type: ProgressEventType::WorkflowCompleted,
            progress_percentage: progress,
            eta_seconds: Some(0),
            current_step_desc: Some(truncate_desc(
                message.unwrap_or_else(|| fallback.to_string()),
            )),
            event_details: Some(serde_json::json!({ "success": success })),
        }
    }

    pub fn eta_update(progress: Decimal, eta_seconds: i32, reason: Option<String>) -> Self {
        Self {
            event_type: ProgressEventType::EtaUpdate,
            progress_percentage: progress,
            eta_seconds: Some(eta_seconds),
            current_step_desc: None,
            event_details: reason.map(|r| serde_json::json!({ "reason": r })),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.event_details = Some(details);
        self
    }
}

fn truncate_desc(desc: String) -> String {
    if desc.chars().count() <= STEP_DESC_MAX_LEN {
        desc
    } else {
        desc.chars().take(STEP_DESC_MAX_LEN).collect()
    }
}

// ============================================
// Subscriptions
// ============================================

/// Execution subscription row
#[derive(Debug, Clone)]
pub struct ExecutionSubscription {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub callback_topic: String,
    pub subscription_time: DateTime<Utc>,
    pub expiry_time: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_offsets() {
        let page = PageRequest::default();
        assert_eq!(page.offset(), 0);
        assert_eq!(page.limit(), 20);

        let page = PageRequest::new(3, 50);
        assert_eq!(page.offset(), 100);

        // Page numbers are 1-based; zero is clamped
        let page = PageRequest::new(0, 10);
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_step_desc_truncation() {
        let long = "x".repeat(600);
        let event = NewProgressEvent::workflow_progress(Decimal::ZERO, Some(long));
        assert_eq!(
            event.current_step_desc.unwrap().chars().count(),
            STEP_DESC_MAX_LEN
        );
    }

    #[test]
    fn test_workflow_completed_details() {
        let event = NewProgressEvent::workflow_completed(false, Decimal::ZERO, None);
        assert_eq!(event.current_step_desc.as_deref(), Some("Failed"));
        assert_eq!(
            event.event_details.unwrap()["success"],
            serde_json::json!(false)
        );
    }
}
