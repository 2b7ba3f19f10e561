//! Value objects returned by action executors

use serde::{Deserialize, Serialize};

use crate::status::StepStatus;
use crate::JsonMap;

/// Result of an action's `execute` call
///
/// Sync actions report success or failure directly. Event-driven actions
/// set the wait marker triple: `awaiting_event`, the external workflow id
/// to bind events on, and the wait deadline in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,

    #[serde(default)]
    pub outputs: JsonMap,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub awaiting_event: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_workflow_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ActionResult {
    /// Successful sync completion
    pub fn ok(outputs: JsonMap) -> Self {
        Self {
            success: true,
            outputs,
            error: None,
            awaiting_event: false,
            external_workflow_id: None,
            timeout_seconds: None,
        }
    }

    /// Sync failure
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: JsonMap::new(),
            error: Some(error.into()),
            awaiting_event: false,
            external_workflow_id: None,
            timeout_seconds: None,
        }
    }

    /// Sync failure with preliminary outputs preserved
    pub fn fail_with_outputs(error: impl Into<String>, outputs: JsonMap) -> Self {
        Self {
            outputs,
            ..Self::fail(error)
        }
    }

    /// Event-driven wait marker
    ///
    /// The step stays RUNNING until an event for `external_workflow_id`
    /// arrives or the deadline elapses.
    pub fn awaiting(
        external_workflow_id: impl Into<String>,
        timeout_seconds: Option<u64>,
        outputs: JsonMap,
    ) -> Self {
        Self {
            success: true,
            outputs,
            error: None,
            awaiting_event: true,
            external_workflow_id: Some(external_workflow_id.into()),
            timeout_seconds,
        }
    }
}

/// What an `on_event` handler decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    /// Close the step with a final status
    Complete,

    /// Record a new step percentage; keep waiting
    UpdateProgress,

    /// Event is unrelated; no state change
    Ignore,
}

/// Result of an action's `on_event` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResult {
    pub action: EventAction,

    /// Final step status for COMPLETE (defaults to COMPLETED)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,

    /// Outputs to merge into the step's existing outputs
    #[serde(default)]
    pub outputs: JsonMap,

    /// New step percentage for UPDATE_PROGRESS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventResult {
    /// COMPLETE with status COMPLETED and outputs to merge
    pub fn completed(outputs: JsonMap) -> Self {
        Self {
            action: EventAction::Complete,
            status: Some(StepStatus::Completed),
            outputs,
            progress: None,
            error: None,
        }
    }

    /// COMPLETE with status FAILED
    pub fn failed(error: impl Into<String>, outputs: JsonMap) -> Self {
        Self {
            action: EventAction::Complete,
            status: Some(StepStatus::Failed),
            outputs,
            progress: None,
            error: Some(error.into()),
        }
    }

    /// COMPLETE with an explicit final status
    pub fn complete_with_status(status: StepStatus, outputs: JsonMap) -> Self {
        Self {
            action: EventAction::Complete,
            status: Some(status),
            outputs,
            progress: None,
            error: None,
        }
    }

    /// UPDATE_PROGRESS with a new percentage; the step keeps waiting
    pub fn update_progress(progress: f64) -> Self {
        Self {
            action: EventAction::UpdateProgress,
            status: None,
            outputs: JsonMap::new(),
            progress: Some(progress),
            error: None,
        }
    }

    /// IGNORE: the event is not relevant to this step
    pub fn ignore() -> Self {
        Self {
            action: EventAction::Ignore,
            status: None,
            outputs: JsonMap::new(),
            progress: None,
            error: None,
        }
    }
}
