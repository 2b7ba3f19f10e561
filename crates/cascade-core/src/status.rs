//! Status vocabulary shared by the engine, the stores and the routers
//!
//! Status strings match the persisted column values: execution and step
//! statuses are stored uppercase, progress event types and delivery
//! statuses lowercase.

use serde::{Deserialize, Serialize};

/// Status of a pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Execution created but no step has started
    Pending,

    /// At least one step has been dispatched
    Running,

    /// Every non-skipped step ended successfully
    Completed,

    /// At least one step failed or timed out
    Failed,

    /// Stopped by operator action
    Interrupted,
}

impl ExecutionStatus {
    /// Terminal statuses carry an `end_time` and are never mutated again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Interrupted => "INTERRUPTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "INTERRUPTED" => Some(Self::Interrupted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,

    /// Dispatched; event-driven steps stay RUNNING while awaiting
    Running,

    Completed,

    Failed,

    /// Never dispatched: unmatched branch or failed/skipped upstream
    Skipped,

    /// Event-wait deadline elapsed
    Timeout,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Timeout
        )
    }

    /// Statuses that count against the execution (FAILED aggregation rule)
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "SKIPPED" => Some(Self::Skipped),
            "TIMEOUT" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of an append-only progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    WorkflowProgress,
    StepCompleted,
    EtaUpdate,
    WorkflowCompleted,
}

impl ProgressEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowProgress => "workflow_progress",
            Self::StepCompleted => "step_completed",
            Self::EtaUpdate => "eta_update",
            Self::WorkflowCompleted => "workflow_completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workflow_progress" => Some(Self::WorkflowProgress),
            "step_completed" => Some(Self::StepCompleted),
            "eta_update" => Some(Self::EtaUpdate),
            "workflow_completed" => Some(Self::WorkflowCompleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProgressEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of an execution subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Active,
    Expired,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Interrupted.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());

        assert!(StepStatus::Skipped.is_terminal());
        assert!(StepStatus::Timeout.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
    }

    #[test]
    fn test_step_failure_statuses() {
        assert!(StepStatus::Failed.is_failure());
        assert!(StepStatus::Timeout.is_failure());
        assert!(!StepStatus::Skipped.is_failure());
        assert!(!StepStatus::Completed.is_failure());
    }

    #[test]
    fn test_round_trip_strings() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Interrupted,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }

        for status in [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Skipped,
            StepStatus::Timeout,
        ] {
            assert_eq!(StepStatus::parse(status.as_str()), Some(status));
        }

        assert_eq!(
            ProgressEventType::parse("workflow_completed"),
            Some(ProgressEventType::WorkflowCompleted)
        );
        assert_eq!(DeliveryStatus::parse("active"), Some(DeliveryStatus::Active));
        assert_eq!(DeliveryStatus::parse("ACTIVE"), None);
    }

    #[test]
    fn test_serde_forms_match_db_strings() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::Interrupted).unwrap(),
            serde_json::json!("INTERRUPTED")
        );
        assert_eq!(
            serde_json::to_value(ProgressEventType::StepCompleted).unwrap(),
            serde_json::json!("step_completed")
        );
        assert_eq!(
            serde_json::to_value(DeliveryStatus::Expired).unwrap(),
            serde_json::json!("expired")
        );
    }
}
