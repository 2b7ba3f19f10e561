//! Action executor contract

use async_trait::async_trait;

use crate::JsonMap;

use super::context::{ActionContext, EventContext};
use super::result::{ActionResult, EventResult};

/// Error raised by action code
///
/// Executors normally report failures through
/// [`ActionResult::fail`](super::ActionResult::fail); an `Err` from
/// `execute`/`on_event` is the escape hatch for unexpected conditions and
/// is rendered by the engine as a step failure, never propagated further.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,

    /// Additional detail for logs
    pub details: Option<serde_json::Value>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<super::service::ServiceError> for ActionError {
    fn from(err: super::service::ServiceError) -> Self {
        Self::new(err.to_string())
    }
}

/// The two-call contract every action implements
///
/// 1. `execute` runs the action. Sync actions return their final result;
///    event-driven actions return a wait marker and are completed later.
/// 2. `on_event` is called when an external event is routed to a waiting
///    step. The default implementation ignores every event, which is
///    correct for sync actions.
///
/// Executors are constructed lazily by the registry and shared; they must
/// not hold per-invocation state.
///
/// # Example
///
/// ```ignore
/// struct EchoAction;
///
/// #[async_trait]
/// impl ActionExecutor for EchoAction {
///     async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
///         let mut outputs = JsonMap::new();
///         outputs.insert("echo".into(), ctx.params.get("value").cloned().into());
///         Ok(ActionResult::ok(outputs))
///     }
/// }
/// ```
#[async_trait]
pub trait ActionExecutor: Send + Sync + 'static {
    /// Run the action
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError>;

    /// Handle an external event routed to a waiting step
    async fn on_event(&self, _ctx: EventContext) -> Result<EventResult, ActionError> {
        Ok(EventResult::ignore())
    }

    /// Executor-specific parameter validation, run after the structural
    /// checks derived from [`ActionMeta`](super::ActionMeta)
    fn validate_params(&self, _params: &JsonMap) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::service::NoServices;
    use std::sync::Arc;
    use uuid::Uuid;

    struct EchoAction;

    #[async_trait]
    impl ActionExecutor for EchoAction {
        async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
            let mut outputs = JsonMap::new();
            outputs.insert(
                "echo".to_string(),
                ctx.params.get("value").cloned().unwrap_or_default(),
            );
            Ok(ActionResult::ok(outputs))
        }
    }

    #[tokio::test]
    async fn test_default_on_event_ignores() {
        let action = EchoAction;
        let result = action
            .on_event(EventContext {
                step_execution_id: Uuid::now_v7(),
                execution_id: Uuid::now_v7(),
                external_workflow_id: "wf".to_string(),
                event_type: "anything".to_string(),
                event_data: serde_json::json!({}),
                step_outputs: JsonMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(result.action, crate::action::EventAction::Ignore);
    }

    #[tokio::test]
    async fn test_execute_echo() {
        let action = EchoAction;
        let mut params = JsonMap::new();
        params.insert("value".to_string(), serde_json::json!(7));

        let result = action
            .execute(ActionContext::new(
                "s1",
                Uuid::now_v7(),
                params,
                JsonMap::new(),
                JsonMap::new(),
                Arc::new(NoServices),
            ))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.outputs["echo"], serde_json::json!(7));
    }
}
