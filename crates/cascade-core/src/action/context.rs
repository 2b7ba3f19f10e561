//! Value objects passed into action executors

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::JsonMap;

use super::service::{ServiceError, ServiceInvoker, ServiceRequest};

/// Context for an action's `execute` call
///
/// Carries the resolved parameters plus read-only views of the workflow
/// parameters and prior step outputs, and the bound service invoker.
#[derive(Clone)]
pub struct ActionContext {
    /// Step identifier from the pipeline definition
    pub step_id: String,

    /// Owning pipeline execution
    pub execution_id: Uuid,

    /// Parameters after template resolution
    pub params: JsonMap,

    /// Raw workflow input parameters
    pub workflow_params: JsonMap,

    /// Outputs of prior terminal steps, keyed by step id
    pub step_outputs: JsonMap,

    services: Arc<dyn ServiceInvoker>,
}

impl ActionContext {
    pub fn new(
        step_id: impl Into<String>,
        execution_id: Uuid,
        params: JsonMap,
        workflow_params: JsonMap,
        step_outputs: JsonMap,
        services: Arc<dyn ServiceInvoker>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            execution_id,
            params,
            workflow_params,
            step_outputs,
            services,
        }
    }

    /// Invoke a downstream microservice through the bound invoker
    pub async fn invoke_service(&self, request: ServiceRequest) -> Result<Value, ServiceError> {
        self.services.invoke(request).await
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// String parameter with a fallback default
    pub fn str_param(&self, name: &str, default: &str) -> String {
        self.params
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    pub fn u64_param(&self, name: &str) -> Option<u64> {
        self.params.get(name).and_then(Value::as_u64)
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("step_id", &self.step_id)
            .field("execution_id", &self.execution_id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Context for an action's `on_event` call
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Step execution that was bound to the external workflow
    pub step_execution_id: Uuid,

    pub execution_id: Uuid,

    /// External workflow id the event was matched on
    pub external_workflow_id: String,

    /// `type` field of the event, empty when absent
    pub event_type: String,

    /// The raw event payload
    pub event_data: Value,

    /// The step's current outputs
    pub step_outputs: JsonMap,
}

impl EventContext {
    /// Convenience accessor for a dotted path into the event payload
    pub fn event_field(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.event_data;
        for key in path {
            current = current.get(key)?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::service::NoServices;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_param_accessors() {
        let ctx = ActionContext::new(
            "step-1",
            Uuid::now_v7(),
            map(json!({"message": "hi", "count": 3})),
            JsonMap::new(),
            JsonMap::new(),
            Arc::new(NoServices),
        );

        assert_eq!(ctx.str_param("message", "none"), "hi");
        assert_eq!(ctx.str_param("missing", "none"), "none");
        assert_eq!(ctx.u64_param("count"), Some(3));
    }

    #[test]
    fn test_event_field_path() {
        let ctx = EventContext {
            step_execution_id: Uuid::now_v7(),
            execution_id: Uuid::now_v7(),
            external_workflow_id: "wf-1".to_string(),
            event_type: "workflow_completed".to_string(),
            event_data: json!({"result": {"model_id": "m-123"}}),
            step_outputs: JsonMap::new(),
        };

        assert_eq!(
            ctx.event_field(&["result", "model_id"]),
            Some(&json!("m-123"))
        );
        assert_eq!(ctx.event_field(&["result", "missing"]), None);
    }
}
