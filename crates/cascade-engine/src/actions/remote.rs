//! Event-driven remote workflow action
//!
//! Starts a workflow on a downstream service and completes later when the
//! service publishes a `workflow_completed` event carrying the same
//! workflow id. Domain plug-ins follow this shape for long-running
//! operations.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cascade_core::{
    ActionContext, ActionError, ActionExecutor, ActionMeta, ActionResult, EventContext,
    EventResult, ExecutionMode, JsonMap, OutputDefinition, ParamDefinition, ParamType,
    SelectOption, ServiceRequest,
};

pub(super) fn remote_workflow_meta() -> ActionMeta {
    ActionMeta {
        params: vec![
            ParamDefinition::new("app_id", "Service", ParamType::Text)
                .required()
                .with_description("Target application id in the service mesh"),
            ParamDefinition::new("path", "Path", ParamType::Text)
                .required()
                .with_description("Method path that starts the remote workflow"),
            ParamDefinition::new("method", "Method", ParamType::Select)
                .with_default(json!("POST"))
                .with_options(vec![
                    SelectOption::new("POST", "POST"),
                    SelectOption::new("PUT", "PUT"),
                ]),
            ParamDefinition::new("payload", "Payload", ParamType::Json)
                .with_description("Request body forwarded to the service"),
            ParamDefinition::new("max_wait_seconds", "Max Wait", ParamType::Number)
                .with_default(json!(1800)),
        ],
        outputs: vec![
            OutputDefinition::new("workflow_id", "string"),
            OutputDefinition::new("status", "string"),
            OutputDefinition::new("message", "string"),
        ],
        execution_mode: ExecutionMode::EventDriven,
        timeout_seconds: Some(1800),
        required_services: vec!["service-mesh".to_string()],
        ..ActionMeta::new(
            "remote_workflow",
            "Remote Workflow",
            "Integration",
            "Starts a workflow on a downstream service and waits for its completion event",
        )
    }
}

/// Starts a remote workflow and awaits its completion event
pub struct RemoteWorkflowAction;

impl RemoteWorkflowAction {
    /// The started workflow's id, wherever the service put it
    fn extract_workflow_id(response: &Value) -> Option<String> {
        let candidates = [
            response.pointer("/data/workflow_id"),
            response.get("workflow_id"),
        ];
        for candidate in candidates.into_iter().flatten() {
            match candidate {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
        None
    }
}

#[async_trait]
impl ActionExecutor for RemoteWorkflowAction {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
        let app_id = ctx.str_param("app_id", "");
        let path = ctx.str_param("path", "");
        let method = ctx.str_param("method", "POST");
        let payload = ctx.param("payload").cloned().unwrap_or(json!({}));
        let max_wait_seconds = ctx.u64_param("max_wait_seconds").unwrap_or(1800);

        info!(step_id = %ctx.step_id, %app_id, %path, "starting remote workflow");

        let request = ServiceRequest::new(app_id.clone(), path)
            .method(method)
            .data(payload)
            .timeout_seconds(60);

        let response = match ctx.invoke_service(request).await {
            Ok(response) => response,
            Err(err) => {
                let message = format!("Failed to start remote workflow: {err}");
                warn!(step_id = %ctx.step_id, error = %message, "remote workflow start failed");
                return Ok(ActionResult::fail_with_outputs(
                    message.clone(),
                    failure_outputs(&message),
                ));
            }
        };

        let Some(workflow_id) = Self::extract_workflow_id(&response) else {
            let message = format!("No workflow_id returned by {app_id}");
            warn!(step_id = %ctx.step_id, "remote service returned no workflow id");
            return Ok(ActionResult::fail_with_outputs(
                message.clone(),
                failure_outputs(&message),
            ));
        };

        info!(step_id = %ctx.step_id, %workflow_id, "remote workflow started");

        let mut outputs = JsonMap::new();
        outputs.insert("workflow_id".to_string(), json!(workflow_id));
        outputs.insert("status".to_string(), json!("running"));
        outputs.insert(
            "message".to_string(),
            json!(format!("Remote workflow started: {workflow_id}")),
        );
        Ok(ActionResult::awaiting(
            workflow_id,
            Some(max_wait_seconds),
            outputs,
        ))
    }

    async fn on_event(&self, ctx: EventContext) -> Result<EventResult, ActionError> {
        if ctx.event_type != "workflow_completed" {
            debug!(
                step_execution_id = %ctx.step_execution_id,
                event_type = %ctx.event_type,
                "event ignored"
            );
            return Ok(EventResult::ignore());
        }

        let status = ctx
            .event_data
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");

        if status == "COMPLETED" {
            let mut outputs = JsonMap::new();
            outputs.insert("status".to_string(), json!("completed"));
            outputs.insert("success".to_string(), json!(true));
            if let Some(Value::Object(result)) = ctx.event_data.get("result") {
                for (key, value) in result {
                    outputs.insert(key.clone(), value.clone());
                }
            }

            info!(step_execution_id = %ctx.step_execution_id, "remote workflow completed");
            return Ok(EventResult::completed(outputs));
        }

        let reason = ctx
            .event_data
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("Remote workflow failed")
            .to_string();

        warn!(step_execution_id = %ctx.step_execution_id, %reason, "remote workflow failed");
        let mut outputs = JsonMap::new();
        outputs.insert("status".to_string(), json!("failed"));
        outputs.insert("success".to_string(), json!(false));
        outputs.insert("message".to_string(), json!(reason.clone()));
        Ok(EventResult::failed(reason, outputs))
    }

    fn validate_params(&self, params: &JsonMap) -> Vec<String> {
        let mut errors = vec![];
        for required in ["app_id", "path"] {
            let missing = match params.get(required) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                _ => false,
            };
            if missing {
                errors.push(format!("'{required}' is required"));
            }
        }
        errors
    }
}

fn failure_outputs(message: &str) -> JsonMap {
    let mut outputs = JsonMap::new();
    outputs.insert("workflow_id".to_string(), Value::Null);
    outputs.insert("status".to_string(), json!("failed"));
    outputs.insert("success".to_string(), json!(false));
    outputs.insert("message".to_string(), json!(message));
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{ServiceError, ServiceInvoker, StepStatus};
    use std::sync::Arc;
    use uuid::Uuid;

    struct FixedResponse(Value);

    #[async_trait]
    impl ServiceInvoker for FixedResponse {
        async fn invoke(&self, _request: ServiceRequest) -> Result<Value, ServiceError> {
            Ok(self.0.clone())
        }
    }

    fn ctx(params: Value, services: Arc<dyn ServiceInvoker>) -> ActionContext {
        ActionContext::new(
            "remote-step",
            Uuid::now_v7(),
            params.as_object().cloned().unwrap(),
            JsonMap::new(),
            JsonMap::new(),
            services,
        )
    }

    #[tokio::test]
    async fn test_execute_returns_wait_marker() {
        let services = Arc::new(FixedResponse(json!({"data": {"workflow_id": "wf-77"}})));
        let result = RemoteWorkflowAction
            .execute(ctx(
                json!({"app_id": "models", "path": "models/import", "max_wait_seconds": 120}),
                services,
            ))
            .await
            .unwrap();

        assert!(result.awaiting_event);
        assert_eq!(result.external_workflow_id.as_deref(), Some("wf-77"));
        assert_eq!(result.timeout_seconds, Some(120));
        assert_eq!(result.outputs["status"], json!("running"));
    }

    #[tokio::test]
    async fn test_execute_fails_without_workflow_id() {
        let services = Arc::new(FixedResponse(json!({"ok": true})));
        let result = RemoteWorkflowAction
            .execute(ctx(json!({"app_id": "models", "path": "x"}), services))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(!result.awaiting_event);
        assert!(result.error.unwrap().contains("No workflow_id"));
    }

    #[tokio::test]
    async fn test_on_event_completion_merges_result() {
        let result = RemoteWorkflowAction
            .on_event(EventContext {
                step_execution_id: Uuid::now_v7(),
                execution_id: Uuid::now_v7(),
                external_workflow_id: "wf-77".to_string(),
                event_type: "workflow_completed".to_string(),
                event_data: json!({
                    "workflow_id": "wf-77",
                    "status": "COMPLETED",
                    "result": {"model_id": "m-123"}
                }),
                step_outputs: JsonMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(result.action, cascade_core::EventAction::Complete);
        assert_eq!(result.status, Some(StepStatus::Completed));
        assert_eq!(result.outputs["model_id"], json!("m-123"));
        assert_eq!(result.outputs["success"], json!(true));
    }

    #[tokio::test]
    async fn test_on_event_failure_and_ignore() {
        let failed = RemoteWorkflowAction
            .on_event(EventContext {
                step_execution_id: Uuid::now_v7(),
                execution_id: Uuid::now_v7(),
                external_workflow_id: "wf-1".to_string(),
                event_type: "workflow_completed".to_string(),
                event_data: json!({"status": "FAILED", "reason": "no capacity"}),
                step_outputs: JsonMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(failed.status, Some(StepStatus::Failed));
        assert_eq!(failed.error.as_deref(), Some("no capacity"));

        let ignored = RemoteWorkflowAction
            .on_event(EventContext {
                step_execution_id: Uuid::now_v7(),
                execution_id: Uuid::now_v7(),
                external_workflow_id: "wf-1".to_string(),
                event_type: "heartbeat".to_string(),
                event_data: json!({}),
                step_outputs: JsonMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(ignored.action, cascade_core::EventAction::Ignore);
    }

    #[test]
    fn test_validate_params_requires_target() {
        let action = RemoteWorkflowAction;
        let errors = action.validate_params(&JsonMap::new());
        assert_eq!(errors.len(), 2);

        let params = json!({"app_id": "models", "path": "models/import"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(action.validate_params(&params).is_empty());
    }
}
