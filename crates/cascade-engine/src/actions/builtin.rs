//! Sync control-flow actions

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use cascade_core::{
    ActionContext, ActionError, ActionExecutor, ActionMeta, ActionResult, ConditionEvaluator,
    JsonMap, OutputDefinition, ParamDefinition, ParamType, SelectOption,
};

// =============================================================================
// log
// =============================================================================

pub(super) fn log_meta() -> ActionMeta {
    ActionMeta {
        params: vec![
            ParamDefinition::new("message", "Message", ParamType::Text)
                .with_description("Text to log"),
            ParamDefinition::new("level", "Level", ParamType::Select)
                .with_default(json!("info"))
                .with_options(vec![
                    SelectOption::new("debug", "Debug"),
                    SelectOption::new("info", "Info"),
                    SelectOption::new("warn", "Warn"),
                    SelectOption::new("error", "Error"),
                ]),
        ],
        outputs: vec![
            OutputDefinition::new("logged", "boolean"),
            OutputDefinition::new("message", "string"),
        ],
        idempotent: true,
        ..ActionMeta::new("log", "Log", "Control Flow", "Logs a message at the specified level")
    }
}

/// Logs a message
pub struct LogAction;

#[async_trait]
impl ActionExecutor for LogAction {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
        let message = ctx.str_param("message", "No message provided");
        let level = ctx.str_param("level", "info");

        match level.as_str() {
            "debug" => debug!(step_id = %ctx.step_id, "{message}"),
            "warn" => warn!(step_id = %ctx.step_id, "{message}"),
            "error" => error!(step_id = %ctx.step_id, "{message}"),
            _ => info!(step_id = %ctx.step_id, "{message}"),
        }

        let mut outputs = JsonMap::new();
        outputs.insert("logged".to_string(), json!(true));
        outputs.insert("message".to_string(), json!(message));
        Ok(ActionResult::ok(outputs))
    }
}

// =============================================================================
// delay
// =============================================================================

pub(super) fn delay_meta() -> ActionMeta {
    ActionMeta {
        params: vec![ParamDefinition::new("seconds", "Seconds", ParamType::Number)
            .with_default(json!(1))
            .with_description("How long to wait")],
        outputs: vec![
            OutputDefinition::new("delayed", "boolean"),
            OutputDefinition::new("seconds", "number"),
        ],
        idempotent: true,
        ..ActionMeta::new("delay", "Delay", "Control Flow", "Introduces a delay in seconds")
    }
}

/// Sleeps for a number of seconds
pub struct DelayAction;

#[async_trait]
impl ActionExecutor for DelayAction {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
        let seconds = ctx
            .param("seconds")
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
            .max(0.0);

        debug!(step_id = %ctx.step_id, seconds, "delaying");
        tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;

        let mut outputs = JsonMap::new();
        outputs.insert("delayed".to_string(), json!(true));
        outputs.insert("seconds".to_string(), json!(seconds));
        Ok(ActionResult::ok(outputs))
    }
}

// =============================================================================
// transform
// =============================================================================

pub(super) fn transform_meta() -> ActionMeta {
    ActionMeta {
        params: vec![
            ParamDefinition::new("input", "Input", ParamType::Json)
                .with_description("Value to transform"),
            ParamDefinition::new("operation", "Operation", ParamType::Select)
                .with_default(json!("passthrough"))
                .with_options(vec![
                    SelectOption::new("passthrough", "Passthrough"),
                    SelectOption::new("uppercase", "Uppercase"),
                    SelectOption::new("lowercase", "Lowercase"),
                    SelectOption::new("keys", "Keys"),
                    SelectOption::new("values", "Values"),
                    SelectOption::new("count", "Count"),
                ]),
        ],
        outputs: vec![
            OutputDefinition::new("result", "json"),
            OutputDefinition::new("operation", "string"),
        ],
        idempotent: true,
        ..ActionMeta::new(
            "transform",
            "Transform",
            "Control Flow",
            "Transforms input data using various operations",
        )
    }
}

/// Transforms an input value
pub struct TransformAction;

#[async_trait]
impl ActionExecutor for TransformAction {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
        let input = ctx.param("input").cloned().unwrap_or(Value::Null);
        let operation = ctx.str_param("operation", "passthrough");

        let result = match operation.as_str() {
            "uppercase" => map_strings(&input, &str::to_uppercase),
            "lowercase" => map_strings(&input, &str::to_lowercase),
            "keys" => match &input {
                Value::Object(map) => Value::Array(map.keys().map(|k| json!(k)).collect()),
                _ => json!([]),
            },
            "values" => match &input {
                Value::Object(map) => Value::Array(map.values().cloned().collect()),
                _ => json!([]),
            },
            "count" => match &input {
                Value::Object(map) => json!(map.len()),
                Value::Array(items) => json!(items.len()),
                Value::String(s) => json!(s.chars().count()),
                _ => json!(0),
            },
            _ => input,
        };

        let mut outputs = JsonMap::new();
        outputs.insert("result".to_string(), result);
        outputs.insert("operation".to_string(), json!(operation));
        Ok(ActionResult::ok(outputs))
    }
}

/// Apply a string transform to a scalar string or the string values of an
/// object; other shapes pass through
fn map_strings(value: &Value, transform: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => json!(transform(s)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let mapped = match v {
                        Value::String(s) => json!(transform(s)),
                        other => other.clone(),
                    };
                    (k.clone(), mapped)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

// =============================================================================
// aggregate
// =============================================================================

pub(super) fn aggregate_meta() -> ActionMeta {
    ActionMeta {
        params: vec![
            ParamDefinition::new("inputs", "Inputs", ParamType::Json)
                .with_description("Values to aggregate"),
            ParamDefinition::new("operation", "Operation", ParamType::Select)
                .with_default(json!("list"))
                .with_options(vec![
                    SelectOption::new("list", "List"),
                    SelectOption::new("sum", "Sum"),
                    SelectOption::new("join", "Join"),
                    SelectOption::new("merge", "Merge"),
                ]),
            ParamDefinition::new("separator", "Separator", ParamType::Text)
                .with_default(json!(", ")),
        ],
        outputs: vec![
            OutputDefinition::new("result", "json"),
            OutputDefinition::new("count", "number"),
        ],
        idempotent: true,
        ..ActionMeta::new(
            "aggregate",
            "Aggregate",
            "Control Flow",
            "Aggregates multiple inputs using various operations",
        )
    }
}

/// Aggregates a list of values
pub struct AggregateAction;

#[async_trait]
impl ActionExecutor for AggregateAction {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
        let inputs = ctx
            .param("inputs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let operation = ctx.str_param("operation", "list");

        let result = match operation.as_str() {
            "sum" => {
                let sum: f64 = inputs.iter().filter_map(Value::as_f64).sum();
                if sum.fract() == 0.0 {
                    json!(sum as i64)
                } else {
                    json!(sum)
                }
            }
            "join" => {
                let separator = ctx.str_param("separator", ", ");
                let joined = inputs
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(&separator);
                json!(joined)
            }
            "merge" => {
                let mut merged = JsonMap::new();
                for item in &inputs {
                    if let Value::Object(map) = item {
                        for (k, v) in map {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                }
                Value::Object(merged)
            }
            _ => Value::Array(inputs.clone()),
        };

        let mut outputs = JsonMap::new();
        outputs.insert("result".to_string(), result);
        outputs.insert("count".to_string(), json!(inputs.len()));
        Ok(ActionResult::ok(outputs))
    }
}

// =============================================================================
// set_output
// =============================================================================

pub(super) fn set_output_meta() -> ActionMeta {
    ActionMeta {
        params: vec![ParamDefinition::new("outputs", "Outputs", ParamType::Json)
            .with_description("Object to expose as this step's outputs")],
        idempotent: true,
        ..ActionMeta::new(
            "set_output",
            "Set Output",
            "Control Flow",
            "Sets arbitrary output values",
        )
    }
}

/// Exposes its `outputs` parameter verbatim
pub struct SetOutputAction;

#[async_trait]
impl ActionExecutor for SetOutputAction {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
        let outputs = ctx
            .param("outputs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(ActionResult::ok(outputs))
    }
}

// =============================================================================
// fail
// =============================================================================

pub(super) fn fail_meta() -> ActionMeta {
    ActionMeta {
        params: vec![ParamDefinition::new("message", "Message", ParamType::Text)
            .with_default(json!("Intentional failure"))],
        ..ActionMeta::new(
            "fail",
            "Fail",
            "Control Flow",
            "Always fails with the specified error message",
        )
    }
}

/// Always fails (error-path testing)
pub struct FailAction;

#[async_trait]
impl ActionExecutor for FailAction {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
        Ok(ActionResult::fail(
            ctx.str_param("message", "Intentional failure"),
        ))
    }
}

// =============================================================================
// conditional
// =============================================================================

pub(super) fn conditional_meta() -> ActionMeta {
    ActionMeta {
        params: vec![
            ParamDefinition::new("branches", "Branches", ParamType::Json).with_description(
                "Ordered branch list; each entry has id, label, condition and target_step",
            ),
            ParamDefinition::new("condition", "Condition", ParamType::Json)
                .with_description("Legacy single condition"),
            ParamDefinition::new("true_result", "True Result", ParamType::Json),
            ParamDefinition::new("false_result", "False Result", ParamType::Json),
        ],
        outputs: vec![
            OutputDefinition::new("matched_branch", "string"),
            OutputDefinition::new("matched_label", "string"),
            OutputDefinition::new("target_step", "string"),
            OutputDefinition::new("result", "json"),
            OutputDefinition::new("branch", "string"),
        ],
        idempotent: true,
        ..ActionMeta::new(
            "conditional",
            "Conditional Branch",
            "Control Flow",
            "Route to different steps based on conditions",
        )
    }
}

/// Multi-branch conditional routing
///
/// The branch list is evaluated in declared order; the first branch whose
/// condition is true wins and its `target_step` is reported in the
/// outputs for the engine to route on. A branch whose condition errors is
/// treated as non-matching. The legacy single-condition form
/// (`condition` / `true_result` / `false_result`) is preserved.
pub struct ConditionalAction;

#[async_trait]
impl ActionExecutor for ConditionalAction {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult, ActionError> {
        let branches = ctx
            .param("branches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if !branches.is_empty() {
            debug!(step_id = %ctx.step_id, count = branches.len(), "evaluating conditional branches");

            for branch in &branches {
                let branch_id = branch.get("id").and_then(Value::as_str).unwrap_or("unknown");
                let label = branch
                    .get("label")
                    .and_then(Value::as_str)
                    .unwrap_or(branch_id);
                let target_step = branch.get("target_step").and_then(Value::as_str);

                let matched = match branch.get("condition") {
                    Some(Value::Bool(b)) => *b,
                    Some(Value::String(expr)) => {
                        match ConditionEvaluator::evaluate(
                            expr,
                            &ctx.workflow_params,
                            &ctx.step_outputs,
                        ) {
                            Ok(matched) => matched,
                            Err(err) => {
                                warn!(
                                    step_id = %ctx.step_id,
                                    branch = label,
                                    error = %err,
                                    "branch condition errored; treating as non-matching"
                                );
                                continue;
                            }
                        }
                    }
                    // Missing condition defaults to a match (catch-all branch)
                    None => true,
                    Some(other) => !matches!(other, Value::Null),
                };

                if matched {
                    info!(step_id = %ctx.step_id, branch = label, ?target_step, "branch matched");
                    let mut outputs = JsonMap::new();
                    outputs.insert("matched_branch".to_string(), json!(branch_id));
                    outputs.insert("matched_label".to_string(), json!(label));
                    outputs.insert(
                        "target_step".to_string(),
                        target_step.map(|t| json!(t)).unwrap_or(Value::Null),
                    );
                    outputs.insert("result".to_string(), json!(label));
                    outputs.insert("branch".to_string(), json!(branch_id));
                    return Ok(ActionResult::ok(outputs));
                }
            }

            info!(step_id = %ctx.step_id, "no conditional branch matched");
            let mut outputs = JsonMap::new();
            outputs.insert("matched_branch".to_string(), Value::Null);
            outputs.insert("matched_label".to_string(), json!("none"));
            outputs.insert("target_step".to_string(), Value::Null);
            outputs.insert("result".to_string(), Value::Null);
            outputs.insert("branch".to_string(), json!("none"));
            return Ok(ActionResult::ok(outputs));
        }

        // Legacy single-condition mode
        let condition = match ctx.param("condition") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(expr)) => {
                ConditionEvaluator::evaluate(expr, &ctx.workflow_params, &ctx.step_outputs)
                    .unwrap_or(false)
            }
            None => true,
            Some(other) => !matches!(other, Value::Null),
        };

        let (result, branch) = if condition {
            (
                ctx.param("true_result")
                    .cloned()
                    .unwrap_or_else(|| json!({"branch": "true"})),
                "true",
            )
        } else {
            (
                ctx.param("false_result")
                    .cloned()
                    .unwrap_or_else(|| json!({"branch": "false"})),
                "false",
            )
        };

        let mut outputs = JsonMap::new();
        outputs.insert("result".to_string(), result);
        outputs.insert("branch".to_string(), json!(branch));
        outputs.insert("matched_branch".to_string(), json!(branch));
        outputs.insert("matched_label".to_string(), json!(branch));
        outputs.insert("target_step".to_string(), Value::Null);
        Ok(ActionResult::ok(outputs))
    }

    fn validate_params(&self, params: &JsonMap) -> Vec<String> {
        let mut errors = vec![];
        if let Some(Value::Array(branches)) = params.get("branches") {
            for (i, branch) in branches.iter().enumerate() {
                let Some(branch) = branch.as_object() else {
                    errors.push(format!("branch {i} must be an object"));
                    continue;
                };
                if !branch.contains_key("id") {
                    errors.push(format!("branch {i} missing 'id' field"));
                }
                if !branch.contains_key("condition") {
                    errors.push(format!("branch {i} missing 'condition' field"));
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::NoServices;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx(params: Value) -> ActionContext {
        ctx_with(params, json!({}), json!({}))
    }

    fn ctx_with(params: Value, workflow_params: Value, step_outputs: Value) -> ActionContext {
        ActionContext::new(
            "test-step",
            Uuid::now_v7(),
            params.as_object().cloned().unwrap_or_default(),
            workflow_params.as_object().cloned().unwrap_or_default(),
            step_outputs.as_object().cloned().unwrap_or_default(),
            Arc::new(NoServices),
        )
    }

    #[tokio::test]
    async fn test_log_action() {
        let result = LogAction
            .execute(ctx(json!({"message": "hello", "level": "warn"})))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.outputs["logged"], json!(true));
        assert_eq!(result.outputs["message"], json!("hello"));
    }

    #[tokio::test]
    async fn test_transform_operations() {
        let result = TransformAction
            .execute(ctx(json!({"input": "hi", "operation": "uppercase"})))
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], json!("HI"));

        let result = TransformAction
            .execute(ctx(json!({"input": {"a": "X", "b": 1}, "operation": "lowercase"})))
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], json!({"a": "x", "b": 1}));

        let result = TransformAction
            .execute(ctx(json!({"input": {"a": 1, "b": 2}, "operation": "keys"})))
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], json!(["a", "b"]));

        let result = TransformAction
            .execute(ctx(json!({"input": [1, 2, 3], "operation": "count"})))
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], json!(3));
    }

    #[tokio::test]
    async fn test_aggregate_operations() {
        let result = AggregateAction
            .execute(ctx(json!({"inputs": [1, 2, 3], "operation": "sum"})))
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], json!(6));
        assert_eq!(result.outputs["count"], json!(3));

        let result = AggregateAction
            .execute(ctx(json!({"inputs": ["a", "b"], "operation": "join", "separator": "-"})))
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], json!("a-b"));

        let result = AggregateAction
            .execute(ctx(json!({"inputs": [{"a": 1}, {"b": 2}], "operation": "merge"})))
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_set_output_and_fail() {
        let result = SetOutputAction
            .execute(ctx(json!({"outputs": {"answer": 42}})))
            .await
            .unwrap();
        assert_eq!(result.outputs["answer"], json!(42));

        let result = FailAction
            .execute(ctx(json!({"message": "broken"})))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn test_conditional_first_match_wins() {
        let params = json!({
            "branches": [
                {"id": "a", "label": "High", "condition": "params.x > 10", "target_step": "a"},
                {"id": "b", "label": "Default", "condition": "true", "target_step": "b"}
            ]
        });

        let result = ConditionalAction
            .execute(ctx_with(params.clone(), json!({"x": 5}), json!({})))
            .await
            .unwrap();
        assert_eq!(result.outputs["matched_branch"], json!("b"));
        assert_eq!(result.outputs["target_step"], json!("b"));

        let result = ConditionalAction
            .execute(ctx_with(params, json!({"x": 50}), json!({})))
            .await
            .unwrap();
        assert_eq!(result.outputs["matched_branch"], json!("a"));
        assert_eq!(result.outputs["target_step"], json!("a"));
    }

    #[tokio::test]
    async fn test_conditional_no_match() {
        let params = json!({
            "branches": [
                {"id": "a", "condition": "false", "target_step": "a"}
            ]
        });
        let result = ConditionalAction.execute(ctx(params)).await.unwrap();
        assert_eq!(result.outputs["matched_branch"], Value::Null);
        assert_eq!(result.outputs["target_step"], Value::Null);
        assert_eq!(result.outputs["matched_label"], json!("none"));
    }

    #[tokio::test]
    async fn test_conditional_errored_condition_is_non_matching() {
        let params = json!({
            "branches": [
                {"id": "broken", "condition": "params.x ==", "target_step": "a"},
                {"id": "fallback", "condition": "true", "target_step": "b"}
            ]
        });
        let result = ConditionalAction.execute(ctx(params)).await.unwrap();
        assert_eq!(result.outputs["matched_branch"], json!("fallback"));
    }

    #[tokio::test]
    async fn test_conditional_legacy_mode() {
        let result = ConditionalAction
            .execute(ctx(json!({
                "condition": false,
                "true_result": {"go": "up"},
                "false_result": {"go": "down"}
            })))
            .await
            .unwrap();
        assert_eq!(result.outputs["branch"], json!("false"));
        assert_eq!(result.outputs["result"], json!({"go": "down"}));
    }

    #[test]
    fn test_conditional_validate_params() {
        let action = ConditionalAction;
        let params = json!({"branches": [{"label": "no id or condition"}, 42]})
            .as_object()
            .cloned()
            .unwrap();
        let errors = action.validate_params(&params);
        assert_eq!(errors.len(), 3);
    }
}
