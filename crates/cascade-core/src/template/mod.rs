//! Template resolution over workflow parameters and step outputs
//!
//! Two variable namespaces are exposed to templates:
//! - `params.<name>` for workflow inputs
//! - `steps.<step_id>.outputs.<name>` for prior step outputs
//!
//! The surface is deliberately restricted: dotted/bracket access, the
//! `default` filter and simple text filters. minijinja runs underneath but
//! no host-language execution is exposed.

mod condition;
mod resolver;

pub use condition::ConditionEvaluator;
pub use resolver::ParamResolver;

use serde_json::Value;

use crate::JsonMap;

/// Error from template resolution or condition evaluation
#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    /// Unequal counts of `{{` and `}}`
    #[error("unbalanced template braces in {template:?}")]
    UnbalancedBraces { template: String },

    #[error("invalid template syntax in {template:?}: {detail}")]
    Syntax { template: String, detail: String },

    /// Strict mode: a referenced symbol does not resolve and has no default
    #[error("undefined variable '{variable}' in template {template:?}")]
    UndefinedVariable { variable: String, template: String },

    #[error("template resolution failed for {template:?}: {detail}")]
    Render { template: String, detail: String },

    #[error("condition evaluation failed for {expression:?}: {detail}")]
    Condition { expression: String, detail: String },
}

/// Build the evaluation scope exposed to templates
///
/// `step_outputs` maps step id to that step's outputs object.
pub(crate) fn build_scope(params: &JsonMap, step_outputs: &JsonMap) -> Value {
    let mut steps = JsonMap::new();
    for (step_id, outputs) in step_outputs {
        let mut entry = JsonMap::new();
        entry.insert("outputs".to_string(), outputs.clone());
        steps.insert(step_id.clone(), Value::Object(entry));
    }

    let mut scope = JsonMap::new();
    scope.insert("params".to_string(), Value::Object(params.clone()));
    scope.insert("steps".to_string(), Value::Object(steps));
    Value::Object(scope)
}
