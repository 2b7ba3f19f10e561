//! Condition evaluation for branching actions

use minijinja::{Environment, UndefinedBehavior};

use crate::JsonMap;

use super::{build_scope, TemplateError};

/// Evaluates boolean branch expressions over the template scope
///
/// Callers treat an `Err` as a non-matching branch rather than a fatal
/// failure; the error carries enough detail for the step log.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluate an expression like `params.x > 10` or
    /// `steps.check.outputs.ok` to a boolean.
    ///
    /// The template-wrapped form `{{ ... }}` used in pipeline definitions
    /// is accepted and unwrapped.
    pub fn evaluate(
        expression: &str,
        params: &JsonMap,
        step_outputs: &JsonMap,
    ) -> Result<bool, TemplateError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Ok(false);
        }

        let expr = trimmed
            .strip_prefix("{{")
            .and_then(|s| s.strip_suffix("}}"))
            .map(str::trim)
            .unwrap_or(trimmed);

        match expr {
            "true" | "True" => return Ok(true),
            "false" | "False" => return Ok(false),
            _ => {}
        }

        let scope = build_scope(params, step_outputs);
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);

        let compiled = env.compile_expression(expr).map_err(|err| TemplateError::Condition {
            expression: expression.to_string(),
            detail: err.to_string(),
        })?;

        let value = compiled.eval(&scope).map_err(|err| TemplateError::Condition {
            expression: expression.to_string(),
            detail: err.to_string(),
        })?;

        Ok(value.is_true())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_literals() {
        let p = JsonMap::new();
        let s = JsonMap::new();
        assert!(ConditionEvaluator::evaluate("true", &p, &s).unwrap());
        assert!(!ConditionEvaluator::evaluate("false", &p, &s).unwrap());
        assert!(!ConditionEvaluator::evaluate("", &p, &s).unwrap());
    }

    #[test]
    fn test_comparisons_over_params() {
        let p = params(json!({"x": 5}));
        let s = JsonMap::new();

        assert!(!ConditionEvaluator::evaluate("{{ params.x > 10 }}", &p, &s).unwrap());
        assert!(ConditionEvaluator::evaluate("{{ params.x > 2 }}", &p, &s).unwrap());
        assert!(ConditionEvaluator::evaluate("params.x == 5", &p, &s).unwrap());
    }

    #[test]
    fn test_step_output_conditions() {
        let p = JsonMap::new();
        let mut s = JsonMap::new();
        s.insert("check".to_string(), json!({"ok": true, "count": 0}));

        assert!(ConditionEvaluator::evaluate("steps.check.outputs.ok", &p, &s).unwrap());
        assert!(!ConditionEvaluator::evaluate("steps.check.outputs.count", &p, &s).unwrap());
    }

    #[test]
    fn test_truthiness_of_values() {
        let p = params(json!({"s": "", "t": "x", "empty": [], "full": [1]}));
        let s = JsonMap::new();

        assert!(!ConditionEvaluator::evaluate("params.s", &p, &s).unwrap());
        assert!(ConditionEvaluator::evaluate("params.t", &p, &s).unwrap());
        assert!(!ConditionEvaluator::evaluate("params.empty", &p, &s).unwrap());
        assert!(ConditionEvaluator::evaluate("params.full", &p, &s).unwrap());
    }

    #[test]
    fn test_bad_expression_is_an_error_not_a_panic() {
        let p = JsonMap::new();
        let s = JsonMap::new();
        let result = ConditionEvaluator::evaluate("params.x ==", &p, &s);
        assert!(matches!(result, Err(TemplateError::Condition { .. })));
    }
}
