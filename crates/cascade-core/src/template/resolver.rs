//! Parameter resolver
//!
//! Resolves template expressions embedded in strings, objects and arrays.
//! When the entire value of a field is a single template expression the
//! resolver returns the underlying typed value rather than its string
//! form; mixed strings always resolve to a string.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::LazyLock;

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use regex::Regex;
use serde_json::Value;

use crate::JsonMap;

use super::{build_scope, TemplateError};

/// Detects the presence of any template expression
static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{.*?\}\}").expect("template pattern"));

/// Captures the inner expression of each `{{ ... }}` segment
static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("segment pattern"));

/// Extracts variable paths at the start of an expression
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_.\[\]]*)").expect("variable pattern"));

/// A bare symbol path (dotted / bracket access, no operators)
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z0-9_]+|\[[^\]]+\])*$"#).expect("path pattern")
});

/// Resolves template expressions in workflow parameter values
pub struct ParamResolver;

impl ParamResolver {
    /// Resolve templates in a value of any shape
    ///
    /// `step_outputs` maps step id to that step's outputs object. In
    /// strict mode an unresolved symbol without a `default` filter is an
    /// error; otherwise it renders as an empty string.
    pub fn resolve(
        value: &Value,
        params: &JsonMap,
        step_outputs: &JsonMap,
        strict: bool,
    ) -> Result<Value, TemplateError> {
        let scope = build_scope(params, step_outputs);
        Self::resolve_in_scope(value, &scope, strict)
    }

    /// Resolve every value of an object map
    pub fn resolve_map(
        map: &JsonMap,
        params: &JsonMap,
        step_outputs: &JsonMap,
        strict: bool,
    ) -> Result<JsonMap, TemplateError> {
        let scope = build_scope(params, step_outputs);
        let mut resolved = JsonMap::new();
        for (key, value) in map {
            resolved.insert(key.clone(), Self::resolve_in_scope(value, &scope, strict)?);
        }
        Ok(resolved)
    }

    fn resolve_in_scope(value: &Value, scope: &Value, strict: bool) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => Self::resolve_string(s, scope, strict),
            Value::Object(map) => {
                let mut resolved = JsonMap::new();
                for (key, entry) in map {
                    resolved.insert(key.clone(), Self::resolve_in_scope(entry, scope, strict)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(Self::resolve_in_scope(item, scope, strict)?);
                }
                Ok(Value::Array(resolved))
            }
            // Primitives pass through unchanged
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(value: &str, scope: &Value, strict: bool) -> Result<Value, TemplateError> {
        if value.is_empty() {
            return Ok(Value::String(String::new()));
        }

        let open_count = value.matches("{{").count();
        let close_count = value.matches("}}").count();
        if open_count != close_count {
            return Err(TemplateError::UnbalancedBraces {
                template: value.to_string(),
            });
        }

        if open_count == 0 {
            return Ok(Value::String(value.to_string()));
        }

        if strict {
            Self::check_resolvable(value, scope)?;
        }

        let rendered = Self::render(value, scope)?;

        // Pure template expression: preserve the underlying type
        let stripped = value.trim();
        if stripped.starts_with("{{") && stripped.ends_with("}}") && open_count == 1 {
            let inner = stripped[2..stripped.len() - 2].trim();
            let base = inner.split('|').next().unwrap_or("").trim();

            if inner.contains('|') {
                // Filters force a render; re-infer the type afterwards
                return Ok(infer_type(&rendered));
            }

            if let Some(found) = lookup_path(scope, base) {
                return Ok(found);
            }
            // Non-path or unresolved expressions fall back to the render
        }

        Ok(Value::String(rendered))
    }

    fn render(template: &str, scope: &Value) -> Result<String, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.render_str(template, scope).map_err(|err| {
            if err.kind() == ErrorKind::SyntaxError {
                TemplateError::Syntax {
                    template: template.to_string(),
                    detail: err.to_string(),
                }
            } else {
                TemplateError::Render {
                    template: template.to_string(),
                    detail: err.to_string(),
                }
            }
        })
    }

    /// Strict-mode pre-check: every referenced symbol path must resolve
    /// unless the expression carries a `default` filter.
    fn check_resolvable(template: &str, scope: &Value) -> Result<(), TemplateError> {
        for caps in SEGMENT_RE.captures_iter(template) {
            let inner = caps[1].trim().to_string();
            let mut pieces = inner.split('|');
            let base = pieces.next().unwrap_or("").trim();
            let has_default = pieces.any(|f| f.trim_start().starts_with("default"));

            if has_default || is_literal(base) || !PATH_RE.is_match(base) {
                continue;
            }

            if lookup_path(scope, base).is_none() {
                return Err(TemplateError::UndefinedVariable {
                    variable: base.to_string(),
                    template: template.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check whether a value of any shape contains a template expression
    pub fn has_templates(value: &Value) -> bool {
        match value {
            Value::String(s) => TEMPLATE_RE.is_match(s),
            Value::Object(map) => map.values().any(Self::has_templates),
            Value::Array(items) => items.iter().any(Self::has_templates),
            _ => false,
        }
    }

    /// Extract every referenced symbol path from templates in a value
    pub fn extract_variables(value: &Value) -> BTreeSet<String> {
        let mut variables = BTreeSet::new();
        collect_variables(value, &mut variables);
        variables
    }

    /// Pre-execution check that all `params.*` and `steps.<id>.*`
    /// references are defined. Returns every problem found.
    pub fn validate_references(
        value: &Value,
        known_params: &HashSet<String>,
        known_steps: &HashSet<String>,
    ) -> Vec<String> {
        let mut errors = vec![];
        for variable in Self::extract_variables(value) {
            let normalized = variable.replace(']', "").replace('[', ".");
            let mut parts = normalized.split('.');
            match parts.next() {
                Some("params") => {
                    if let Some(name) = parts.next() {
                        let name = name.trim_matches(|c| c == '\'' || c == '"');
                        if !known_params.contains(name) {
                            errors.push(format!("Unknown parameter: {name}"));
                        }
                    }
                }
                Some("steps") => {
                    if let Some(step_id) = parts.next() {
                        let step_id = step_id.trim_matches(|c| c == '\'' || c == '"');
                        if !known_steps.contains(step_id) {
                            errors.push(format!("Unknown step: {step_id}"));
                        }
                    }
                }
                _ => {}
            }
        }
        errors
    }
}

fn is_literal(expr: &str) -> bool {
    matches!(expr, "true" | "false" | "none" | "True" | "False" | "None")
}

fn collect_variables(value: &Value, variables: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for caps in VARIABLE_RE.captures_iter(s) {
                variables.insert(caps[1].to_string());
            }
        }
        Value::Object(map) => {
            for entry in map.values() {
                collect_variables(entry, variables);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_variables(item, variables);
            }
        }
        _ => {}
    }
}

/// Walk a dotted/bracket path through the scope, returning the typed value
fn lookup_path(scope: &Value, expr: &str) -> Option<Value> {
    if expr.is_empty() {
        return None;
    }
    let normalized = expr.replace(']', "").replace('[', ".");
    let mut current = scope;
    for raw in normalized.split('.') {
        let part = raw.trim().trim_matches(|c| c == '\'' || c == '"');
        if part.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Infer the type of a rendered string: integer, float, boolean, JSON
/// literal, else string
fn infer_type(rendered: &str) -> Value {
    if let Ok(i) = rendered.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = rendered.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match rendered.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(rendered) {
        return parsed;
    }
    Value::String(rendered.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    fn outputs_of(pairs: &[(&str, Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(id, v)| (id.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_plain_values_pass_through() {
        let p = JsonMap::new();
        let s = JsonMap::new();
        assert_eq!(
            ParamResolver::resolve(&json!("hello"), &p, &s, false).unwrap(),
            json!("hello")
        );
        assert_eq!(ParamResolver::resolve(&json!(42), &p, &s, false).unwrap(), json!(42));
        assert_eq!(
            ParamResolver::resolve(&json!(null), &p, &s, false).unwrap(),
            json!(null)
        );
    }

    #[test]
    fn test_pure_expression_preserves_type() {
        let p = params(json!({"n": 42, "flag": true, "items": [1, 2, 3], "cfg": {"a": 1}}));
        let s = JsonMap::new();

        assert_eq!(
            ParamResolver::resolve(&json!("{{ params.n }}"), &p, &s, false).unwrap(),
            json!(42)
        );
        assert_eq!(
            ParamResolver::resolve(&json!("{{ params.flag }}"), &p, &s, false).unwrap(),
            json!(true)
        );
        assert_eq!(
            ParamResolver::resolve(&json!("{{ params.items }}"), &p, &s, false).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            ParamResolver::resolve(&json!("{{ params.cfg }}"), &p, &s, false).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_mixed_string_renders_to_string() {
        let p = params(json!({"name": "world", "n": 3}));
        let s = JsonMap::new();

        assert_eq!(
            ParamResolver::resolve(&json!("hello {{ params.name }}!"), &p, &s, false).unwrap(),
            json!("hello world!")
        );
        assert_eq!(
            ParamResolver::resolve(&json!("{{ params.n }} items"), &p, &s, false).unwrap(),
            json!("3 items")
        );
    }

    #[test]
    fn test_filters_render_then_infer() {
        let p = params(json!({"msg": "hi", "n": 41}));
        let s = JsonMap::new();

        assert_eq!(
            ParamResolver::resolve(&json!("{{ params.msg | upper }}"), &p, &s, false).unwrap(),
            json!("HI")
        );
        // Numeric result of a filtered expression comes back as a number
        assert_eq!(
            ParamResolver::resolve(&json!("{{ params.n | int }}"), &p, &s, false).unwrap(),
            json!(41)
        );
    }

    #[test]
    fn test_default_filter_on_missing_step() {
        let p = JsonMap::new();
        let s = JsonMap::new();

        let resolved = ParamResolver::resolve(
            &json!("{{ steps.foo.outputs.bar | default(\"x\") }}"),
            &p,
            &s,
            false,
        )
        .unwrap();
        assert_eq!(resolved, json!("x"));
    }

    #[test]
    fn test_step_output_access() {
        let p = JsonMap::new();
        let s = outputs_of(&[(
            "fetch",
            json!({"payload": {"ids": [10, 20]}, "count": 2}),
        )]);

        assert_eq!(
            ParamResolver::resolve(&json!("{{ steps.fetch.outputs.count }}"), &p, &s, true).unwrap(),
            json!(2)
        );
        assert_eq!(
            ParamResolver::resolve(
                &json!("{{ steps.fetch.outputs.payload.ids[1] }}"),
                &p,
                &s,
                true
            )
            .unwrap(),
            json!(20)
        );
    }

    #[test]
    fn test_unbalanced_braces() {
        let p = JsonMap::new();
        let s = JsonMap::new();
        let result = ParamResolver::resolve(&json!("{{ params.x"), &p, &s, false);
        assert!(matches!(result, Err(TemplateError::UnbalancedBraces { .. })));
    }

    #[test]
    fn test_strict_mode_undefined() {
        let p = params(json!({"present": 1}));
        let s = JsonMap::new();

        let result = ParamResolver::resolve(&json!("{{ params.missing }}"), &p, &s, true);
        assert!(matches!(
            result,
            Err(TemplateError::UndefinedVariable { .. })
        ));

        // Chained access through a missing step errors too
        let result = ParamResolver::resolve(&json!("{{ steps.nope.outputs.x }}"), &p, &s, true);
        assert!(matches!(
            result,
            Err(TemplateError::UndefinedVariable { .. })
        ));

        // A default rescues strict mode
        let resolved =
            ParamResolver::resolve(&json!("{{ params.missing | default(7) }}"), &p, &s, true)
                .unwrap();
        assert_eq!(resolved, json!(7));
    }

    #[test]
    fn test_non_strict_undefined_renders_empty() {
        let p = JsonMap::new();
        let s = JsonMap::new();

        assert_eq!(
            ParamResolver::resolve(&json!("{{ params.missing }}"), &p, &s, false).unwrap(),
            json!("")
        );
        assert_eq!(
            ParamResolver::resolve(&json!("v={{ steps.a.outputs.b }}"), &p, &s, false).unwrap(),
            json!("v=")
        );
    }

    #[test]
    fn test_nested_containers() {
        let p = params(json!({"name": "x", "n": 5}));
        let s = JsonMap::new();

        let value = json!({
            "label": "{{ params.name | upper }}",
            "counts": ["{{ params.n }}", 1],
            "nested": {"n": "{{ params.n }}"}
        });
        let resolved = ParamResolver::resolve(&value, &p, &s, true).unwrap();
        assert_eq!(
            resolved,
            json!({"label": "X", "counts": [5, 1], "nested": {"n": 5}})
        );
    }

    #[test]
    fn test_has_templates() {
        assert!(ParamResolver::has_templates(&json!("{{ params.x }}")));
        assert!(ParamResolver::has_templates(&json!({"a": ["{{ x }}"]})));
        assert!(!ParamResolver::has_templates(&json!({"a": [1, "plain"]})));
        assert!(!ParamResolver::has_templates(&json!(17)));
    }

    #[test]
    fn test_extract_variables() {
        let value = json!({
            "a": "{{ params.name }}",
            "b": "{{ steps.fetch.outputs.count }} of {{ params.total }}",
        });
        let variables = ParamResolver::extract_variables(&value);
        assert_eq!(
            variables.into_iter().collect::<Vec<_>>(),
            vec![
                "params.name".to_string(),
                "params.total".to_string(),
                "steps.fetch.outputs.count".to_string(),
            ]
        );
    }

    #[test]
    fn test_validate_references() {
        let known_params: HashSet<String> = ["name".to_string()].into();
        let known_steps: HashSet<String> = ["fetch".to_string()].into();

        let value = json!({
            "ok": "{{ params.name }} {{ steps.fetch.outputs.x }}",
            "bad": "{{ params.nope }} {{ steps.ghost.outputs.y }}",
        });
        let mut errors = ParamResolver::validate_references(&value, &known_params, &known_steps);
        errors.sort();
        assert_eq!(
            errors,
            vec!["Unknown parameter: nope".to_string(), "Unknown step: ghost".to_string()]
        );
    }
}
