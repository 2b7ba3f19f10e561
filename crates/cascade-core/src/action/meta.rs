//! Declarative action metadata
//!
//! `ActionMeta` is materialized data, not reflected code: UI clients and
//! the validation layer consume the enumerated parameter type tags and
//! rule fields directly.

use serde::{Deserialize, Serialize};

/// How an action completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// `execute` returns the final result in one call
    Sync,

    /// `execute` returns a wait marker; completion arrives via `on_event`
    EventDriven,
}

/// Closed set of parameter type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Text,
    Number,
    Boolean,
    Select,
    MultiSelect,
    Json,
    ModelRef,
    ClusterRef,
    ProjectRef,
}

impl ParamType {
    /// Select-flavoured tags require a non-empty option list
    pub fn requires_options(self) -> bool {
        matches!(self, Self::Select | Self::MultiSelect)
    }
}

/// A selectable option for select/multiselect parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Validation bounds for a parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Regular expression the string value must match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Message shown when the pattern does not match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_message: Option<String>,
}

/// Conditional visibility predicate for a parameter
///
/// The parameter is shown (and validated) only when the referenced
/// parameter's value matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalVisibility {
    /// Name of the controlling parameter
    pub param: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_equals: Option<serde_json::Value>,
}

impl ConditionalVisibility {
    /// Evaluate against the provided parameter values
    pub fn is_visible(&self, params: &serde_json::Map<String, serde_json::Value>) -> bool {
        let actual = params.get(&self.param).cloned().unwrap_or(serde_json::Value::Null);
        if let Some(expected) = &self.equals {
            if &actual != expected {
                return false;
            }
        }
        if let Some(excluded) = &self.not_equals {
            if &actual == excluded {
                return false;
            }
        }
        true
    }
}

/// Definition of a single action parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDefinition {
    pub name: String,

    pub label: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,

    /// Options for select/multiselect types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<ConditionalVisibility>,
}

impl ParamDefinition {
    pub fn new(name: impl Into<String>, label: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            placeholder: None,
            options: vec![],
            validation: None,
            visible_when: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: Vec<SelectOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_validation(mut self, validation: ValidationRules) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn visible_when(mut self, visibility: ConditionalVisibility) -> Self {
        self.visible_when = Some(visibility);
        self
    }
}

/// Declared output of an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub output_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OutputDefinition {
    pub fn new(name: impl Into<String>, output_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_type: output_type.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Retry policy attached to an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,

    /// Multiplier applied to the interval after each attempt
    pub backoff_multiplier: f64,

    /// Delay before the first retry
    pub initial_interval_seconds: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2.0,
            initial_interval_seconds: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based); attempt 1 has no delay
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        if attempt <= 1 {
            return std::time::Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        let seconds = self.initial_interval_seconds * self.backoff_multiplier.powi(exponent);
        std::time::Duration::from_secs_f64(seconds.max(0.0))
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Static, declarative description of an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMeta {
    /// Unique identifier across the registry
    #[serde(rename = "type")]
    pub action_type: String,

    pub version: String,

    pub name: String,

    pub category: String,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputDefinition>,

    pub execution_mode: ExecutionMode,

    /// Event-wait deadline for event-driven actions; the engine falls back
    /// to its configured default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    #[serde(default)]
    pub idempotent: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_services: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_permissions: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
}

impl ActionMeta {
    /// Minimal sync action metadata; callers fill in the rest with struct
    /// update syntax or the builder-style setters on the field types.
    pub fn new(
        action_type: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            version: "1.0.0".to_string(),
            name: name.into(),
            category: category.into(),
            description: description.into(),
            icon: None,
            color: None,
            params: vec![],
            outputs: vec![],
            execution_mode: ExecutionMode::Sync,
            timeout_seconds: None,
            retry_policy: None,
            idempotent: false,
            required_services: vec![],
            required_permissions: vec![],
            docs_url: None,
        }
    }

    /// Structural validity checks applied at registration time
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        if self.action_type.trim().is_empty() {
            errors.push("action type must not be blank".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for param in &self.params {
            if param.name.trim().is_empty() {
                errors.push(format!(
                    "action '{}' has a parameter with an empty name",
                    self.action_type
                ));
                continue;
            }
            if !seen.insert(param.name.as_str()) {
                errors.push(format!(
                    "action '{}' declares parameter '{}' more than once",
                    self.action_type, param.name
                ));
            }
            if param.param_type.requires_options() && param.options.is_empty() {
                errors.push(format!(
                    "parameter '{}' of action '{}' is a select type with no options",
                    param.name, self.action_type
                ));
            }
        }

        errors
    }
}
