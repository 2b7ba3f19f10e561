//! Pipeline definition model
//!
//! A pipeline is a DAG of steps. The definition is an interpreted
//! document: it is stored verbatim on the execution record and walked by
//! the engine, never compiled to code.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::ParamType;
use crate::JsonMap;

/// Error from pipeline definition validation
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid pipeline definition: {message}")]
pub struct DefinitionError {
    pub message: String,
}

impl DefinitionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Declared workflow parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParam {
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<ParamType>,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A single step in the DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Action type resolved through the registry at dispatch time
    pub action_type: String,

    /// Parameter values; strings may carry template expressions
    #[serde(default)]
    pub params: JsonMap,

    /// Upstream step ids; satisfied by any terminal state (SKIPPED included)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Upstream step ids that must be COMPLETED; a skipped or failed hard
    /// dependency skips this step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hard_depends_on: Vec<String>,

    /// Run even when every upstream was SKIPPED
    #[serde(default)]
    pub independent: bool,
}

impl StepDefinition {
    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.step_id)
    }

    /// All upstream ids, plain and hard
    pub fn upstream_ids(&self) -> impl Iterator<Item = &String> {
        self.depends_on.iter().chain(self.hard_depends_on.iter())
    }
}

/// Complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<PipelineParam>,

    pub steps: Vec<StepDefinition>,

    /// Mapping of output name to a template expression resolved over the
    /// accumulated step outputs when the execution completes
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub final_outputs: JsonMap,
}

impl PipelineDefinition {
    /// Structural validation: step ids unique, dependencies defined, no
    /// self-dependency, DAG acyclic. Returns every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        if self.steps.is_empty() {
            errors.push("pipeline has no steps".to_string());
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.step_id.trim().is_empty() {
                errors.push("step with empty step_id".to_string());
                continue;
            }
            if !ids.insert(step.step_id.as_str()) {
                errors.push(format!("duplicate step_id '{}'", step.step_id));
            }
            if step.action_type.trim().is_empty() {
                errors.push(format!("step '{}' has no action_type", step.step_id));
            }
        }

        for step in &self.steps {
            for dep in step.upstream_ids() {
                if dep == &step.step_id {
                    errors.push(format!("step '{}' depends on itself", step.step_id));
                } else if !ids.contains(dep.as_str()) {
                    errors.push(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.step_id, dep
                    ));
                }
            }
        }

        if errors.is_empty() && self.execution_order().is_err() {
            errors.push("pipeline contains a dependency cycle".to_string());
        }

        errors
    }

    /// Dependency-respecting order (Kahn), stable by declaration order
    pub fn execution_order(&self) -> Result<Vec<&StepDefinition>, DefinitionError> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.step_id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![vec![]; self.steps.len()];

        for (i, step) in self.steps.iter().enumerate() {
            for dep in step.upstream_ids() {
                let Some(&d) = index.get(dep.as_str()) else {
                    return Err(DefinitionError::new(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.step_id, dep
                    )));
                };
                if d == i {
                    return Err(DefinitionError::new(format!(
                        "step '{}' depends on itself",
                        step.step_id
                    )));
                }
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.steps.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(i) = queue.pop_front() {
            order.push(&self.steps[i]);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != self.steps.len() {
            return Err(DefinitionError::new("dependency cycle detected"));
        }
        Ok(order)
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Steps that list `step_id` among their upstreams
    pub fn successors(&self, step_id: &str) -> Vec<&StepDefinition> {
        self.steps
            .iter()
            .filter(|s| s.upstream_ids().any(|d| d == step_id))
            .collect()
    }

    pub fn step_ids(&self) -> HashSet<String> {
        self.steps.iter().map(|s| s.step_id.clone()).collect()
    }

    pub fn param_names(&self) -> HashSet<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    /// Merge provided workflow params with declared defaults; missing
    /// required params are reported as errors.
    pub fn apply_param_defaults(&self, provided: &JsonMap) -> Result<JsonMap, DefinitionError> {
        let mut merged = provided.clone();
        let mut missing = vec![];

        for param in &self.params {
            if merged.contains_key(&param.name) {
                continue;
            }
            match (&param.default, param.required) {
                (Some(default), _) => {
                    merged.insert(param.name.clone(), default.clone());
                }
                (None, true) => missing.push(param.name.clone()),
                (None, false) => {}
            }
        }

        if missing.is_empty() {
            Ok(merged)
        } else {
            Err(DefinitionError::new(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )))
        }
    }
}
