//! Process-wide action catalog
//!
//! The registry maps action type names to metadata and executor factories.
//! Executors are constructed lazily on first use and memoized; the catalog
//! itself is read-mostly, with writes only at registration/discovery time.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::action::{ActionExecutor, ActionMeta, ParamType};
use crate::template::ParamResolver;
use crate::JsonMap;

/// Factory constructing an executor instance for an action type
pub type ExecutorFactory = Box<dyn Fn() -> Arc<dyn ActionExecutor> + Send + Sync>;

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Metadata failed the registration-time checks
    #[error("invalid action metadata: {0}")]
    InvalidMeta(String),

    /// Action type not registered
    #[error("unknown action type: {0}")]
    UnknownAction(String),

    /// A plugin failed during discovery
    #[error("plugin '{plugin}' failed to register: {detail}")]
    Plugin { plugin: String, detail: String },
}

/// A source of actions loaded during discovery
///
/// This is the component-discovery seam: deployments add plugins for their
/// domain actions, the engine ships one for the built-in set.
pub trait ActionPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, registry: &ActionRegistry) -> Result<(), RegistryError>;
}

struct Registration {
    meta: ActionMeta,
    factory: ExecutorFactory,
    executor: OnceLock<Arc<dyn ActionExecutor>>,
}

impl Registration {
    fn executor(&self) -> Arc<dyn ActionExecutor> {
        self.executor.get_or_init(|| (self.factory)()).clone()
    }
}

/// Catalog of action types
///
/// Thread-safe; intended to be created once at startup, populated through
/// [`discover`](Self::discover) and shared behind an `Arc`.
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<Registration>>>,
    plugins: Mutex<Vec<Box<dyn ActionPlugin>>>,
    discovered: AtomicBool,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
            plugins: Mutex::new(vec![]),
            discovered: AtomicBool::new(false),
        }
    }

    /// Register an action type
    ///
    /// A duplicate `type` replaces the earlier registration with a warning.
    pub fn register(&self, meta: ActionMeta, factory: ExecutorFactory) -> Result<(), RegistryError> {
        let errors = meta.validate();
        if !errors.is_empty() {
            return Err(RegistryError::InvalidMeta(errors.join("; ")));
        }

        let action_type = meta.action_type.clone();
        let registration = Arc::new(Registration {
            meta,
            factory,
            executor: OnceLock::new(),
        });

        let replaced = self
            .actions
            .write()
            .insert(action_type.clone(), registration);

        if replaced.is_some() {
            warn!(action_type = %action_type, "action re-registered; replacing earlier registration");
        }
        Ok(())
    }

    /// Add a plugin to be loaded by [`discover`](Self::discover)
    pub fn add_plugin(&self, plugin: Box<dyn ActionPlugin>) {
        self.plugins.lock().push(plugin);
    }

    /// One-shot plugin load; idempotent
    ///
    /// A failing plugin is logged and the remaining plugins continue to
    /// register.
    pub fn discover(&self) {
        let plugins = self.plugins.lock();
        if self.discovered.swap(true, Ordering::SeqCst) {
            return;
        }

        for plugin in plugins.iter() {
            match plugin.register(self) {
                Ok(()) => info!(plugin = plugin.name(), "registered action plugin"),
                Err(err) => {
                    warn!(plugin = plugin.name(), error = %err, "action plugin failed; continuing discovery");
                }
            }
        }
    }

    /// All registered action identifiers, sorted
    pub fn list(&self) -> Vec<String> {
        let mut types: Vec<String> = self.actions.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn has(&self, action_type: &str) -> bool {
        self.actions.read().contains_key(action_type)
    }

    pub fn get_meta(&self, action_type: &str) -> Option<ActionMeta> {
        self.actions.read().get(action_type).map(|r| r.meta.clone())
    }

    /// Lazily constructed, memoized executor for an action type
    pub fn executor(&self, action_type: &str) -> Result<Arc<dyn ActionExecutor>, RegistryError> {
        let registration = self
            .actions
            .read()
            .get(action_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAction(action_type.to_string()))?;
        Ok(registration.executor())
    }

    /// Metadata grouped by category, categories and actions sorted
    pub fn actions_by_category(&self) -> BTreeMap<String, Vec<ActionMeta>> {
        let mut grouped: BTreeMap<String, Vec<ActionMeta>> = BTreeMap::new();
        for registration in self.actions.read().values() {
            grouped
                .entry(registration.meta.category.clone())
                .or_default()
                .push(registration.meta.clone());
        }
        for actions in grouped.values_mut() {
            actions.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        }
        grouped
    }

    /// Validate parameter values against an action's metadata and its
    /// executor-specific checks. Returns every problem found.
    pub fn validate_params(&self, action_type: &str, params: &JsonMap) -> Vec<String> {
        let Some(registration) = self.actions.read().get(action_type).cloned() else {
            return vec![format!("unknown action type: {action_type}")];
        };

        let mut errors = validate_structural(&registration.meta, params);
        errors.extend(registration.executor().validate_params(params));
        errors
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.list())
            .finish()
    }
}

/// Structural parameter validation derived from the metadata
fn validate_structural(meta: &ActionMeta, params: &JsonMap) -> Vec<String> {
    let mut errors = vec![];

    for param in &meta.params {
        if let Some(visibility) = &param.visible_when {
            if !visibility.is_visible(params) {
                continue;
            }
        }

        let value = match params.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required && param.default.is_none() {
                    errors.push(format!("missing required parameter '{}'", param.name));
                }
                continue;
            }
            Some(value) => value,
        };

        // Template expressions are resolved at dispatch time; defer checks
        if ParamResolver::has_templates(value) {
            continue;
        }

        match param.param_type {
            ParamType::Text | ParamType::ModelRef | ParamType::ClusterRef | ParamType::ProjectRef => {
                let Some(s) = value.as_str() else {
                    errors.push(format!("parameter '{}' must be a string", param.name));
                    continue;
                };
                if let Some(rules) = &param.validation {
                    check_string_rules(&param.name, s, rules, &mut errors);
                }
            }
            ParamType::Number => {
                let Some(n) = value.as_f64() else {
                    errors.push(format!("parameter '{}' must be a number", param.name));
                    continue;
                };
                if let Some(rules) = &param.validation {
                    if let Some(min) = rules.min {
                        if n < min {
                            errors.push(format!("parameter '{}' must be >= {min}", param.name));
                        }
                    }
                    if let Some(max) = rules.max {
                        if n > max {
                            errors.push(format!("parameter '{}' must be <= {max}", param.name));
                        }
                    }
                }
            }
            ParamType::Boolean => {
                if !value.is_boolean() {
                    errors.push(format!("parameter '{}' must be a boolean", param.name));
                }
            }
            ParamType::Select => {
                let Some(s) = value.as_str() else {
                    errors.push(format!("parameter '{}' must be a string", param.name));
                    continue;
                };
                if !param.options.iter().any(|o| o.value == s) {
                    errors.push(format!(
                        "parameter '{}' has invalid option '{s}'",
                        param.name
                    ));
                }
            }
            ParamType::MultiSelect => {
                let Some(items) = value.as_array() else {
                    errors.push(format!("parameter '{}' must be a list", param.name));
                    continue;
                };
                for item in items {
                    let Some(s) = item.as_str() else {
                        errors.push(format!(
                            "parameter '{}' must be a list of strings",
                            param.name
                        ));
                        break;
                    };
                    if !param.options.iter().any(|o| o.value == s) {
                        errors.push(format!(
                            "parameter '{}' has invalid option '{s}'",
                            param.name
                        ));
                    }
                }
            }
            ParamType::Json => {
                // Any JSON value is acceptable
            }
        }
    }

    errors
}

fn check_string_rules(
    name: &str,
    value: &str,
    rules: &crate::action::ValidationRules,
    errors: &mut Vec<String>,
) {
    if let Some(min_length) = rules.min_length {
        if value.chars().count() < min_length {
            errors.push(format!(
                "parameter '{name}' must be at least {min_length} characters"
            ));
        }
    }
    if let Some(max_length) = rules.max_length {
        if value.chars().count() > max_length {
            errors.push(format!(
                "parameter '{name}' must be at most {max_length} characters"
            ));
        }
    }
    if let Some(pattern) = &rules.pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(value) {
                    let message = rules
                        .pattern_message
                        .clone()
                        .unwrap_or_else(|| format!("parameter '{name}' does not match {pattern}"));
                    errors.push(message);
                }
            }
            Err(_) => errors.push(format!("parameter '{name}' has an invalid pattern")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{
        ActionContext, ActionError, ActionResult, ParamDefinition, SelectOption, ValidationRules,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct StubAction;

    #[async_trait]
    impl ActionExecutor for StubAction {
        async fn execute(&self, _ctx: ActionContext) -> Result<ActionResult, ActionError> {
            Ok(ActionResult::ok(JsonMap::new()))
        }

        fn validate_params(&self, params: &JsonMap) -> Vec<String> {
            if params.contains_key("forbidden") {
                vec!["'forbidden' is not allowed".to_string()]
            } else {
                vec![]
            }
        }
    }

    fn stub_factory() -> ExecutorFactory {
        Box::new(|| Arc::new(StubAction))
    }

    fn simple_meta(action_type: &str) -> ActionMeta {
        ActionMeta::new(action_type, "Test", "Testing", "test action")
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ActionRegistry::new();
        registry.register(simple_meta("noop"), stub_factory()).unwrap();

        assert!(registry.has("noop"));
        assert!(!registry.has("missing"));
        assert_eq!(registry.list(), vec!["noop".to_string()]);
        assert_eq!(registry.get_meta("noop").unwrap().action_type, "noop");
        assert!(registry.executor("noop").is_ok());
        assert!(matches!(
            registry.executor("missing"),
            Err(RegistryError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_register_rejects_invalid_meta() {
        let registry = ActionRegistry::new();
        let result = registry.register(simple_meta(""), stub_factory());
        assert!(matches!(result, Err(RegistryError::InvalidMeta(_))));
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let registry = ActionRegistry::new();
        registry.register(simple_meta("dup"), stub_factory()).unwrap();

        let replacement = ActionMeta {
            description: "second registration".to_string(),
            ..simple_meta("dup")
        };
        registry.register(replacement, stub_factory()).unwrap();

        assert_eq!(registry.list().len(), 1);
        assert_eq!(
            registry.get_meta("dup").unwrap().description,
            "second registration"
        );
    }

    #[test]
    fn test_executor_is_memoized() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        let registry = ActionRegistry::new();
        registry
            .register(
                simple_meta("lazy"),
                Box::new(|| {
                    BUILDS.fetch_add(1, Ordering::SeqCst);
                    Arc::new(StubAction)
                }),
            )
            .unwrap();

        assert_eq!(BUILDS.load(Ordering::SeqCst), 0);
        let first = registry.executor("lazy").unwrap();
        let second = registry.executor("lazy").unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_actions_by_category() {
        let registry = ActionRegistry::new();
        registry.register(simple_meta("b_action"), stub_factory()).unwrap();
        registry.register(simple_meta("a_action"), stub_factory()).unwrap();

        let grouped = registry.actions_by_category();
        let testing = &grouped["Testing"];
        assert_eq!(testing.len(), 2);
        assert_eq!(testing[0].action_type, "a_action");
    }

    #[test]
    fn test_validate_params_structural_and_executor() {
        let registry = ActionRegistry::new();
        let meta = ActionMeta {
            params: vec![
                ParamDefinition::new("name", "Name", ParamType::Text)
                    .required()
                    .with_validation(ValidationRules {
                        min_length: Some(2),
                        ..Default::default()
                    }),
                ParamDefinition::new("mode", "Mode", ParamType::Select).with_options(vec![
                    SelectOption::new("fast", "Fast"),
                    SelectOption::new("slow", "Slow"),
                ]),
                ParamDefinition::new("count", "Count", ParamType::Number).with_validation(
                    ValidationRules {
                        min: Some(1.0),
                        max: Some(10.0),
                        ..Default::default()
                    },
                ),
            ],
            ..simple_meta("checked")
        };
        registry.register(meta, stub_factory()).unwrap();

        // Missing required param
        let errors = registry.validate_params("checked", &JsonMap::new());
        assert!(errors.iter().any(|e| e.contains("missing required")));

        // Bad option, out-of-range number, executor-specific failure
        let params = json!({
            "name": "x",
            "mode": "warp",
            "count": 99,
            "forbidden": true
        })
        .as_object()
        .cloned()
        .unwrap();
        let errors = registry.validate_params("checked", &params);
        assert!(errors.iter().any(|e| e.contains("at least 2 characters")));
        assert!(errors.iter().any(|e| e.contains("invalid option 'warp'")));
        assert!(errors.iter().any(|e| e.contains("<= 10")));
        assert!(errors.iter().any(|e| e.contains("not allowed")));

        // Template values defer structural checks
        let params = json!({"name": "{{ params.n }}", "count": "{{ params.c }}"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(registry.validate_params("checked", &params).is_empty());

        // Unknown action type
        let errors = registry.validate_params("ghost", &JsonMap::new());
        assert_eq!(errors, vec!["unknown action type: ghost".to_string()]);
    }

    #[test]
    fn test_discovery_is_idempotent() {
        struct CountingPlugin(Arc<AtomicUsize>);

        impl ActionPlugin for CountingPlugin {
            fn name(&self) -> &str {
                "counting"
            }

            fn register(&self, registry: &ActionRegistry) -> Result<(), RegistryError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                registry.register(simple_meta("discovered"), stub_factory())
            }
        }

        struct FailingPlugin;

        impl ActionPlugin for FailingPlugin {
            fn name(&self) -> &str {
                "failing"
            }

            fn register(&self, _registry: &ActionRegistry) -> Result<(), RegistryError> {
                Err(RegistryError::Plugin {
                    plugin: "failing".to_string(),
                    detail: "broken".to_string(),
                })
            }
        }

        let registry = ActionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        // The failing plugin comes first; discovery must continue past it
        registry.add_plugin(Box::new(FailingPlugin));
        registry.add_plugin(Box::new(CountingPlugin(calls.clone())));

        registry.discover();
        registry.discover();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.has("discovered"));
    }
}
