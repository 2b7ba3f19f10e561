//! Built-in actions
//!
//! Generic control-flow actions shipped with the engine. Domain actions
//! (model onboarding, cluster operations, ...) live in deployment plugins
//! and follow the same contract; `remote_workflow` is the event-driven
//! template they build on.

mod builtin;
mod remote;

pub use builtin::{
    AggregateAction, ConditionalAction, DelayAction, FailAction, LogAction, SetOutputAction,
    TransformAction,
};
pub use remote::RemoteWorkflowAction;

use cascade_core::{ActionPlugin, ActionRegistry, RegistryError};

/// Plugin registering the built-in action set
///
/// Add it to the registry and call `discover()`:
///
/// ```
/// use cascade_core::ActionRegistry;
/// use cascade_engine::BuiltinActions;
///
/// let registry = ActionRegistry::new();
/// registry.add_plugin(Box::new(BuiltinActions));
/// registry.discover();
/// assert!(registry.has("log"));
/// ```
pub struct BuiltinActions;

impl ActionPlugin for BuiltinActions {
    fn name(&self) -> &str {
        "builtin"
    }

    fn register(&self, registry: &ActionRegistry) -> Result<(), RegistryError> {
        registry.register(builtin::log_meta(), Box::new(|| std::sync::Arc::new(LogAction)))?;
        registry.register(
            builtin::delay_meta(),
            Box::new(|| std::sync::Arc::new(DelayAction)),
        )?;
        registry.register(
            builtin::transform_meta(),
            Box::new(|| std::sync::Arc::new(TransformAction)),
        )?;
        registry.register(
            builtin::aggregate_meta(),
            Box::new(|| std::sync::Arc::new(AggregateAction)),
        )?;
        registry.register(
            builtin::set_output_meta(),
            Box::new(|| std::sync::Arc::new(SetOutputAction)),
        )?;
        registry.register(builtin::fail_meta(), Box::new(|| std::sync::Arc::new(FailAction)))?;
        registry.register(
            builtin::conditional_meta(),
            Box::new(|| std::sync::Arc::new(ConditionalAction)),
        )?;
        registry.register(
            remote::remote_workflow_meta(),
            Box::new(|| std::sync::Arc::new(RemoteWorkflowAction)),
        )?;
        Ok(())
    }
}
