//! # Cascade Core
//!
//! Contracts and pure logic for the Cascade workflow execution engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ActionRegistry                          │
//! │  (catalog of action types, lazy executor construction)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              ActionExecutor (execute / on_event)             │
//! │  (two-call contract for sync and event-driven actions)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            ParamResolver / ConditionEvaluator                │
//! │  (template expressions over params and step outputs)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The execution engine, persistence layer and background workers build on
//! these types from the `cascade-engine` and `cascade-storage` crates.

pub mod action;
pub mod pipeline;
pub mod registry;
pub mod sanitize;
pub mod status;
pub mod template;

/// Prelude for common imports
pub mod prelude {
    pub use crate::action::{
        ActionContext, ActionError, ActionExecutor, ActionMeta, ActionResult, EventAction,
        EventContext, EventResult, ExecutionMode, OutputDefinition, ParamDefinition, ParamType,
        RetryPolicy, ServiceError, ServiceInvoker, ServiceRequest,
    };
    pub use crate::pipeline::{PipelineDefinition, PipelineParam, StepDefinition};
    pub use crate::registry::{ActionPlugin, ActionRegistry, RegistryError};
    pub use crate::status::{DeliveryStatus, ExecutionStatus, ProgressEventType, StepStatus};
    pub use crate::template::{ConditionEvaluator, ParamResolver, TemplateError};
}

// Re-export key types at crate root
pub use action::{
    ActionContext, ActionError, ActionExecutor, ActionMeta, ActionResult, EventAction,
    EventContext, EventResult, ExecutionMode, NoServices, OutputDefinition, ParamDefinition,
    ParamType, RetryPolicy, SelectOption, ServiceError, ServiceInvoker, ServiceRequest,
    ValidationRules,
};
pub use pipeline::{DefinitionError, PipelineDefinition, PipelineParam, StepDefinition};
pub use registry::{ActionPlugin, ActionRegistry, RegistryError};
pub use sanitize::redact_sensitive;
pub use status::{DeliveryStatus, ExecutionStatus, ProgressEventType, StepStatus};
pub use template::{ConditionEvaluator, ParamResolver, TemplateError};

/// JSON object map used for params and outputs throughout the engine
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
