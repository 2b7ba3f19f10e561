//! Action contract and metadata
//!
//! This module contains the plug-in surface of the engine:
//! - [`ActionMeta`]: declarative description of an action for discovery,
//!   validation and UI rendering
//! - [`ActionExecutor`]: the two-call contract (`execute` / `on_event`)
//! - [`ActionContext`] / [`ActionResult`] and [`EventContext`] /
//!   [`EventResult`]: the value objects flowing in and out
//! - [`ServiceInvoker`]: the seam through which actions reach downstream
//!   microservices

mod context;
mod executor;
mod meta;
mod result;
mod service;

pub use context::{ActionContext, EventContext};
pub use executor::{ActionError, ActionExecutor};
pub use meta::{
    ActionMeta, ConditionalVisibility, ExecutionMode, OutputDefinition, ParamDefinition,
    ParamType, RetryPolicy, SelectOption, ValidationRules,
};
pub use result::{ActionResult, EventAction, EventResult};
pub use service::{NoServices, ServiceError, ServiceInvoker, ServiceRequest};
