//! # Cascade Engine
//!
//! Orchestration layer of the Cascade workflow engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExecutionEngine                          │
//! │  (DAG interpretation, dispatch waves, progress, finalize)   │
//! └─────────────────────────────────────────────────────────────┘
//!            │                    │                    │
//!            ▼                    ▼                    ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │   EventRouter    │ │ TimeoutScheduler │ │ RetentionWorker  │
//! │ (event → step)   │ │ (deadline sweep) │ │  (daily sweep)   │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!                              │
//!                              ▼
//!                    PipelineStore (cascade-storage)
//! ```
//!
//! Event-driven steps suspend the *step*, not a worker: `execute` returns
//! a wait marker, and the step is completed later by the event router or
//! the timeout scheduler.

pub mod actions;
pub mod config;
pub mod engine;
pub mod error;
pub mod retention;
pub mod router;
pub mod subscriptions;
pub mod timeout;

/// Prelude for common imports
pub mod prelude {
    pub use crate::actions::BuiltinActions;
    pub use crate::config::EngineConfig;
    pub use crate::engine::{
        ExecutionEngine, ExecutionPage, ProgressDetail, ProgressView, StartRequest,
    };
    pub use crate::error::EngineError;
    pub use crate::retention::{RetentionSummary, RetentionWorker};
    pub use crate::router::{EventRouteResult, EventRouter};
    pub use crate::subscriptions::SubscriptionManager;
    pub use crate::timeout::TimeoutScheduler;
}

pub use actions::BuiltinActions;
pub use config::EngineConfig;
pub use engine::{ExecutionEngine, ExecutionPage, ProgressDetail, ProgressView, StartRequest};
pub use error::EngineError;
pub use retention::{RetentionSummary, RetentionWorker};
pub use router::{EventRouteResult, EventRouter};
pub use subscriptions::SubscriptionManager;
pub use timeout::TimeoutScheduler;
