//! Event router
//!
//! Routes incoming external events to the step awaiting them. The event's
//! workflow id is looked up, the step's action handler decides what the
//! event means, and the step is closed or its progress updated. Routing
//! errors never propagate: at worst the event is ignored and the timeout
//! scheduler resolves the step later.

use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use cascade_core::{sanitize, EventAction, EventContext, StepStatus};
use cascade_storage::{StepExecution, StepPatch};

use crate::engine::ExecutionEngine;

/// Result of routing an event
#[derive(Debug, Clone)]
pub struct EventRouteResult {
    /// Whether the event reached a handler
    pub routed: bool,

    /// Step execution that received the event
    pub step_execution_id: Option<Uuid>,

    /// Action the handler took
    pub action_taken: Option<EventAction>,

    /// Whether the step reached a terminal state
    pub step_completed: bool,

    /// Final status if the step was completed
    pub final_status: Option<StepStatus>,

    /// Error message if routing failed or the write was dropped
    pub error: Option<String>,
}

impl EventRouteResult {
    fn unrouted(error: impl Into<String>) -> Self {
        Self {
            routed: false,
            step_execution_id: None,
            action_taken: None,
            step_completed: false,
            final_status: None,
            error: Some(error.into()),
        }
    }
}

/// Routes external events to awaiting steps
#[derive(Clone)]
pub struct EventRouter {
    engine: Arc<ExecutionEngine>,
}

impl EventRouter {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    /// Extract the external workflow id from an event payload
    ///
    /// Sources publish the id in different places; the first non-empty of
    /// these wins:
    /// 1. `workflow_id`
    /// 2. `payload.workflow_id`
    /// 3. `notification_metadata.workflow_id`
    /// 4. `payload.content.result.workflow_id`
    pub fn extract_workflow_id(event: &Value) -> Option<String> {
        let candidates = [
            event.get("workflow_id"),
            event.pointer("/payload/workflow_id"),
            event.pointer("/notification_metadata/workflow_id"),
            event.pointer("/payload/content/result/workflow_id"),
        ];

        for candidate in candidates.into_iter().flatten() {
            match candidate {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
        None
    }

    /// Route an incoming event to the step awaiting it
    #[instrument(skip(self, event))]
    pub async fn route_event(&self, event: Value) -> EventRouteResult {
        let Some(workflow_id) = Self::extract_workflow_id(&event) else {
            debug!("event has no workflow id, cannot route");
            return EventRouteResult::unrouted("No workflow_id in event");
        };

        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        info!(%workflow_id, %event_type, "routing event");

        let step = match self
            .engine
            .store()
            .get_step_by_external_workflow_id(&workflow_id)
            .await
        {
            Ok(Some(step)) => step,
            Ok(None) => {
                // Not fatal: the event may already have been handled
                debug!(%workflow_id, "no step awaiting event");
                return EventRouteResult::unrouted(format!(
                    "No step awaiting event for workflow_id={workflow_id}"
                ));
            }
            Err(err) => {
                error!(error = %err, "step lookup failed");
                return EventRouteResult::unrouted(err.to_string());
            }
        };

        let executor = match self.engine.registry().executor(&step.handler_type) {
            Ok(executor) => executor,
            Err(err) => {
                error!(handler_type = %step.handler_type, error = %err, "handler not found");
                return EventRouteResult {
                    routed: false,
                    step_execution_id: Some(step.id),
                    action_taken: None,
                    step_completed: false,
                    final_status: None,
                    error: Some(err.to_string()),
                };
            }
        };

        let ctx = EventContext {
            step_execution_id: step.id,
            execution_id: step.execution_id,
            external_workflow_id: workflow_id.clone(),
            event_type,
            event_data: event,
            step_outputs: step.outputs_map(),
        };

        let result = match executor.on_event(ctx).await {
            Ok(result) => result,
            Err(err) => {
                // The step stays waiting; the timeout scheduler backstops it
                warn!(step_id = %step.step_id, error = %err, "handler on_event raised");
                return EventRouteResult {
                    routed: true,
                    step_execution_id: Some(step.id),
                    action_taken: Some(EventAction::Ignore),
                    step_completed: false,
                    final_status: None,
                    error: Some(format!("Handler on_event raised: {err}")),
                };
            }
        };

        match result.action {
            EventAction::Complete => {
                let final_status = result.status.unwrap_or(StepStatus::Completed);

                // Merge handler outputs into the step's existing outputs
                let mut merged = step.outputs_map();
                for (key, value) in sanitize::redact_outputs(&result.outputs) {
                    merged.insert(key, value);
                }

                match self
                    .engine
                    .store()
                    .complete_step_from_event(
                        step.id,
                        step.version,
                        final_status,
                        Value::Object(merged),
                        result.error,
                    )
                    .await
                {
                    Ok(_) => {
                        info!(step_id = %step.step_id, status = %final_status, "step completed via event");
                        self.continue_pipeline(step.execution_id, step.id).await;
                        EventRouteResult {
                            routed: true,
                            step_execution_id: Some(step.id),
                            action_taken: Some(EventAction::Complete),
                            step_completed: true,
                            final_status: Some(final_status),
                            error: None,
                        }
                    }
                    Err(err) if err.is_conflict() => {
                        // Idempotent drop: a concurrent event won the race
                        debug!(step_id = %step.step_id, "completion conflict; event dropped");
                        EventRouteResult {
                            routed: true,
                            step_execution_id: Some(step.id),
                            action_taken: Some(EventAction::Complete),
                            step_completed: false,
                            final_status: None,
                            error: Some(err.to_string()),
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "failed to complete step from event");
                        EventRouteResult {
                            routed: true,
                            step_execution_id: Some(step.id),
                            action_taken: Some(EventAction::Complete),
                            step_completed: false,
                            final_status: None,
                            error: Some(err.to_string()),
                        }
                    }
                }
            }

            EventAction::UpdateProgress => {
                if let Some(progress) = result.progress {
                    let progress = Decimal::from_f64(progress)
                        .unwrap_or(Decimal::ZERO)
                        .round_dp(2);
                    if let Err(err) = self
                        .engine
                        .store()
                        .update_step(
                            step.id,
                            step.version,
                            StepPatch {
                                progress_percentage: Some(progress),
                                ..Default::default()
                            },
                        )
                        .await
                    {
                        // Progress hints are best-effort
                        debug!(step_id = %step.step_id, error = %err, "progress update dropped");
                    } else {
                        info!(step_id = %step.step_id, %progress, "step progress updated");
                    }
                }
                EventRouteResult {
                    routed: true,
                    step_execution_id: Some(step.id),
                    action_taken: Some(EventAction::UpdateProgress),
                    step_completed: false,
                    final_status: None,
                    error: None,
                }
            }

            EventAction::Ignore => {
                debug!(step_id = %step.step_id, "handler ignored event");
                EventRouteResult {
                    routed: true,
                    step_execution_id: Some(step.id),
                    action_taken: Some(EventAction::Ignore),
                    step_completed: false,
                    final_status: None,
                    error: None,
                }
            }
        }
    }

    /// Close a step whose event-wait deadline elapsed
    ///
    /// Called by the timeout scheduler; the step is marked TIMEOUT and the
    /// pipeline continues so aggregation can run.
    #[instrument(skip(self, step), fields(step_id = %step.step_id))]
    pub async fn process_timeout(&self, step: &StepExecution) -> EventRouteResult {
        let workflow_id = step.external_workflow_id.as_deref().unwrap_or("unknown");
        let error_message = format!(
            "Step timed out waiting for event from workflow {workflow_id}"
        );

        match self
            .engine
            .store()
            .complete_step_from_event(
                step.id,
                step.version,
                StepStatus::Timeout,
                serde_json::json!({"timeout": true}),
                Some(error_message),
            )
            .await
        {
            Ok(_) => {
                warn!(%workflow_id, "step timed out waiting for event");
                self.continue_pipeline(step.execution_id, step.id).await;
                EventRouteResult {
                    routed: true,
                    step_execution_id: Some(step.id),
                    action_taken: Some(EventAction::Complete),
                    step_completed: true,
                    final_status: Some(StepStatus::Timeout),
                    error: None,
                }
            }
            Err(err) => {
                // A racing event completion is fine; anything else is logged
                if !err.is_conflict() {
                    error!(error = %err, "failed to time out step");
                }
                EventRouteResult {
                    routed: false,
                    step_execution_id: Some(step.id),
                    action_taken: None,
                    step_completed: false,
                    final_status: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// All steps currently awaiting events (debugging/monitoring)
    pub async fn steps_awaiting_events(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, crate::error::EngineError> {
        Ok(self
            .engine
            .store()
            .get_awaiting_steps_for_execution(execution_id)
            .await?)
    }

    async fn continue_pipeline(&self, execution_id: Uuid, step_id: Uuid) {
        let step = match self.engine.store().get_step(step_id).await {
            Ok(Some(step)) => step,
            _ => return,
        };
        if let Err(err) = self
            .engine
            .continue_execution(execution_id, Some(&step))
            .await
        {
            error!(%execution_id, error = %err, "pipeline continuation failed");
        }
    }
}
