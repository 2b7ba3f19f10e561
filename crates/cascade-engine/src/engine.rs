//! Execution engine
//!
//! Interprets a pipeline DAG: materializes step rows, dispatches ready
//! steps in concurrent waves, applies conditional routing, aggregates
//! progress and finalizes the execution. Sync actions complete within
//! their dispatch; event-driven actions leave the step RUNNING with a
//! wait marker and the engine returns control until the event router or
//! timeout scheduler resumes the pipeline.
//!
//! Concurrent runners (a wave racing an event continuation) are safe: all
//! state transitions go through optimistic version checks, so the first
//! writer wins and the loser re-reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use cascade_core::{
    sanitize, ActionContext, ActionResult, ActionRegistry, ExecutionStatus, JsonMap,
    ParamResolver, PipelineDefinition, ServiceInvoker, StepDefinition, StepStatus,
};
use cascade_storage::{
    ExecutionFilter, ExecutionPatch, NewExecution, NewProgressEvent, NewStepExecution,
    PageRequest, PipelineExecution, PipelineStore, ProgressEvent, StepExecution, StepPatch,
    StoreError,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::subscriptions::SubscriptionManager;

/// Document persisted on the execution row: the DAG plus the workflow
/// parameter values it was started with
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExecutionDocument {
    definition: PipelineDefinition,
    params: JsonMap,
}

/// Request to start a pipeline execution
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub definition: PipelineDefinition,
    pub params: JsonMap,
    /// Defaults to the configured system user
    pub initiator: Option<String>,
    pub callback_topics: Vec<String>,
}

impl StartRequest {
    pub fn new(definition: PipelineDefinition) -> Self {
        Self {
            definition,
            params: JsonMap::new(),
            initiator: None,
            callback_topics: vec![],
        }
    }

    pub fn with_params(mut self, params: JsonMap) -> Self {
        self.params = params;
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    pub fn with_callback_topics(mut self, topics: Vec<String>) -> Self {
        self.callback_topics = topics;
        self
    }
}

/// Level of detail for a progress view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressDetail {
    Summary,
    Steps,
    Full,
}

/// Progress view assembled for the read side
#[derive(Debug, Clone)]
pub struct ProgressView {
    pub execution: PipelineExecution,
    pub steps: Option<Vec<StepExecution>>,
    pub recent_events: Option<Vec<ProgressEvent>>,
    pub aggregated_progress: Decimal,
}

/// Paginated execution listing
#[derive(Debug, Clone)]
pub struct ExecutionPage {
    pub items: Vec<PipelineExecution>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

/// The workflow execution engine
pub struct ExecutionEngine {
    store: Arc<dyn PipelineStore>,
    registry: Arc<ActionRegistry>,
    services: Arc<dyn ServiceInvoker>,
    subscriptions: SubscriptionManager,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        registry: Arc<ActionRegistry>,
        services: Arc<dyn ServiceInvoker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            subscriptions: SubscriptionManager::new(store.clone()),
            store,
            registry,
            services,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Start / run
    // =========================================================================

    /// Validate and persist a new execution without dispatching any step
    ///
    /// The execution is created PENDING, its step rows are materialized in
    /// dependency order, subscriptions are registered, and the execution
    /// transitions to RUNNING.
    #[instrument(skip(self, request), fields(pipeline = request.definition.name.as_deref().unwrap_or("unnamed")))]
    pub async fn start(&self, request: StartRequest) -> Result<PipelineExecution, EngineError> {
        let mut errors = request.definition.validate();

        let step_ids = request.definition.step_ids();
        let param_names = request.definition.param_names();

        for step in &request.definition.steps {
            if !self.registry.has(&step.action_type) {
                errors.push(format!(
                    "step '{}' uses unknown action type '{}'",
                    step.step_id, step.action_type
                ));
                continue;
            }
            errors.extend(
                self.registry
                    .validate_params(&step.action_type, &step.params)
                    .into_iter()
                    .map(|e| format!("step '{}': {e}", step.step_id)),
            );
            errors.extend(
                ParamResolver::validate_references(
                    &Value::Object(step.params.clone()),
                    &param_names,
                    &step_ids,
                )
                .into_iter()
                .map(|e| format!("step '{}': {e}", step.step_id)),
            );
        }

        let (_, invalid_topics) = self.subscriptions.validate_topics(&request.callback_topics);
        for topic in &invalid_topics {
            errors.push(format!("invalid callback topic '{topic}'"));
        }

        let params = match request.definition.apply_param_defaults(&request.params) {
            Ok(params) => params,
            Err(err) => {
                errors.push(err.message);
                JsonMap::new()
            }
        };

        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let ordered: Vec<StepDefinition> = request
            .definition
            .execution_order()
            .map_err(|e| EngineError::Validation(vec![e.message]))?
            .into_iter()
            .cloned()
            .collect();

        let document = ExecutionDocument {
            definition: request.definition,
            params,
        };
        let initiator = request
            .initiator
            .unwrap_or_else(|| self.config.system_user_id.clone());

        let execution = self
            .store
            .create_execution(NewExecution::new(
                serde_json::to_value(&document)?,
                initiator,
            ))
            .await?;

        let new_steps = ordered
            .iter()
            .enumerate()
            .map(|(i, step)| NewStepExecution {
                execution_id: execution.id,
                step_id: step.step_id.clone(),
                step_name: step.display_name().to_string(),
                handler_type: step.action_type.clone(),
                sequence_number: (i + 1) as i32,
            })
            .collect();
        self.store.insert_steps(new_steps).await?;

        self.subscriptions
            .create_subscriptions(execution.id, &request.callback_topics)
            .await?;

        self.store
            .update_execution(
                execution.id,
                execution.version,
                ExecutionPatch {
                    status: Some(ExecutionStatus::Running),
                    start_time: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        info!(execution_id = %execution.id, steps = ordered.len(), "started execution");
        self.require_execution(execution.id).await
    }

    /// Start an execution and drive it until it finishes or suspends on
    /// event-driven steps
    pub async fn execute(&self, request: StartRequest) -> Result<PipelineExecution, EngineError> {
        let execution = self.start(request).await?;
        self.run(execution.id).await
    }

    /// Drive an execution: dispatch ready steps in waves until the
    /// pipeline completes, fails, or only awaiting steps remain
    #[instrument(skip(self))]
    pub async fn run(&self, execution_id: Uuid) -> Result<PipelineExecution, EngineError> {
        loop {
            let execution = self.require_execution(execution_id).await?;
            if execution.status.is_terminal() {
                return Ok(execution);
            }

            let document = parse_document(&execution)?;
            let steps = self.store.get_steps_for_execution(execution_id).await?;

            let skipped = self.propagate_skips(execution_id, &document.definition, &steps).await?;
            if skipped > 0 {
                self.record_progress(execution_id, None).await?;
                continue;
            }

            let ready = compute_ready(&document.definition, &steps);
            if ready.is_empty() {
                if steps.iter().any(|s| !s.status.is_terminal()) {
                    // Waiting on event-driven steps (or a concurrent runner)
                    return Ok(execution);
                }
                return self.finalize(execution, &document, &steps).await;
            }

            let prior_outputs = collect_outputs(&steps);
            let dispatches = ready.into_iter().map(|definition| {
                let row = steps
                    .iter()
                    .find(|s| s.step_id == definition.step_id)
                    .expect("ready step has a row");
                self.dispatch_step(&document, definition, row, &prior_outputs)
            });
            join_all(dispatches).await;
        }
    }

    /// Resume a pipeline after a step was completed externally (event
    /// router or timeout scheduler)
    pub async fn continue_execution(
        &self,
        execution_id: Uuid,
        completed_step: Option<&StepExecution>,
    ) -> Result<PipelineExecution, EngineError> {
        if let Some(step) = completed_step {
            self.record_progress(execution_id, Some(step)).await?;
        }
        self.run(execution_id).await
    }

    /// Operator interrupt: the execution becomes INTERRUPTED, future
    /// dispatches are no-ops, and a terminal event is appended
    #[instrument(skip(self))]
    pub async fn interrupt(&self, execution_id: Uuid) -> Result<PipelineExecution, EngineError> {
        let execution = self.require_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Ok(execution);
        }

        self.update_execution_with_retry(execution_id, |current| {
            if current.status.is_terminal() {
                return None;
            }
            Some(ExecutionPatch {
                status: Some(ExecutionStatus::Interrupted),
                end_time: Some(Utc::now()),
                ..Default::default()
            })
        })
        .await?;

        let execution = self.require_execution(execution_id).await?;
        if execution.status == ExecutionStatus::Interrupted {
            self.store
                .append_progress_event(
                    execution_id,
                    NewProgressEvent::workflow_completed(
                        false,
                        execution.progress_percentage,
                        Some("Execution interrupted by operator".to_string()),
                    ),
                )
                .await?;
            warn!(%execution_id, "execution interrupted");
        }
        Ok(execution)
    }

    // =========================================================================
    // Read side
    // =========================================================================

    pub async fn get_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<PipelineExecution>, EngineError> {
        Ok(self.store.get_execution(execution_id).await?)
    }

    /// Ordered step list for an execution
    pub async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<StepExecution>, EngineError> {
        self.require_execution(execution_id).await?;
        Ok(self.store.get_steps_for_execution(execution_id).await?)
    }

    /// Assemble a progress view at the requested detail level
    pub async fn get_progress(
        &self,
        execution_id: Uuid,
        detail: ProgressDetail,
        include_events: bool,
        events_limit: i64,
    ) -> Result<ProgressView, EngineError> {
        let execution = self.require_execution(execution_id).await?;
        let aggregated_progress = execution.progress_percentage;

        let steps = match detail {
            ProgressDetail::Summary => None,
            ProgressDetail::Steps | ProgressDetail::Full => {
                Some(self.store.get_steps_for_execution(execution_id).await?)
            }
        };

        let recent_events = if include_events || detail == ProgressDetail::Full {
            Some(
                self.store
                    .recent_progress_events(execution_id, events_limit.max(1))
                    .await?,
            )
        } else {
            None
        };

        Ok(ProgressView {
            execution,
            steps,
            recent_events,
            aggregated_progress,
        })
    }

    /// Filtered, paginated execution listing
    pub async fn list_executions(
        &self,
        filter: ExecutionFilter,
        page: PageRequest,
    ) -> Result<ExecutionPage, EngineError> {
        let (items, total_count) = self.store.list_executions(filter, page).await?;
        let total_pages = total_count.div_ceil(page.page_size.max(1) as u64);
        Ok(ExecutionPage {
            items,
            page: page.page,
            page_size: page.page_size,
            total_count,
            total_pages,
        })
    }

    // =========================================================================
    // Dispatch internals
    // =========================================================================

    async fn require_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<PipelineExecution, EngineError> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Mark steps SKIPPED whose upstream state rules them out. Returns the
    /// number of steps skipped in this pass.
    async fn propagate_skips(
        &self,
        execution_id: Uuid,
        definition: &PipelineDefinition,
        steps: &[StepExecution],
    ) -> Result<usize, EngineError> {
        let by_id: HashMap<&str, &StepExecution> =
            steps.iter().map(|s| (s.step_id.as_str(), s)).collect();
        let mut skipped = 0usize;

        for step_def in &definition.steps {
            let Some(row) = by_id.get(step_def.step_id.as_str()) else {
                continue;
            };
            if row.status != StepStatus::Pending {
                continue;
            }

            let Some(reason) = skip_reason(step_def, &by_id) else {
                continue;
            };

            match self
                .store
                .update_step(
                    row.id,
                    row.version,
                    StepPatch {
                        status: Some(StepStatus::Skipped),
                        end_time: Some(Utc::now()),
                        error_message: Some(reason.clone()),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(_) => {
                    debug!(%execution_id, step_id = %step_def.step_id, reason, "step skipped");
                    skipped += 1;
                }
                Err(err) if err.is_conflict() => {
                    // Another runner got there first
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(skipped)
    }

    /// Dispatch a single ready step. Errors are absorbed into the step's
    /// terminal state; a dispatch never fails the caller.
    #[instrument(skip(self, document, definition, row, prior_outputs), fields(execution_id = %row.execution_id, step_id = %definition.step_id))]
    async fn dispatch_step(
        &self,
        document: &ExecutionDocument,
        definition: &StepDefinition,
        row: &StepExecution,
        prior_outputs: &JsonMap,
    ) {
        // Claim the step; a conflict means a concurrent runner owns it
        let version = match self
            .store
            .update_step(
                row.id,
                row.version,
                StepPatch {
                    status: Some(StepStatus::Running),
                    start_time: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(version) => version,
            Err(err) if err.is_conflict() => return,
            Err(err) => {
                error!(error = %err, "failed to claim step");
                return;
            }
        };

        let params = match ParamResolver::resolve_map(
            &definition.params,
            &document.params,
            prior_outputs,
            true,
        ) {
            Ok(params) => params,
            Err(err) => {
                self.fail_step(row, version, format!("Parameter resolution failed: {err}"))
                    .await;
                return;
            }
        };

        let executor = match self.registry.executor(&definition.action_type) {
            Ok(executor) => executor,
            Err(err) => {
                self.fail_step(row, version, err.to_string()).await;
                return;
            }
        };

        let ctx = ActionContext::new(
            definition.step_id.clone(),
            row.execution_id,
            params,
            document.params.clone(),
            prior_outputs.clone(),
            self.services.clone(),
        );

        let result = match executor.execute(ctx).await {
            Ok(result) => result,
            Err(err) => ActionResult::fail(format!("Handler raised: {err}")),
        };

        self.apply_action_result(document, definition, row, version, result)
            .await;
    }

    async fn apply_action_result(
        &self,
        document: &ExecutionDocument,
        definition: &StepDefinition,
        row: &StepExecution,
        version: i32,
        result: ActionResult,
    ) {
        let outputs = sanitize::redact_outputs(&result.outputs);

        if result.awaiting_event {
            let Some(external_workflow_id) = result.external_workflow_id else {
                self.fail_step(row, version, "awaiting_event set without an external workflow id")
                    .await;
                return;
            };

            let timeout = result
                .timeout_seconds
                .map(Duration::from_secs)
                .or_else(|| {
                    self.registry
                        .get_meta(&definition.action_type)
                        .and_then(|m| m.timeout_seconds)
                        .map(Duration::from_secs)
                })
                .unwrap_or(self.config.default_step_timeout);

            let deadline = Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_default();
            match self
                .store
                .update_step(
                    row.id,
                    version,
                    StepPatch {
                        outputs: Some(Value::Object(outputs)),
                        awaiting_event: Some(true),
                        external_workflow_id: Some(external_workflow_id.clone()),
                        event_deadline: Some(deadline),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(_) => {
                    info!(
                        step_id = %definition.step_id,
                        %external_workflow_id,
                        ?deadline,
                        "step awaiting external event"
                    );
                }
                Err(err) => {
                    self.fail_step(row, version, format!("failed to bind event wait: {err}"))
                        .await;
                }
            }
            return;
        }

        if result.success {
            match self
                .store
                .update_step(
                    row.id,
                    version,
                    StepPatch {
                        status: Some(StepStatus::Completed),
                        end_time: Some(Utc::now()),
                        progress_percentage: Some(Decimal::ONE_HUNDRED),
                        outputs: Some(Value::Object(outputs.clone())),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(_) => {
                    if let Ok(Some(step)) = self.store.get_step(row.id).await {
                        let _ = self.record_progress(row.execution_id, Some(&step)).await;
                    }
                    self.apply_branch_routing(document, definition, row.execution_id, &outputs)
                        .await;
                }
                Err(err) => error!(error = %err, "failed to persist step completion"),
            }
        } else {
            let message = result
                .error
                .unwrap_or_else(|| "action reported failure".to_string());
            self.fail_step(row, version, message).await;
        }
    }

    async fn fail_step(&self, row: &StepExecution, version: i32, message: impl Into<String>) {
        let message = message.into();
        warn!(step_id = %row.step_id, error = %message, "step failed");

        match self
            .store
            .update_step(
                row.id,
                version,
                StepPatch {
                    status: Some(StepStatus::Failed),
                    end_time: Some(Utc::now()),
                    error_message: Some(message),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(_) => {
                let _ = self.record_progress(row.execution_id, None).await;
            }
            Err(err) => error!(error = %err, "failed to persist step failure"),
        }
    }

    /// After a branching step completes, every direct successor except the
    /// chosen target is SKIPPED (all of them when no branch matched)
    async fn apply_branch_routing(
        &self,
        document: &ExecutionDocument,
        definition: &StepDefinition,
        execution_id: Uuid,
        outputs: &JsonMap,
    ) {
        if !outputs.contains_key("matched_branch") || !outputs.contains_key("target_step") {
            return;
        }
        let target = outputs.get("target_step").and_then(Value::as_str);

        let steps = match self.store.get_steps_for_execution(execution_id).await {
            Ok(steps) => steps,
            Err(err) => {
                error!(error = %err, "failed to load steps for branch routing");
                return;
            }
        };

        let mut skipped_any = false;
        for successor in document.definition.successors(&definition.step_id) {
            if Some(successor.step_id.as_str()) == target {
                continue;
            }
            let Some(row) = steps.iter().find(|s| s.step_id == successor.step_id) else {
                continue;
            };
            if row.status != StepStatus::Pending {
                continue;
            }

            match self
                .store
                .update_step(
                    row.id,
                    row.version,
                    StepPatch {
                        status: Some(StepStatus::Skipped),
                        end_time: Some(Utc::now()),
                        error_message: Some(format!(
                            "not selected by branch step '{}'",
                            definition.step_id
                        )),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(_) => {
                    debug!(step_id = %successor.step_id, ?target, "successor skipped by branch routing");
                    skipped_any = true;
                }
                Err(err) if err.is_conflict() => {}
                Err(err) => error!(error = %err, "failed to skip unmatched branch successor"),
            }
        }

        if skipped_any {
            let _ = self.record_progress(execution_id, None).await;
        }
    }

    /// Recompute the execution percentage and append progress events.
    /// When `completed_step` is present and COMPLETED, a `step_completed`
    /// event is appended alongside the `workflow_progress` event.
    async fn record_progress(
        &self,
        execution_id: Uuid,
        completed_step: Option<&StepExecution>,
    ) -> Result<(), EngineError> {
        let steps = self.store.get_steps_for_execution(execution_id).await?;
        let progress = compute_progress(&steps);

        self.update_execution_with_retry(execution_id, |current| {
            if current.status.is_terminal() {
                return None;
            }
            Some(ExecutionPatch {
                progress_percentage: Some(progress),
                ..Default::default()
            })
        })
        .await?;

        let current_desc = steps
            .iter()
            .find(|s| s.status == StepStatus::Running)
            .map(|s| s.step_name.clone());
        self.store
            .append_progress_event(
                execution_id,
                NewProgressEvent::workflow_progress(progress, current_desc),
            )
            .await?;

        if let Some(step) = completed_step {
            if step.status == StepStatus::Completed {
                let duration = match (step.start_time, step.end_time) {
                    (Some(start), Some(end)) => Some((end - start).num_seconds()),
                    _ => None,
                };
                self.store
                    .append_progress_event(
                        execution_id,
                        NewProgressEvent::step_completed(
                            progress,
                            &step.step_id,
                            &step.step_name,
                            duration,
                        ),
                    )
                    .await?;
            }
        }

        Ok(())
    }

    /// Terminal aggregation once no step is PENDING or RUNNING
    async fn finalize(
        &self,
        execution: PipelineExecution,
        document: &ExecutionDocument,
        steps: &[StepExecution],
    ) -> Result<PipelineExecution, EngineError> {
        let failed = steps.iter().filter(|s| s.status.is_failure()).count();
        let total = steps.len();

        if failed > 0 {
            let first_error = steps
                .iter()
                .filter(|s| s.status.is_failure())
                .find_map(|s| s.error_message.clone());
            let error_info = serde_json::json!({
                "failed_steps": failed,
                "total_steps": total,
                "first_error": first_error,
            });

            self.update_execution_with_retry(execution.id, |current| {
                if current.status.is_terminal() {
                    return None;
                }
                Some(ExecutionPatch {
                    status: Some(ExecutionStatus::Failed),
                    end_time: Some(Utc::now()),
                    error_info: Some(error_info.clone()),
                    ..Default::default()
                })
            })
            .await?;

            let current = self.require_execution(execution.id).await?;
            self.store
                .append_progress_event(
                    execution.id,
                    NewProgressEvent::workflow_completed(
                        false,
                        current.progress_percentage,
                        Some(format!("{failed} of {total} steps failed")),
                    ),
                )
                .await?;

            info!(execution_id = %execution.id, failed, total, "execution failed");
            return Ok(current);
        }

        let final_outputs = self.resolve_final_outputs(document, steps);
        self.update_execution_with_retry(execution.id, |current| {
            if current.status.is_terminal() {
                return None;
            }
            Some(ExecutionPatch {
                status: Some(ExecutionStatus::Completed),
                end_time: Some(Utc::now()),
                progress_percentage: Some(Decimal::ONE_HUNDRED),
                final_outputs: final_outputs.clone(),
                ..Default::default()
            })
        })
        .await?;

        let current = self.require_execution(execution.id).await?;
        if current.status == ExecutionStatus::Completed {
            self.store
                .append_progress_event(
                    execution.id,
                    NewProgressEvent::workflow_completed(true, Decimal::ONE_HUNDRED, None),
                )
                .await?;
            info!(execution_id = %execution.id, "execution completed");
        }
        Ok(current)
    }

    /// Resolve the definition's final output mapping over the accumulated
    /// step outputs. Non-strict: outputs a skipped branch never produced
    /// resolve to empty values rather than failing the execution.
    fn resolve_final_outputs(
        &self,
        document: &ExecutionDocument,
        steps: &[StepExecution],
    ) -> Option<Value> {
        if document.definition.final_outputs.is_empty() {
            return None;
        }
        let outputs = collect_outputs(steps);
        match ParamResolver::resolve_map(
            &document.definition.final_outputs,
            &document.params,
            &outputs,
            false,
        ) {
            Ok(resolved) => Some(Value::Object(resolved)),
            Err(err) => {
                warn!(error = %err, "failed to resolve final outputs");
                None
            }
        }
    }

    /// Bounded-retry loop for execution-row updates racing on the version
    /// field. `make_patch` sees the freshly read row and may return `None`
    /// to abort silently.
    async fn update_execution_with_retry<F>(
        &self,
        execution_id: Uuid,
        make_patch: F,
    ) -> Result<(), EngineError>
    where
        F: Fn(&PipelineExecution) -> Option<ExecutionPatch>,
    {
        let max_attempts = self.config.max_optimistic_retry_attempts.max(1);

        for attempt in 1..=max_attempts {
            let execution = self.require_execution(execution_id).await?;
            let Some(patch) = make_patch(&execution) else {
                return Ok(());
            };

            match self
                .store
                .update_execution(execution_id, execution.version, patch)
                .await
            {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) if attempt < max_attempts => {
                    let backoff = conflict_backoff(attempt);
                    debug!(%execution_id, attempt, ?backoff, "version conflict; retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    return Err(EngineError::ConflictRetriesExhausted {
                        attempts: max_attempts,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::ConflictRetriesExhausted {
            attempts: max_attempts,
        })
    }
}

/// Exponential backoff with jitter for version-conflict retries
fn conflict_backoff(attempt: u32) -> Duration {
    let base = 25u64 * (1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..base / 2 + 1);
    Duration::from_millis(base + jitter)
}

fn parse_document(execution: &PipelineExecution) -> Result<ExecutionDocument, EngineError> {
    Ok(serde_json::from_value(execution.pipeline_definition.clone())?)
}

/// Outputs of completed steps, keyed by step id
fn collect_outputs(steps: &[StepExecution]) -> JsonMap {
    let mut outputs = JsonMap::new();
    for step in steps {
        if step.status == StepStatus::Completed {
            if let Some(step_outputs) = &step.outputs {
                outputs.insert(step.step_id.clone(), step_outputs.clone());
            }
        }
    }
    outputs
}

/// Why a pending step must be skipped, if it must
fn skip_reason(
    step_def: &StepDefinition,
    by_id: &HashMap<&str, &StepExecution>,
) -> Option<String> {
    let status_of = |id: &String| by_id.get(id.as_str()).map(|s| s.status);

    // A failed or timed-out upstream skips dependents immediately
    for dep in step_def.upstream_ids() {
        if status_of(dep).is_some_and(|s| s.is_failure()) {
            return Some(format!("upstream step '{dep}' failed"));
        }
    }

    // A hard dependency must end COMPLETED
    for dep in &step_def.hard_depends_on {
        if status_of(dep).is_some_and(|s| s.is_terminal() && s != StepStatus::Completed) {
            return Some(format!("hard dependency '{dep}' did not complete"));
        }
    }

    // Every upstream skipped: inherit SKIPPED unless independent
    let upstreams: Vec<StepStatus> = step_def.upstream_ids().filter_map(status_of).collect();
    if !upstreams.is_empty()
        && !step_def.independent
        && upstreams.iter().all(|s| *s == StepStatus::Skipped)
    {
        return Some("all upstream steps were skipped".to_string());
    }

    None
}

/// Pending steps whose every upstream reached a terminal state
fn compute_ready<'a>(
    definition: &'a PipelineDefinition,
    steps: &[StepExecution],
) -> Vec<&'a StepDefinition> {
    let by_id: HashMap<&str, &StepExecution> =
        steps.iter().map(|s| (s.step_id.as_str(), s)).collect();

    definition
        .steps
        .iter()
        .filter(|step_def| {
            let Some(row) = by_id.get(step_def.step_id.as_str()) else {
                return false;
            };
            if row.status != StepStatus::Pending {
                return false;
            }
            step_def.upstream_ids().all(|dep| {
                by_id
                    .get(dep.as_str())
                    .is_some_and(|s| s.status.is_terminal())
            })
        })
        .collect()
}

/// completed_non_skipped / total_non_skipped, clamped to [0, 100]
fn compute_progress(steps: &[StepExecution]) -> Decimal {
    let total = steps
        .iter()
        .filter(|s| s.status != StepStatus::Skipped)
        .count();
    if total == 0 {
        return Decimal::ONE_HUNDRED;
    }
    let completed = steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .count();

    (Decimal::from(completed as u64) * Decimal::ONE_HUNDRED / Decimal::from(total as u64))
        .round_dp(2)
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}
