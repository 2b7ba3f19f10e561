//! End-to-end engine scenarios against the in-memory store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use cascade_core::{
    ActionContext, ActionError, ActionExecutor, ActionMeta, ActionRegistry, ActionResult,
    EventAction, EventContext, EventResult, ExecutionMode, ExecutionStatus, JsonMap,
    PipelineDefinition, ProgressEventType, ServiceError, ServiceInvoker, ServiceRequest,
    StepStatus,
};
use cascade_engine::{
    BuiltinActions, EngineConfig, EngineError, EventRouter, ExecutionEngine, RetentionWorker,
    StartRequest, TimeoutScheduler,
};
use cascade_storage::{
    ExecutionPatch, MemoryStore, NewExecution, NewProgressEvent, PipelineStore,
};

/// Stub service mesh: every call starts remote workflow `wf-123`
struct StubServices;

#[async_trait]
impl ServiceInvoker for StubServices {
    async fn invoke(&self, _request: ServiceRequest) -> Result<Value, ServiceError> {
        Ok(json!({"data": {"workflow_id": "wf-123"}}))
    }
}

struct Harness {
    engine: Arc<ExecutionEngine>,
    store: Arc<MemoryStore>,
    registry: Arc<ActionRegistry>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(ActionRegistry::new());
    registry.add_plugin(Box::new(BuiltinActions));
    registry.discover();

    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        registry.clone(),
        Arc::new(StubServices),
        EngineConfig::default(),
    ));

    Harness {
        engine,
        store,
        registry,
    }
}

fn definition(value: Value) -> PipelineDefinition {
    serde_json::from_value(value).expect("valid definition")
}

fn params(value: Value) -> JsonMap {
    value.as_object().cloned().unwrap()
}

async fn event_counts(store: &MemoryStore, execution_id: Uuid) -> (usize, usize, usize) {
    let events = store.list_progress_events(execution_id, None).await.unwrap();
    let count = |t: ProgressEventType| events.iter().filter(|e| e.event_type == t).count();
    (
        count(ProgressEventType::StepCompleted),
        count(ProgressEventType::WorkflowCompleted),
        count(ProgressEventType::WorkflowProgress),
    )
}

// =============================================================================
// Scenario 1: sync happy path
// =============================================================================

#[tokio::test]
async fn sync_happy_path_completes_with_events() {
    let h = harness();

    let request = StartRequest::new(definition(json!({
        "name": "sync-happy",
        "params": [{"name": "msg", "required": true}],
        "steps": [
            {
                "step_id": "log",
                "action_type": "log",
                "params": {"message": "{{ params.msg | upper }}"}
            },
            {
                "step_id": "transform",
                "action_type": "transform",
                "depends_on": ["log"],
                "params": {
                    "input": "{{ steps.log.outputs.message }}",
                    "operation": "lowercase"
                }
            }
        ],
        "final_outputs": {"shouted": "{{ steps.log.outputs.message }}"}
    })))
    .with_params(params(json!({"msg": "hi"})))
    .with_initiator("alice");

    let execution = h.engine.execute(request).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.progress_percentage, Decimal::ONE_HUNDRED);
    assert!(execution.end_time.is_some());
    assert_eq!(
        execution.final_outputs.unwrap()["shouted"],
        json!("HI")
    );

    let steps = h.engine.get_steps(execution.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));

    let log_step = steps.iter().find(|s| s.step_id == "log").unwrap();
    assert_eq!(log_step.outputs.as_ref().unwrap()["message"], json!("HI"));

    let transform = steps.iter().find(|s| s.step_id == "transform").unwrap();
    assert_eq!(transform.outputs.as_ref().unwrap()["result"], json!("hi"));

    let (step_completed, workflow_completed, workflow_progress) =
        event_counts(&h.store, execution.id).await;
    assert_eq!(step_completed, 2);
    assert_eq!(workflow_completed, 1);
    assert!(workflow_progress >= 2);
}

// =============================================================================
// Scenario 2: event-driven completion
// =============================================================================

#[tokio::test]
async fn event_driven_step_completes_via_router() {
    let h = harness();

    let request = StartRequest::new(definition(json!({
        "name": "model-add",
        "steps": [{
            "step_id": "add_model",
            "action_type": "remote_workflow",
            "params": {
                "app_id": "models",
                "path": "models/import",
                "payload": {"uri": "meta-llama/foo"},
                "max_wait_seconds": 600
            }
        }]
    })));

    let execution = h.engine.execute(request).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);

    let steps = h.engine.get_steps(execution.id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Running);
    assert!(steps[0].awaiting_event);
    assert_eq!(steps[0].external_workflow_id.as_deref(), Some("wf-123"));
    assert!(steps[0].event_deadline.is_some());

    let router = EventRouter::new(h.engine.clone());
    let result = router
        .route_event(json!({
            "type": "workflow_completed",
            "workflow_id": "wf-123",
            "status": "COMPLETED",
            "result": {"model_id": "m-123"}
        }))
        .await;

    assert!(result.routed);
    assert!(result.step_completed);
    assert_eq!(result.final_status, Some(StepStatus::Completed));

    let steps = h.engine.get_steps(execution.id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Completed);
    assert!(!steps[0].awaiting_event);
    let outputs = steps[0].outputs.as_ref().unwrap();
    assert_eq!(outputs["model_id"], json!("m-123"));
    // Outputs from execute() survive the merge
    assert_eq!(outputs["workflow_id"], json!("wf-123"));

    let execution = h.engine.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.progress_percentage, Decimal::ONE_HUNDRED);
}

// =============================================================================
// Scenario 3: event timeout
// =============================================================================

#[tokio::test]
async fn event_timeout_fails_the_execution() {
    let h = harness();

    let request = StartRequest::new(definition(json!({
        "steps": [{
            "step_id": "add_model",
            "action_type": "remote_workflow",
            "params": {
                "app_id": "models",
                "path": "models/import",
                "max_wait_seconds": 0
            }
        }]
    })));

    let execution = h.engine.execute(request).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);

    let router = EventRouter::new(h.engine.clone());
    let store: Arc<dyn PipelineStore> = h.store.clone();
    let scheduler = TimeoutScheduler::new(store, router, Duration::from_secs(5));

    let stats = scheduler.sweep().await;
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.failed, 0);

    let steps = h.engine.get_steps(execution.id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Timeout);
    assert_eq!(steps[0].outputs.as_ref().unwrap()["timeout"], json!(true));
    assert!(steps[0]
        .error_message
        .as_ref()
        .unwrap()
        .contains("timed out"));

    let execution = h.engine.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    let error_info = execution.error_info.unwrap();
    assert_eq!(error_info["failed_steps"], json!(1));
    assert_eq!(error_info["total_steps"], json!(1));

    // A second sweep finds nothing
    let stats = scheduler.sweep().await;
    assert_eq!(stats.timed_out, 0);
}

// =============================================================================
// Scenario 4: conditional branching
// =============================================================================

#[tokio::test]
async fn conditional_routes_to_matching_branch() {
    let h = harness();

    let branching = json!({
        "params": [{"name": "x", "required": true}],
        "steps": [
            {
                "step_id": "cond",
                "action_type": "conditional",
                "params": {"branches": [
                    {"id": "a", "label": "High", "condition": "{{ params.x > 10 }}", "target_step": "a"},
                    {"id": "b", "label": "Default", "condition": "true", "target_step": "b"}
                ]}
            },
            {"step_id": "a", "action_type": "log", "depends_on": ["cond"], "params": {"message": "A"}},
            {"step_id": "b", "action_type": "log", "depends_on": ["cond"], "params": {"message": "B"}}
        ]
    });

    let execution = h
        .engine
        .execute(
            StartRequest::new(definition(branching.clone()))
                .with_params(params(json!({"x": 5}))),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let steps = h.engine.get_steps(execution.id).await.unwrap();
    let status_of = |id: &str| steps.iter().find(|s| s.step_id == id).unwrap().status;
    assert_eq!(status_of("cond"), StepStatus::Completed);
    assert_eq!(status_of("a"), StepStatus::Skipped);
    assert_eq!(status_of("b"), StepStatus::Completed);

    // The other side of the comparison picks the other branch
    let execution = h
        .engine
        .execute(
            StartRequest::new(definition(branching)).with_params(params(json!({"x": 50}))),
        )
        .await
        .unwrap();
    let steps = h.engine.get_steps(execution.id).await.unwrap();
    let status_of = |id: &str| steps.iter().find(|s| s.step_id == id).unwrap().status;
    assert_eq!(status_of("a"), StepStatus::Completed);
    assert_eq!(status_of("b"), StepStatus::Skipped);
}

#[tokio::test]
async fn conditional_with_no_match_skips_all_successors() {
    let h = harness();

    let execution = h
        .engine
        .execute(StartRequest::new(definition(json!({
            "steps": [
                {
                    "step_id": "cond",
                    "action_type": "conditional",
                    "params": {"branches": [
                        {"id": "never", "condition": "false", "target_step": "a"}
                    ]}
                },
                {"step_id": "a", "action_type": "log", "depends_on": ["cond"]},
                {"step_id": "b", "action_type": "log", "depends_on": ["cond"]},
                {"step_id": "after", "action_type": "log", "depends_on": ["a", "b"]}
            ]
        }))))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let steps = h.engine.get_steps(execution.id).await.unwrap();
    let status_of = |id: &str| steps.iter().find(|s| s.step_id == id).unwrap().status;

    let cond = steps.iter().find(|s| s.step_id == "cond").unwrap();
    let outputs = cond.outputs.as_ref().unwrap();
    assert_eq!(outputs["matched_branch"], Value::Null);
    assert_eq!(outputs["target_step"], Value::Null);

    assert_eq!(status_of("a"), StepStatus::Skipped);
    assert_eq!(status_of("b"), StepStatus::Skipped);
    // Every upstream skipped: the join step inherits SKIPPED
    assert_eq!(status_of("after"), StepStatus::Skipped);
}

// =============================================================================
// Scenario 5: optimistic-lock drop on concurrent completion events
// =============================================================================

/// Event-driven action whose `on_event` parks on a barrier so two router
/// calls can read the same step version before either writes
struct GateAction {
    barrier: Arc<tokio::sync::Barrier>,
}

#[async_trait]
impl ActionExecutor for GateAction {
    async fn execute(&self, _ctx: ActionContext) -> Result<ActionResult, ActionError> {
        Ok(ActionResult::awaiting("wf-gate", Some(60), JsonMap::new()))
    }

    async fn on_event(&self, _ctx: EventContext) -> Result<EventResult, ActionError> {
        self.barrier.wait().await;
        let mut outputs = JsonMap::new();
        outputs.insert("done".to_string(), json!(true));
        Ok(EventResult::completed(outputs))
    }
}

#[tokio::test]
async fn concurrent_completion_events_drop_the_loser() {
    let h = harness();

    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let gate: Arc<dyn ActionExecutor> = Arc::new(GateAction {
        barrier: barrier.clone(),
    });
    let meta = ActionMeta {
        execution_mode: ExecutionMode::EventDriven,
        timeout_seconds: Some(60),
        ..ActionMeta::new("gate", "Gate", "Testing", "barrier-gated event action")
    };
    h.registry
        .register(meta, Box::new(move || gate.clone()))
        .unwrap();

    let execution = h
        .engine
        .execute(StartRequest::new(definition(json!({
            "steps": [{"step_id": "wait", "action_type": "gate", "params": {}}]
        }))))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);

    let router = EventRouter::new(h.engine.clone());
    let event = json!({"type": "workflow_completed", "workflow_id": "wf-gate"});

    let (first, second) = tokio::join!(
        router.route_event(event.clone()),
        router.route_event(event.clone()),
    );

    let (winner, loser) = if first.step_completed {
        (first, second)
    } else {
        (second, first)
    };

    assert!(winner.step_completed);
    assert_eq!(winner.final_status, Some(StepStatus::Completed));

    // The loser reached COMPLETE but its write conflicted and was dropped
    assert!(loser.routed);
    assert_eq!(loser.action_taken, Some(EventAction::Complete));
    assert!(!loser.step_completed);
    assert!(loser.error.unwrap().contains("version conflict"));

    let steps = h.engine.get_steps(execution.id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Completed);

    let execution = h.engine.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

// =============================================================================
// Scenario 6: retention sweep
// =============================================================================

#[tokio::test]
async fn retention_sweep_deletes_expired_executions_and_descendants() {
    let h = harness();

    let mut old_ids = vec![];
    for age_days in [31i64, 29] {
        for _ in 0..10 {
            let execution = h
                .store
                .create_execution(NewExecution::new(json!({"steps": []}), "seeder"))
                .await
                .unwrap();
            h.store
                .update_execution(
                    execution.id,
                    1,
                    ExecutionPatch {
                        status: Some(ExecutionStatus::Completed),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            h.store
                .append_progress_event(
                    execution.id,
                    NewProgressEvent::workflow_completed(true, Decimal::ONE_HUNDRED, None),
                )
                .await
                .unwrap();
            h.store
                .insert_subscriptions(execution.id, &["alerts".to_string()], None)
                .await
                .unwrap();
            h.store
                .set_created_at(execution.id, Utc::now() - chrono::Duration::days(age_days));
            if age_days == 31 {
                old_ids.push(execution.id);
            }
        }
    }

    let store: Arc<dyn PipelineStore> = h.store.clone();
    let worker = RetentionWorker::new(
        store,
        EngineConfig {
            retention_days: 30,
            retention_batch_size: 7, // force multiple batches
            ..EngineConfig::default()
        },
    );

    let summary = worker.run_once().await;
    assert_eq!(summary.deleted, 10);
    assert_eq!(summary.errors, 0);

    assert_eq!(h.store.execution_count(), 10);
    for id in old_ids {
        assert!(h.store.get_execution(id).await.unwrap().is_none());
        assert_eq!(h.store.count_progress_events(id).await.unwrap(), 0);
        assert!(h.store.list_subscriptions(id).await.unwrap().is_empty());
        assert!(h.store.get_steps_for_execution(id).await.unwrap().is_empty());
    }

    // A second sweep over the same state is a no-op
    let summary = worker.run_once().await;
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.errors, 0);
}

// =============================================================================
// Failure semantics and validation
// =============================================================================

#[tokio::test]
async fn sync_failure_fails_fast_and_skips_dependents() {
    let h = harness();

    let execution = h
        .engine
        .execute(StartRequest::new(definition(json!({
            "steps": [
                {"step_id": "boom", "action_type": "fail", "params": {"message": "exploded"}},
                {"step_id": "after", "action_type": "log", "depends_on": ["boom"]},
                {"step_id": "later", "action_type": "log", "depends_on": ["after"]}
            ]
        }))))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.end_time.is_some());
    let error_info = execution.error_info.unwrap();
    assert_eq!(error_info["failed_steps"], json!(1));
    assert_eq!(error_info["total_steps"], json!(3));
    assert_eq!(error_info["first_error"], json!("exploded"));

    let steps = h.engine.get_steps(execution.id).await.unwrap();
    let status_of = |id: &str| steps.iter().find(|s| s.step_id == id).unwrap().status;
    assert_eq!(status_of("boom"), StepStatus::Failed);
    assert_eq!(status_of("after"), StepStatus::Skipped);
    assert_eq!(status_of("later"), StepStatus::Skipped);

    let (_, workflow_completed, _) = event_counts(&h.store, execution.id).await;
    assert_eq!(workflow_completed, 1);
}

#[tokio::test]
async fn unresolved_strict_template_fails_the_step() {
    let h = harness();

    let execution = h
        .engine
        .execute(StartRequest::new(definition(json!({
            "steps": [
                {"step_id": "a", "action_type": "set_output", "params": {"outputs": {"x": 1}}},
                {
                    "step_id": "b",
                    "action_type": "log",
                    "depends_on": ["a"],
                    "params": {"message": "{{ steps.a.outputs.missing }}"}
                }
            ]
        }))))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let steps = h.engine.get_steps(execution.id).await.unwrap();
    let b = steps.iter().find(|s| s.step_id == "b").unwrap();
    assert_eq!(b.status, StepStatus::Failed);
    assert!(b
        .error_message
        .as_ref()
        .unwrap()
        .contains("Parameter resolution failed"));
}

#[tokio::test]
async fn validation_rejects_bad_definitions_before_persisting() {
    let h = harness();

    // Unknown action type
    let err = h
        .engine
        .start(StartRequest::new(definition(json!({
            "steps": [{"step_id": "a", "action_type": "no_such_action"}]
        }))))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Dependency cycle
    let err = h
        .engine
        .start(StartRequest::new(definition(json!({
            "steps": [
                {"step_id": "a", "action_type": "log", "depends_on": ["b"]},
                {"step_id": "b", "action_type": "log", "depends_on": ["a"]}
            ]
        }))))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Unknown template reference
    let err = h
        .engine
        .start(StartRequest::new(definition(json!({
            "steps": [{
                "step_id": "a",
                "action_type": "log",
                "params": {"message": "{{ steps.ghost.outputs.x }}"}
            }]
        }))))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Invalid callback topic
    let err = h
        .engine
        .start(
            StartRequest::new(definition(json!({
                "steps": [{"step_id": "a", "action_type": "log"}]
            })))
            .with_callback_topics(vec!["not a topic".to_string()]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Nothing was persisted
    assert_eq!(h.store.execution_count(), 0);
}

#[tokio::test]
async fn empty_callback_topics_create_no_subscriptions() {
    let h = harness();

    let execution = h
        .engine
        .execute(StartRequest::new(definition(json!({
            "steps": [{"step_id": "a", "action_type": "log"}]
        }))))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(h
        .store
        .list_subscriptions(execution.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn interrupt_stops_future_dispatch() {
    let h = harness();

    let execution = h
        .engine
        .execute(StartRequest::new(definition(json!({
            "steps": [
                {"step_id": "wait", "action_type": "remote_workflow",
                 "params": {"app_id": "models", "path": "x", "max_wait_seconds": 600}},
                {"step_id": "after", "action_type": "log", "depends_on": ["wait"]}
            ]
        }))))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);

    let interrupted = h.engine.interrupt(execution.id).await.unwrap();
    assert_eq!(interrupted.status, ExecutionStatus::Interrupted);
    assert!(interrupted.end_time.is_some());

    // Interrupt is idempotent and run() is a no-op afterwards
    let again = h.engine.interrupt(execution.id).await.unwrap();
    assert_eq!(again.status, ExecutionStatus::Interrupted);
    let after_run = h.engine.run(execution.id).await.unwrap();
    assert_eq!(after_run.status, ExecutionStatus::Interrupted);

    let (_, workflow_completed, _) = event_counts(&h.store, execution.id).await;
    assert_eq!(workflow_completed, 1);
}

// =============================================================================
// Progress hints via UPDATE_PROGRESS
// =============================================================================

/// Event-driven action that treats `progress` events as hints and
/// completes on `workflow_completed`
struct TrackerAction;

#[async_trait]
impl ActionExecutor for TrackerAction {
    async fn execute(&self, _ctx: ActionContext) -> Result<ActionResult, ActionError> {
        Ok(ActionResult::awaiting("wf-tracker", Some(300), JsonMap::new()))
    }

    async fn on_event(&self, ctx: EventContext) -> Result<EventResult, ActionError> {
        match ctx.event_type.as_str() {
            "progress" => {
                let pct = ctx
                    .event_data
                    .get("progress")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                Ok(EventResult::update_progress(pct))
            }
            "workflow_completed" => Ok(EventResult::completed(JsonMap::new())),
            _ => Ok(EventResult::ignore()),
        }
    }
}

#[tokio::test]
async fn update_progress_keeps_the_step_waiting() {
    let h = harness();

    let meta = ActionMeta {
        execution_mode: ExecutionMode::EventDriven,
        timeout_seconds: Some(300),
        ..ActionMeta::new("tracker", "Tracker", "Testing", "progress-reporting action")
    };
    h.registry
        .register(meta, Box::new(|| Arc::new(TrackerAction)))
        .unwrap();

    let execution = h
        .engine
        .execute(StartRequest::new(definition(json!({
            "steps": [{"step_id": "track", "action_type": "tracker", "params": {}}]
        }))))
        .await
        .unwrap();

    let router = EventRouter::new(h.engine.clone());

    let result = router
        .route_event(json!({"type": "progress", "workflow_id": "wf-tracker", "progress": 42.5}))
        .await;
    assert!(result.routed);
    assert_eq!(result.action_taken, Some(EventAction::UpdateProgress));
    assert!(!result.step_completed);

    let steps = h.engine.get_steps(execution.id).await.unwrap();
    assert!(steps[0].awaiting_event);
    assert_eq!(steps[0].progress_percentage, Decimal::new(4250, 2));
    // Per-step hints do not feed the overall execution percentage
    let execution_row = h.engine.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution_row.status, ExecutionStatus::Running);
    assert_eq!(execution_row.progress_percentage, Decimal::ZERO);

    // An unrelated event is ignored and changes nothing
    let result = router
        .route_event(json!({"type": "heartbeat", "workflow_id": "wf-tracker"}))
        .await;
    assert_eq!(result.action_taken, Some(EventAction::Ignore));

    // Completion closes out normally
    let result = router
        .route_event(json!({"type": "workflow_completed", "workflow_id": "wf-tracker"}))
        .await;
    assert!(result.step_completed);
    let execution_row = h.engine.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution_row.status, ExecutionStatus::Completed);
}

// =============================================================================
// Parallelism and read-side queries
// =============================================================================

#[tokio::test]
async fn independent_steps_run_and_join() {
    let h = harness();

    let execution = h
        .engine
        .execute(
            StartRequest::new(definition(json!({
                "params": [{"name": "n", "required": true}],
                "steps": [
                    {"step_id": "left", "action_type": "set_output",
                     "params": {"outputs": {"v": "{{ params.n }}"}}},
                    {"step_id": "right", "action_type": "set_output",
                     "params": {"outputs": {"v": 10}}},
                    {"step_id": "join", "action_type": "aggregate",
                     "depends_on": ["left", "right"],
                     "params": {
                        "inputs": [
                            "{{ steps.left.outputs.v }}",
                            "{{ steps.right.outputs.v }}"
                        ],
                        "operation": "sum"
                     }}
                ]
            })))
            .with_params(params(json!({"n": 32}))),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let steps = h.engine.get_steps(execution.id).await.unwrap();
    let join = steps.iter().find(|s| s.step_id == "join").unwrap();
    assert_eq!(join.outputs.as_ref().unwrap()["result"], json!(42));
}

#[tokio::test]
async fn progress_view_levels_of_detail() {
    let h = harness();

    let execution = h
        .engine
        .execute(StartRequest::new(definition(json!({
            "steps": [{"step_id": "a", "action_type": "log"}]
        }))))
        .await
        .unwrap();

    let view = h
        .engine
        .get_progress(
            execution.id,
            cascade_engine::ProgressDetail::Summary,
            false,
            20,
        )
        .await
        .unwrap();
    assert!(view.steps.is_none());
    assert!(view.recent_events.is_none());
    assert_eq!(view.aggregated_progress, Decimal::ONE_HUNDRED);

    let view = h
        .engine
        .get_progress(execution.id, cascade_engine::ProgressDetail::Full, true, 5)
        .await
        .unwrap();
    assert_eq!(view.steps.unwrap().len(), 1);
    let events = view.recent_events.unwrap();
    assert!(!events.is_empty());
    assert!(events.len() <= 5);
}
