//! In-memory implementation of PipelineStore
//!
//! Primarily for tests and embedded use. Provides the same semantics as
//! the PostgreSQL implementation: optimistic version checks, monotone
//! progress, per-execution event sequences and the awaiting-uniqueness
//! invariant.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use cascade_core::{DeliveryStatus, ExecutionStatus, StepStatus};

use crate::models::*;
use crate::store::{PipelineStore, StoreError};

/// In-memory implementation of PipelineStore
///
/// # Example
///
/// ```
/// use cascade_storage::MemoryStore;
///
/// let store = MemoryStore::new();
/// ```
#[derive(Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<Uuid, PipelineExecution>>,
    steps: RwLock<HashMap<Uuid, StepExecution>>,
    events: RwLock<HashMap<Uuid, Vec<ProgressEvent>>>,
    subscriptions: RwLock<HashMap<Uuid, ExecutionSubscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.executions.write().clear();
        self.steps.write().clear();
        self.events.write().clear();
        self.subscriptions.write().clear();
    }

    /// Backdate an execution's `created_at` (for retention tests)
    pub fn set_created_at(&self, execution_id: Uuid, created_at: DateTime<Utc>) {
        if let Some(execution) = self.executions.write().get_mut(&execution_id) {
            execution.created_at = created_at;
        }
    }
}

fn clamp_progress(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn create_execution(&self, new: NewExecution) -> Result<PipelineExecution, StoreError> {
        let now = Utc::now();
        let execution = PipelineExecution {
            id: new.id,
            version: 1,
            pipeline_definition: new.pipeline_definition,
            initiator: new.initiator,
            start_time: None,
            end_time: None,
            status: ExecutionStatus::Pending,
            progress_percentage: Decimal::ZERO,
            final_outputs: None,
            error_info: None,
            created_at: now,
            updated_at: now,
        };
        self.executions.write().insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<PipelineExecution>, StoreError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn list_executions(
        &self,
        filter: ExecutionFilter,
        page: PageRequest,
    ) -> Result<(Vec<PipelineExecution>, u64), StoreError> {
        let executions = self.executions.read();
        let mut matched: Vec<PipelineExecution> = executions
            .values()
            .filter(|e| {
                if let Some(status) = filter.status {
                    if e.status != status {
                        return false;
                    }
                }
                if let Some(initiator) = &filter.initiator {
                    if &e.initiator != initiator {
                        return false;
                    }
                }
                if let Some(after) = filter.created_after {
                    if e.created_at < after {
                        return false;
                    }
                }
                if let Some(before) = filter.created_before {
                    if e.created_at > before {
                        return false;
                    }
                }
                if let Some(name) = &filter.pipeline_name {
                    // Execution documents nest the definition; bare
                    // definitions carry the name at the top level
                    let defined = e
                        .pipeline_definition
                        .pointer("/definition/name")
                        .or_else(|| e.pipeline_definition.get("name"))
                        .and_then(Value::as_str);
                    if defined != Some(name.as_str()) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matched.len() as u64;

        let items = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();

        Ok((items, total))
    }

    async fn update_execution(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: ExecutionPatch,
    ) -> Result<i32, StoreError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&id)
            .ok_or(StoreError::ExecutionNotFound(id))?;

        if execution.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: execution.version,
            });
        }

        if let Some(status) = patch.status {
            execution.status = status;
        }
        if let Some(start_time) = patch.start_time {
            execution.start_time = Some(start_time);
        }
        if let Some(end_time) = patch.end_time {
            execution.end_time = Some(end_time);
        }
        if let Some(progress) = patch.progress_percentage {
            // Monotonic: never decrease relative to the stored value
            execution.progress_percentage =
                execution.progress_percentage.max(clamp_progress(progress));
        }
        if let Some(final_outputs) = patch.final_outputs {
            execution.final_outputs = Some(final_outputs);
        }
        if let Some(error_info) = patch.error_info {
            execution.error_info = Some(error_info);
        }

        execution.version += 1;
        execution.updated_at = Utc::now();
        Ok(execution.version)
    }

    async fn delete_execution(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.executions.write().remove(&id).is_some())
    }

    async fn list_expired_executions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let executions = self.executions.read();
        let mut expired: Vec<(DateTime<Utc>, Uuid)> = executions
            .values()
            .filter(|e| e.status.is_terminal() && e.created_at < cutoff)
            .map(|e| (e.created_at, e.id))
            .collect();
        expired.sort();
        Ok(expired
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn insert_steps(
        &self,
        new_steps: Vec<NewStepExecution>,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let executions = self.executions.read();
        let mut steps = self.steps.write();
        let now = Utc::now();
        let mut created = Vec::with_capacity(new_steps.len());

        for new in new_steps {
            if !executions.contains_key(&new.execution_id) {
                return Err(StoreError::ExecutionNotFound(new.execution_id));
            }
            let duplicate = steps
                .values()
                .any(|s| s.execution_id == new.execution_id && s.step_id == new.step_id);
            if duplicate {
                return Err(StoreError::Duplicate {
                    field: "step_id",
                    value: new.step_id,
                });
            }

            let step = StepExecution {
                id: Uuid::now_v7(),
                execution_id: new.execution_id,
                version: 1,
                step_id: new.step_id,
                step_name: new.step_name,
                status: StepStatus::Pending,
                start_time: None,
                end_time: None,
                progress_percentage: Decimal::ZERO,
                outputs: None,
                error_message: None,
                retry_count: 0,
                sequence_number: new.sequence_number,
                handler_type: new.handler_type,
                awaiting_event: false,
                external_workflow_id: None,
                event_deadline: None,
                created_at: now,
                updated_at: now,
            };
            created.push(step.clone());
            steps.insert(step.id, step);
        }

        Ok(created)
    }

    async fn get_step(&self, id: Uuid) -> Result<Option<StepExecution>, StoreError> {
        Ok(self.steps.read().get(&id).cloned())
    }

    async fn get_steps_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let mut steps: Vec<StepExecution> = self
            .steps
            .read()
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.sequence_number);
        Ok(steps)
    }

    async fn update_step(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: StepPatch,
    ) -> Result<i32, StoreError> {
        let mut steps = self.steps.write();

        // Awaiting workflow ids must stay unique across awaiting steps
        if patch.awaiting_event == Some(true) {
            if let Some(workflow_id) = &patch.external_workflow_id {
                let taken = steps
                    .values()
                    .any(|s| s.id != id && s.awaiting_event && s.external_workflow_id.as_ref() == Some(workflow_id));
                if taken {
                    return Err(StoreError::Duplicate {
                        field: "external_workflow_id",
                        value: workflow_id.clone(),
                    });
                }
            }
        }

        let step = steps.get_mut(&id).ok_or(StoreError::StepNotFound(id))?;

        if step.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: step.version,
            });
        }

        if let Some(status) = patch.status {
            step.status = status;
        }
        if let Some(start_time) = patch.start_time {
            step.start_time = Some(start_time);
        }
        if let Some(end_time) = patch.end_time {
            step.end_time = Some(end_time);
        }
        if let Some(progress) = patch.progress_percentage {
            step.progress_percentage = step.progress_percentage.max(clamp_progress(progress));
        }
        if let Some(outputs) = patch.outputs {
            step.outputs = Some(outputs);
        }
        if let Some(error_message) = patch.error_message {
            step.error_message = Some(error_message);
        }
        if let Some(retry_count) = patch.retry_count {
            step.retry_count = retry_count;
        }
        if let Some(awaiting) = patch.awaiting_event {
            step.awaiting_event = awaiting;
            if !awaiting {
                step.external_workflow_id = None;
                step.event_deadline = None;
            }
        }
        if let Some(workflow_id) = patch.external_workflow_id {
            step.external_workflow_id = Some(workflow_id);
        }
        if let Some(deadline) = patch.event_deadline {
            step.event_deadline = Some(deadline);
        }

        step.version += 1;
        step.updated_at = Utc::now();
        Ok(step.version)
    }

    async fn get_step_by_external_workflow_id(
        &self,
        external_workflow_id: &str,
    ) -> Result<Option<StepExecution>, StoreError> {
        Ok(self
            .steps
            .read()
            .values()
            .find(|s| {
                s.awaiting_event
                    && s.external_workflow_id.as_deref() == Some(external_workflow_id)
            })
            .cloned())
    }

    async fn get_awaiting_steps_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let mut steps: Vec<StepExecution> = self
            .steps
            .read()
            .values()
            .filter(|s| s.execution_id == execution_id && s.awaiting_event)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.sequence_number);
        Ok(steps)
    }

    async fn list_awaiting_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StepExecution>, StoreError> {
        Ok(self
            .steps
            .read()
            .values()
            .filter(|s| {
                s.awaiting_event
                    && s.status == StepStatus::Running
                    && s.event_deadline.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect())
    }

    async fn complete_step_from_event(
        &self,
        id: Uuid,
        expected_version: i32,
        status: StepStatus,
        outputs: Value,
        error_message: Option<String>,
    ) -> Result<i32, StoreError> {
        let mut steps = self.steps.write();
        let step = steps.get_mut(&id).ok_or(StoreError::StepNotFound(id))?;

        if step.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: step.version,
            });
        }

        step.status = status;
        step.outputs = Some(outputs);
        step.error_message = error_message;
        step.end_time = Some(Utc::now());
        step.awaiting_event = false;
        step.event_deadline = None;
        if status == StepStatus::Completed {
            step.progress_percentage = Decimal::ONE_HUNDRED;
        }

        step.version += 1;
        step.updated_at = Utc::now();
        Ok(step.version)
    }

    async fn delete_steps_for_execution(&self, execution_id: Uuid) -> Result<u64, StoreError> {
        let mut steps = self.steps.write();
        let before = steps.len();
        steps.retain(|_, s| s.execution_id != execution_id);
        Ok((before - steps.len()) as u64)
    }

    async fn append_progress_event(
        &self,
        execution_id: Uuid,
        event: NewProgressEvent,
    ) -> Result<ProgressEvent, StoreError> {
        if !self.executions.read().contains_key(&execution_id) {
            return Err(StoreError::ExecutionNotFound(execution_id));
        }

        let mut events = self.events.write();
        let entries = events.entry(execution_id).or_default();
        let sequence_number = entries.last().map(|e| e.sequence_number + 1).unwrap_or(1);
        let now = Utc::now();

        let stored = ProgressEvent {
            id: Uuid::now_v7(),
            execution_id,
            event_type: event.event_type,
            progress_percentage: clamp_progress(event.progress_percentage),
            eta_seconds: event.eta_seconds,
            current_step_desc: event.current_step_desc,
            event_details: event.event_details,
            timestamp: now,
            sequence_number,
            created_at: now,
        };
        entries.push(stored.clone());
        Ok(stored)
    }

    async fn list_progress_events(
        &self,
        execution_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<ProgressEvent>, StoreError> {
        let events = self.events.read();
        let entries = events.get(&execution_id).cloned().unwrap_or_default();
        Ok(match limit {
            Some(limit) => entries.into_iter().take(limit.max(0) as usize).collect(),
            None => entries,
        })
    }

    async fn recent_progress_events(
        &self,
        execution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ProgressEvent>, StoreError> {
        let events = self.events.read();
        let entries = events.get(&execution_id).cloned().unwrap_or_default();
        let skip = entries.len().saturating_sub(limit.max(0) as usize);
        Ok(entries.into_iter().skip(skip).collect())
    }

    async fn count_progress_events(&self, execution_id: Uuid) -> Result<u64, StoreError> {
        Ok(self
            .events
            .read()
            .get(&execution_id)
            .map(|e| e.len() as u64)
            .unwrap_or(0))
    }

    async fn delete_progress_events_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<u64, StoreError> {
        Ok(self
            .events
            .write()
            .remove(&execution_id)
            .map(|e| e.len() as u64)
            .unwrap_or(0))
    }

    async fn insert_subscriptions(
        &self,
        execution_id: Uuid,
        topics: &[String],
        expiry_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExecutionSubscription>, StoreError> {
        if !self.executions.read().contains_key(&execution_id) {
            return Err(StoreError::ExecutionNotFound(execution_id));
        }

        let mut subscriptions = self.subscriptions.write();
        let now = Utc::now();
        let mut created = vec![];

        for topic in topics {
            let exists = subscriptions
                .values()
                .any(|s| s.execution_id == execution_id && &s.callback_topic == topic);
            if exists {
                continue;
            }

            let subscription = ExecutionSubscription {
                id: Uuid::now_v7(),
                execution_id,
                callback_topic: topic.clone(),
                subscription_time: now,
                expiry_time,
                delivery_status: DeliveryStatus::Active,
                created_at: now,
            };
            created.push(subscription.clone());
            subscriptions.insert(subscription.id, subscription);
        }

        Ok(created)
    }

    async fn list_subscriptions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<ExecutionSubscription>, StoreError> {
        let mut subs: Vec<ExecutionSubscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.subscription_time);
        Ok(subs)
    }

    async fn get_active_topics(&self, execution_id: Uuid) -> Result<Vec<String>, StoreError> {
        let mut topics: Vec<String> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.execution_id == execution_id && s.delivery_status == DeliveryStatus::Active)
            .map(|s| s.callback_topic.clone())
            .collect();
        topics.sort();
        Ok(topics)
    }

    async fn set_delivery_status(
        &self,
        subscription_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<(), StoreError> {
        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions
            .get_mut(&subscription_id)
            .ok_or(StoreError::SubscriptionNotFound(subscription_id))?;
        subscription.delivery_status = status;
        Ok(())
    }

    async fn delete_subscriptions_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<u64, StoreError> {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|_, s| s.execution_id != execution_id);
        Ok((before - subscriptions.len()) as u64)
    }
}
