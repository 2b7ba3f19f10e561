//! PostgreSQL implementation of PipelineStore
//!
//! Production persistence using PostgreSQL with:
//! - Optimistic concurrency control via row versions
//! - Per-execution progress event sequences assigned under a row lock
//! - Partial indexes for awaiting steps and retention cleanup

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use cascade_core::{DeliveryStatus, ExecutionStatus, StepStatus};

use crate::models::*;
use crate::store::{PipelineStore, StoreError};

/// Run the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// PostgreSQL implementation of PipelineStore
///
/// Uses a connection pool for efficient database access.
///
/// # Example
///
/// ```ignore
/// use cascade_storage::PostgresStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/cascade").await?;
/// let store = PostgresStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Distinguish a missing row from a version conflict after a
    /// version-checked UPDATE matched nothing
    async fn execution_version_mismatch(
        &self,
        id: Uuid,
        expected_version: i32,
    ) -> StoreError {
        match sqlx::query("SELECT version FROM pipeline_execution WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => StoreError::VersionConflict {
                expected: expected_version,
                actual: row.get("version"),
            },
            Ok(None) => StoreError::ExecutionNotFound(id),
            Err(e) => StoreError::Database(e.to_string()),
        }
    }

    async fn step_version_mismatch(&self, id: Uuid, expected_version: i32) -> StoreError {
        match sqlx::query("SELECT version FROM step_execution WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => StoreError::VersionConflict {
                expected: expected_version,
                actual: row.get("version"),
            },
            Ok(None) => StoreError::StepNotFound(id),
            Err(e) => StoreError::Database(e.to_string()),
        }
    }
}

const EXECUTION_COLUMNS: &str = "id, version, pipeline_definition, initiator, start_time, \
     end_time, status, progress_percentage, final_outputs, error_info, created_at, updated_at";

const STEP_COLUMNS: &str = "id, execution_id, version, step_id, step_name, status, start_time, \
     end_time, progress_percentage, outputs, error_message, retry_count, sequence_number, \
     handler_type, awaiting_event, external_workflow_id, event_deadline, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, execution_id, event_type, progress_percentage, eta_seconds, \
     current_step_desc, event_details, timestamp, sequence_number, created_at";

const SUBSCRIPTION_COLUMNS: &str = "id, execution_id, callback_topic, subscription_time, \
     expiry_time, delivery_status, created_at";

fn parse_execution_status(s: &str) -> Result<ExecutionStatus, StoreError> {
    ExecutionStatus::parse(s)
        .ok_or_else(|| StoreError::Database(format!("unknown execution status: {s}")))
}

fn parse_step_status(s: &str) -> Result<StepStatus, StoreError> {
    StepStatus::parse(s).ok_or_else(|| StoreError::Database(format!("unknown step status: {s}")))
}

fn map_execution(row: &PgRow) -> Result<PipelineExecution, StoreError> {
    let status: String = row.get("status");
    Ok(PipelineExecution {
        id: row.get("id"),
        version: row.get("version"),
        pipeline_definition: row.get("pipeline_definition"),
        initiator: row.get("initiator"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status: parse_execution_status(&status)?,
        progress_percentage: row.get("progress_percentage"),
        final_outputs: row.get("final_outputs"),
        error_info: row.get("error_info"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_step(row: &PgRow) -> Result<StepExecution, StoreError> {
    let status: String = row.get("status");
    Ok(StepExecution {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        version: row.get("version"),
        step_id: row.get("step_id"),
        step_name: row.get("step_name"),
        status: parse_step_status(&status)?,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        progress_percentage: row.get("progress_percentage"),
        outputs: row.get("outputs"),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        sequence_number: row.get("sequence_number"),
        handler_type: row.get("handler_type"),
        awaiting_event: row.get("awaiting_event"),
        external_workflow_id: row.get("external_workflow_id"),
        event_deadline: row.get("event_deadline"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_event(row: &PgRow) -> Result<ProgressEvent, StoreError> {
    let event_type: String = row.get("event_type");
    Ok(ProgressEvent {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        event_type: cascade_core::ProgressEventType::parse(&event_type)
            .ok_or_else(|| StoreError::Database(format!("unknown event type: {event_type}")))?,
        progress_percentage: row.get("progress_percentage"),
        eta_seconds: row.get("eta_seconds"),
        current_step_desc: row.get("current_step_desc"),
        event_details: row.get("event_details"),
        timestamp: row.get("timestamp"),
        sequence_number: row.get("sequence_number"),
        created_at: row.get("created_at"),
    })
}

fn map_subscription(row: &PgRow) -> Result<ExecutionSubscription, StoreError> {
    let delivery_status: String = row.get("delivery_status");
    Ok(ExecutionSubscription {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        callback_topic: row.get("callback_topic"),
        subscription_time: row.get("subscription_time"),
        expiry_time: row.get("expiry_time"),
        delivery_status: DeliveryStatus::parse(&delivery_status).ok_or_else(|| {
            StoreError::Database(format!("unknown delivery status: {delivery_status}"))
        })?,
        created_at: row.get("created_at"),
    })
}

/// Map constraint violations onto the store error vocabulary
fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23503") {
            return StoreError::Database(format!("missing parent row: {db_err}"));
        }
        if db_err.code().as_deref() == Some("23505") {
            let field = match db_err.constraint() {
                Some("uq_step_execution_awaiting_workflow") => "external_workflow_id",
                Some("uq_step_execution_step_id") => "step_id",
                Some("uq_execution_subscription_topic") => "callback_topic",
                _ => "unique key",
            };
            return StoreError::Duplicate {
                field,
                value: db_err.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    StoreError::Database(err.to_string())
}

#[async_trait]
impl PipelineStore for PostgresStore {
    #[instrument(skip(self, new))]
    async fn create_execution(&self, new: NewExecution) -> Result<PipelineExecution, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pipeline_execution (id, pipeline_definition, initiator)
            VALUES ($1, $2, $3)
            RETURNING {EXECUTION_COLUMNS}
            "#,
        ))
        .bind(new.id)
        .bind(&new.pipeline_definition)
        .bind(&new.initiator)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create execution: {}", e);
            map_db_error(e)
        })?;

        debug!(execution_id = %new.id, "created execution");
        map_execution(&row)
    }

    #[instrument(skip(self))]
    async fn get_execution(&self, id: Uuid) -> Result<Option<PipelineExecution>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM pipeline_execution WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        row.as_ref().map(map_execution).transpose()
    }

    #[instrument(skip(self, filter))]
    async fn list_executions(
        &self,
        filter: ExecutionFilter,
        page: PageRequest,
    ) -> Result<(Vec<PipelineExecution>, u64), StoreError> {
        let status = filter.status.map(|s| s.as_str().to_string());

        const WHERE_CLAUSE: &str = r#"
            ($1::text IS NULL OR status = $1)
            AND ($2::text IS NULL OR initiator = $2)
            AND ($3::timestamptz IS NULL OR created_at >= $3)
            AND ($4::timestamptz IS NULL OR created_at <= $4)
            AND ($5::text IS NULL OR COALESCE(
                pipeline_definition->'definition'->>'name',
                pipeline_definition->>'name'
            ) = $5)
        "#;

        let count_row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM pipeline_execution WHERE {WHERE_CLAUSE}"
        ))
        .bind(&status)
        .bind(&filter.initiator)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(&filter.pipeline_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;
        let total: i64 = count_row.get("total");

        let rows = sqlx::query(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS} FROM pipeline_execution
            WHERE {WHERE_CLAUSE}
            ORDER BY created_at DESC
            LIMIT $6 OFFSET $7
            "#,
        ))
        .bind(&status)
        .bind(&filter.initiator)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(&filter.pipeline_name)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            executions.push(map_execution(row)?);
        }
        Ok((executions, total.max(0) as u64))
    }

    #[instrument(skip(self, patch))]
    async fn update_execution(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: ExecutionPatch,
    ) -> Result<i32, StoreError> {
        let status = patch.status.map(|s| s.as_str().to_string());

        let row = sqlx::query(
            r#"
            UPDATE pipeline_execution
            SET version = version + 1,
                status = COALESCE($3, status),
                start_time = COALESCE($4, start_time),
                end_time = COALESCE($5, end_time),
                progress_percentage = LEAST(
                    GREATEST(progress_percentage, COALESCE($6, progress_percentage)),
                    100.00
                ),
                final_outputs = COALESCE($7, final_outputs),
                error_info = COALESCE($8, error_info),
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(&status)
        .bind(patch.start_time)
        .bind(patch.end_time)
        .bind(patch.progress_percentage)
        .bind(&patch.final_outputs)
        .bind(&patch.error_info)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        match row {
            Some(row) => Ok(row.get("version")),
            None => Err(self.execution_version_mismatch(id, expected_version).await),
        }
    }

    #[instrument(skip(self))]
    async fn delete_execution(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pipeline_execution WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_expired_executions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM pipeline_execution
            WHERE status IN ('COMPLETED', 'FAILED', 'INTERRUPTED')
              AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    #[instrument(skip(self, new_steps))]
    async fn insert_steps(
        &self,
        new_steps: Vec<NewStepExecution>,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let mut created = Vec::with_capacity(new_steps.len());

        for new in new_steps {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO step_execution (
                    id, execution_id, step_id, step_name, handler_type, sequence_number
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING {STEP_COLUMNS}
                "#,
            ))
            .bind(Uuid::now_v7())
            .bind(new.execution_id)
            .bind(&new.step_id)
            .bind(&new.step_name)
            .bind(&new.handler_type)
            .bind(new.sequence_number)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

            created.push(map_step(&row)?);
        }

        tx.commit().await.map_err(map_db_error)?;
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_step(&self, id: Uuid) -> Result<Option<StepExecution>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM step_execution WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        row.as_ref().map(map_step).transpose()
    }

    #[instrument(skip(self))]
    async fn get_steps_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {STEP_COLUMNS} FROM step_execution
            WHERE execution_id = $1
            ORDER BY sequence_number
            "#,
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.iter().map(map_step).collect()
    }

    #[instrument(skip(self, patch))]
    async fn update_step(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: StepPatch,
    ) -> Result<i32, StoreError> {
        let status = patch.status.map(|s| s.as_str().to_string());

        // The wait-marker columns are cleared together whenever the step is
        // no longer awaiting; the partial unique index enforces one
        // awaiting step per external workflow id.
        let row = sqlx::query(
            r#"
            UPDATE step_execution
            SET version = version + 1,
                status = COALESCE($3, status),
                start_time = COALESCE($4, start_time),
                end_time = COALESCE($5, end_time),
                progress_percentage = LEAST(
                    GREATEST(progress_percentage, COALESCE($6, progress_percentage)),
                    100.00
                ),
                outputs = COALESCE($7, outputs),
                error_message = COALESCE($8, error_message),
                retry_count = COALESCE($9, retry_count),
                awaiting_event = COALESCE($10, awaiting_event),
                external_workflow_id = CASE
                    WHEN COALESCE($10, awaiting_event)
                        THEN COALESCE($11, external_workflow_id)
                    ELSE NULL
                END,
                event_deadline = CASE
                    WHEN COALESCE($10, awaiting_event)
                        THEN COALESCE($12, event_deadline)
                    ELSE NULL
                END,
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(&status)
        .bind(patch.start_time)
        .bind(patch.end_time)
        .bind(patch.progress_percentage)
        .bind(&patch.outputs)
        .bind(&patch.error_message)
        .bind(patch.retry_count)
        .bind(patch.awaiting_event)
        .bind(&patch.external_workflow_id)
        .bind(patch.event_deadline)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        match row {
            Some(row) => Ok(row.get("version")),
            None => Err(self.step_version_mismatch(id, expected_version).await),
        }
    }

    #[instrument(skip(self))]
    async fn get_step_by_external_workflow_id(
        &self,
        external_workflow_id: &str,
    ) -> Result<Option<StepExecution>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {STEP_COLUMNS} FROM step_execution
            WHERE awaiting_event AND external_workflow_id = $1
            "#,
        ))
        .bind(external_workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        row.as_ref().map(map_step).transpose()
    }

    #[instrument(skip(self))]
    async fn get_awaiting_steps_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {STEP_COLUMNS} FROM step_execution
            WHERE execution_id = $1 AND awaiting_event
            ORDER BY sequence_number
            "#,
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.iter().map(map_step).collect()
    }

    #[instrument(skip(self))]
    async fn list_awaiting_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {STEP_COLUMNS} FROM step_execution
            WHERE awaiting_event AND status = 'RUNNING' AND event_deadline <= $1
            "#,
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.iter().map(map_step).collect()
    }

    #[instrument(skip(self, outputs))]
    async fn complete_step_from_event(
        &self,
        id: Uuid,
        expected_version: i32,
        status: StepStatus,
        outputs: Value,
        error_message: Option<String>,
    ) -> Result<i32, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE step_execution
            SET version = version + 1,
                status = $3,
                outputs = $4,
                error_message = $5,
                end_time = now(),
                awaiting_event = FALSE,
                external_workflow_id = NULL,
                event_deadline = NULL,
                progress_percentage = CASE WHEN $3 = 'COMPLETED'
                    THEN 100.00 ELSE progress_percentage END,
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(status.as_str())
        .bind(&outputs)
        .bind(&error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        match row {
            Some(row) => Ok(row.get("version")),
            None => Err(self.step_version_mismatch(id, expected_version).await),
        }
    }

    #[instrument(skip(self))]
    async fn delete_steps_for_execution(&self, execution_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM step_execution WHERE execution_id = $1")
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, event))]
    async fn append_progress_event(
        &self,
        execution_id: Uuid,
        event: NewProgressEvent,
    ) -> Result<ProgressEvent, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        // Serialize sequence assignment per execution on the parent row
        let parent = sqlx::query("SELECT id FROM pipeline_execution WHERE id = $1 FOR UPDATE")
            .bind(execution_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?;
        if parent.is_none() {
            return Err(StoreError::ExecutionNotFound(execution_id));
        }

        let seq_row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_number), 0) + 1 AS next_seq
            FROM progress_event
            WHERE execution_id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;
        let sequence_number: i64 = seq_row.get("next_seq");

        let progress = event
            .progress_percentage
            .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO progress_event (
                id, execution_id, event_type, progress_percentage, eta_seconds,
                current_step_desc, event_details, sequence_number
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {EVENT_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(execution_id)
        .bind(event.event_type.as_str())
        .bind(progress)
        .bind(event.eta_seconds)
        .bind(&event.current_step_desc)
        .bind(&event.event_details)
        .bind(sequence_number)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;

        debug!(%execution_id, sequence_number, "appended progress event");
        map_event(&row)
    }

    #[instrument(skip(self))]
    async fn list_progress_events(
        &self,
        execution_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<ProgressEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM progress_event
            WHERE execution_id = $1
            ORDER BY sequence_number
            LIMIT $2
            "#,
        ))
        .bind(execution_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.iter().map(map_event).collect()
    }

    #[instrument(skip(self))]
    async fn recent_progress_events(
        &self,
        execution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ProgressEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM (
                SELECT {EVENT_COLUMNS} FROM progress_event
                WHERE execution_id = $1
                ORDER BY sequence_number DESC
                LIMIT $2
            ) recent
            ORDER BY sequence_number
            "#,
        ))
        .bind(execution_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.iter().map(map_event).collect()
    }

    #[instrument(skip(self))]
    async fn count_progress_events(&self, execution_id: Uuid) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM progress_event WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        let total: i64 = row.get("total");
        Ok(total.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn delete_progress_events_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM progress_event WHERE execution_id = $1")
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, topics))]
    async fn insert_subscriptions(
        &self,
        execution_id: Uuid,
        topics: &[String],
        expiry_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExecutionSubscription>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let mut created = vec![];

        for topic in topics {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO execution_subscription (id, execution_id, callback_topic, expiry_time)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (execution_id, callback_topic) DO NOTHING
                RETURNING {SUBSCRIPTION_COLUMNS}
                "#,
            ))
            .bind(Uuid::now_v7())
            .bind(execution_id)
            .bind(topic)
            .bind(expiry_time)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?;

            if let Some(row) = row {
                created.push(map_subscription(&row)?);
            }
        }

        tx.commit().await.map_err(map_db_error)?;
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn list_subscriptions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<ExecutionSubscription>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM execution_subscription
            WHERE execution_id = $1
            ORDER BY subscription_time
            "#,
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.iter().map(map_subscription).collect()
    }

    #[instrument(skip(self))]
    async fn get_active_topics(&self, execution_id: Uuid) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT callback_topic FROM execution_subscription
            WHERE execution_id = $1 AND delivery_status = 'active'
            ORDER BY callback_topic
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(rows.iter().map(|r| r.get("callback_topic")).collect())
    }

    #[instrument(skip(self))]
    async fn set_delivery_status(
        &self,
        subscription_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE execution_subscription SET delivery_status = $2 WHERE id = $1",
        )
        .bind(subscription_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SubscriptionNotFound(subscription_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_subscriptions_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM execution_subscription WHERE execution_id = $1")
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected())
    }
}
