//! Retention worker
//!
//! Deletes terminal executions older than the retention window together
//! with everything they own. Children are deleted in dependency order at
//! the application layer (progress events, then subscriptions, then
//! steps, then the execution) so optimistic versions stay consistent and
//! batch boundaries show up in the logs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use cascade_storage::{PipelineStore, StoreError};

use crate::config::EngineConfig;

/// Hour of day (local time) the daily sweep runs at
const SWEEP_HOUR: u32 = 2;

/// Summary of one retention run
#[derive(Debug, Clone)]
pub struct RetentionSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cutoff: DateTime<Utc>,
    /// Executions fully removed
    pub deleted: u64,
    /// Executions that errored (logged and skipped)
    pub errors: u64,
}

/// Daily cleanup worker for expired executions
pub struct RetentionWorker {
    store: Arc<dyn PipelineStore>,
    config: EngineConfig,
}

impl RetentionWorker {
    pub fn new(store: Arc<dyn PipelineStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Run one full sweep over everything past the retention window
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> RetentionSummary {
        let started_at = Utc::now();
        let cutoff = started_at - Duration::days(self.config.retention_days as i64);
        let batch_size = self.config.retention_batch_size.max(1);

        info!(%cutoff, retention_days = self.config.retention_days, "retention sweep starting");

        let mut deleted = 0u64;
        let mut errors = 0u64;

        loop {
            let batch = match self.store.list_expired_executions(cutoff, batch_size).await {
                Ok(batch) => batch,
                Err(err) => {
                    error!(error = %err, "failed to list expired executions");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let batch_len = batch.len() as i64;
            let mut batch_deleted = 0u64;
            for execution_id in batch {
                match self.purge_execution(execution_id).await {
                    Ok(()) => {
                        deleted += 1;
                        batch_deleted += 1;
                    }
                    Err(err) => {
                        warn!(%execution_id, error = %err, "failed to purge execution; continuing");
                        errors += 1;
                    }
                }
            }

            // A batch where nothing could be deleted would repeat forever
            if batch_deleted == 0 {
                break;
            }
            if batch_len < batch_size {
                break;
            }
        }

        let finished_at = Utc::now();
        info!(
            started_at = %started_at,
            finished_at = %finished_at,
            deleted,
            errors,
            "retention sweep finished"
        );

        RetentionSummary {
            started_at,
            finished_at,
            cutoff,
            deleted,
            errors,
        }
    }

    /// Delete one execution and its descendants in dependency order
    async fn purge_execution(&self, execution_id: Uuid) -> Result<(), StoreError> {
        self.store
            .delete_progress_events_for_execution(execution_id)
            .await?;
        self.store
            .delete_subscriptions_for_execution(execution_id)
            .await?;
        self.store.delete_steps_for_execution(execution_id).await?;
        self.store.delete_execution(execution_id).await?;
        Ok(())
    }

    /// Spawn the daily schedule (02:00 local time)
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait = duration_until_next_run(SWEEP_HOUR);
                info!(?wait, "retention worker sleeping until next run");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        self.run_once().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("retention worker shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Time until the next local occurrence of `hour`:00
fn duration_until_next_run(hour: u32) -> std::time::Duration {
    let now = chrono::Local::now().naive_local();
    let today = now.date().and_hms_opt(hour, 0, 0).expect("valid time");
    let next = if now < today {
        today
    } else {
        today + Duration::days(1)
    };
    (next - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_until_next_run_is_at_most_a_day() {
        let wait = duration_until_next_run(SWEEP_HOUR);
        assert!(wait <= std::time::Duration::from_secs(24 * 60 * 60));
        assert!(wait > std::time::Duration::ZERO);
    }
}
