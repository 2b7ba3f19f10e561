//! Timeout scheduler
//!
//! Periodically sweeps for awaiting steps whose event deadline elapsed
//! and closes them with status TIMEOUT. The scheduler is the sole
//! authority that terminates stuck event waits.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use cascade_storage::PipelineStore;

use crate::router::EventRouter;

/// Outcome of a single sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Steps successfully timed out
    pub timed_out: usize,

    /// Steps whose processing failed (logged, sweep continued)
    pub failed: usize,
}

/// Periodic deadline sweeper for event-driven steps
pub struct TimeoutScheduler {
    store: Arc<dyn PipelineStore>,
    router: EventRouter,
    interval: Duration,
}

impl TimeoutScheduler {
    pub fn new(store: Arc<dyn PipelineStore>, router: EventRouter, interval: Duration) -> Self {
        Self {
            store,
            router,
            interval,
        }
    }

    /// Run one sweep: time out every awaiting step past its deadline
    ///
    /// A failure on one step never stops processing of the others.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SweepStats {
        let overdue = match self.store.list_awaiting_past_deadline(Utc::now()).await {
            Ok(steps) => steps,
            Err(err) => {
                error!(error = %err, "deadline scan failed");
                return SweepStats::default();
            }
        };

        if overdue.is_empty() {
            return SweepStats::default();
        }
        info!(count = overdue.len(), "processing overdue event waits");

        let mut stats = SweepStats::default();
        for step in &overdue {
            let result = self.router.process_timeout(step).await;
            if result.step_completed {
                stats.timed_out += 1;
            } else {
                stats.failed += 1;
            }
        }
        stats
    }

    /// Spawn the periodic sweep loop; flips of `shutdown` stop it
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = self.sweep().await;
                        if stats != SweepStats::default() {
                            debug!(?stats, "timeout sweep finished");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("timeout scheduler shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }
}
