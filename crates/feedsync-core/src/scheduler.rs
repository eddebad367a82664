//! Loop firing due sync-status poller jobs.
//!
//! ```text
//! loop {
//!     1. Check for cancellation
//!     2. Load jobs whose trigger is active and due
//!     3. Disarm the trigger, fire the job, persist it
//!     4. Delete jobs marked remove-on-exit
//!     5. Sleep for the tick interval
//! }
//! ```
//!
//! Disarming the trigger before firing means a firing that aborts leaves the
//! job parked until something re-arms it; only a successful reschedule
//! re-arms it.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::job::{JobResult, PollerJob};
use crate::poller::SyncStatusPoller;
use crate::traits::{ConfigStore, PollerJobStore, RemoteSyncClient};

/// Counts of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub fired: usize,
    pub finished: usize,
    pub rescheduled: usize,
    pub failed: usize,
}

/// Fires due poller jobs until cancelled.
pub struct PollerScheduler<S, R, J>
where
    S: ConfigStore,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    poller: SyncStatusPoller<S, R, J>,
    tick: Duration,
}

impl<S, R, J> PollerScheduler<S, R, J>
where
    S: ConfigStore,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    pub fn new(poller: SyncStatusPoller<S, R, J>, tick: Duration) -> Self {
        Self { poller, tick }
    }

    /// Runs passes every `tick` until `cancel_token` fires.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<(), AppError> {
        info!(tick_secs = self.tick.as_secs(), "Sync status scheduler started");

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(summary) if summary.fired > 0 => {
                    info!(
                        fired = summary.fired,
                        finished = summary.finished,
                        rescheduled = summary.rescheduled,
                        failed = summary.failed,
                        "Sync status jobs fired"
                    );
                }
                Ok(_) => debug!("No sync status job due"),
                Err(e) => error!(error = %e, "Failed to load due sync status jobs"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = cancel_token.cancelled() => break,
            }
        }

        info!("Sync status scheduler stopped");
        Ok(())
    }

    /// Fires every job due now.
    pub async fn run_once(&self) -> Result<TickSummary, AppError> {
        let now = Utc::now();
        let jobs = self.poller.jobs();
        let mut summary = TickSummary::default();

        for mut job in jobs.due_jobs(now).await? {
            summary.fired += 1;
            self.disarm(&mut job).await;

            let result = self.poller.fire(&mut job, now).await;
            match result.result {
                JobResult::Success => summary.finished += 1,
                JobResult::Unknown => summary.rescheduled += 1,
                JobResult::Failure => summary.failed += 1,
            }

            if job.remove_on_exit && !job.active {
                if let Err(e) = jobs.remove_job(&job.code).await {
                    error!(job = %job.code, error = %e, "Failed to remove finished job");
                }
            }
        }

        Ok(summary)
    }

    async fn disarm(&self, job: &mut PollerJob) {
        if let Some(trigger) = job.trigger.as_mut() {
            trigger.active = false;
        }
        if let Err(e) = self.poller.jobs().save_job(job).await {
            error!(job = %job.code, error = %e, "Failed to disarm job trigger");
        }
    }
}
