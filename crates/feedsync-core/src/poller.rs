//! Sync-status poller.
//!
//! One firing reads the remote sync status and compares the current
//! generation with the one stored on the configuration:
//!
//! | stored generation | observed generation | effect                                   |
//! |-------------------|---------------------|------------------------------------------|
//! | unset             | anything            | store it, reschedule (+poll interval)    |
//! | G1                | G1                  | reschedule (+poll interval)              |
//! | G1                | G2 or unparseable   | store it, status SUCCESS, job DONE       |
//!
//! Only a change relative to a previously stored generation ends the job. An
//! unparseable generation is stored as unset, so it counts as a first
//! observation on a later run.
//! A failed status request aborts the firing and does not reschedule it.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info};

use crate::batch::resolve_config;
use crate::error::AppError;
use crate::job::{PerformResult, PollerJob};
use crate::models::{IndexRunConfig, RunStatus, SyncStatusResponse};
use crate::traits::{ConfigStore, PollerJobStore, RemoteSyncClient};

/// Fires sync-status poller jobs.
#[derive(Clone)]
pub struct SyncStatusPoller<S, R, J>
where
    S: ConfigStore,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    store: S,
    remote: R,
    jobs: J,
    poll_interval: Duration,
}

impl<S, R, J> SyncStatusPoller<S, R, J>
where
    S: ConfigStore,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    pub fn new(store: S, remote: R, jobs: J, poll_interval: Duration) -> Self {
        Self {
            store,
            remote,
            jobs,
            poll_interval,
        }
    }

    pub fn jobs(&self) -> &J {
        &self.jobs
    }

    /// Fires `job` at `now`. Errors are logged and reported as FAILURE.
    pub async fn fire(&self, job: &mut PollerJob, now: DateTime<Utc>) -> PerformResult {
        match self.perform(job, now).await {
            Ok(result) => result,
            Err(e) => {
                error!(job = %job.code, feed = %job.config_name, error = %e, "Error running sync status check job");
                PerformResult::FAILURE
            }
        }
    }

    /// Fires `job` at `now`, propagating errors.
    pub async fn perform(&self, job: &mut PollerJob, now: DateTime<Utc>) -> Result<PerformResult, AppError> {
        let mut config = resolve_config(&self.store, &job.config_name).await?;
        let status = self
            .remote
            .sync_status(&config.endpoint.sync_status_url)
            .await?;
        let observed = status.current.sync_time;

        match config.last_sync_generation {
            None => {
                debug!(feed = %config.name, generation = ?observed, "First sync generation observed");
                self.store_generation(&mut config, &status).await?;
            }
            Some(previous) if observed != Some(previous) => {
                self.store_generation(&mut config, &status).await?;
                config.status = RunStatus::Success;
                self.store.save(&config).await?;

                job.finish();
                self.jobs.save_job(job).await?;
                info!(
                    feed = %config.name,
                    index = config.last_index_name.as_deref().unwrap_or_default(),
                    "Remote index swap observed, synchronization finished"
                );
                return Ok(PerformResult::SUCCESS);
            }
            Some(_) => {
                debug!(feed = %config.name, "Sync generation unchanged");
            }
        }

        self.reschedule(job, now).await?;
        Ok(PerformResult::RESCHEDULED)
    }

    async fn store_generation(
        &self,
        config: &mut IndexRunConfig,
        status: &SyncStatusResponse,
    ) -> Result<(), AppError> {
        config.last_sync_generation = status.current.sync_time;
        config.last_index_name = status.current.index_name.clone();
        self.store.save(config).await
    }

    async fn reschedule(&self, job: &mut PollerJob, now: DateTime<Utc>) -> Result<(), AppError> {
        let interval = TimeDelta::from_std(self.poll_interval)
            .map_err(|e| AppError::ConfigError(format!("poll interval out of range: {}", e)))?;
        job.reschedule(now + interval);
        self.jobs.save_job(job).await?;
        debug!(job = %job.code, next = %(now + interval), "Sync status check rescheduled");
        Ok(())
    }
}
