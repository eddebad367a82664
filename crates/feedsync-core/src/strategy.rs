//! Indexing strategy: partition, distribute, wait, trigger, schedule.
//!
//! ```text
//! run id = (wall clock millis << 16) + sequence
//! export dir -> batches -> distributed run -> wait loop
//!            -> GET trigger_sync_url -> poller job (+first_poll_delay)
//! ```
//!
//! The wait loop re-enters a bounded wait until the run is terminal. While
//! the system is suspended it sleeps and retries; that never fails the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::context::SystemState;
use crate::error::AppError;
use crate::events::{PipelineEvent, PipelineReporter, SilentReporter};
use crate::executor::{DistributedExecutor, WaitOutcome};
use crate::job::PollerJob;
use crate::models::{IndexRunConfig, ItemId, RunRequest, partition};
use crate::traits::{AtomicSequence, PollerJobStore, RemoteSyncClient, SequenceGenerator};

/// Directory name used under the platform temp dir when no export dir is configured.
pub const DEFAULT_EXPORT_SUBDIR: &str = "feedsync";

/// Composes a run id from a millisecond timestamp and a sequence value.
pub fn compose_run_id(millis: u64, sequence: u64) -> u64 {
    (millis << 16).wrapping_add(sequence)
}

/// Resolves the export directory, creating it if missing.
///
/// An unset or empty directory resolves to `<temp dir>/feedsync`. Fails with
/// [`AppError::InvalidExportPath`] if the directory cannot be created or is
/// read-only.
pub fn resolve_export_dir(configured: Option<&Path>) -> Result<PathBuf, AppError> {
    let path = match configured {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::env::temp_dir().join(DEFAULT_EXPORT_SUBDIR),
    };
    let invalid = |reason: String| AppError::InvalidExportPath {
        path: path.clone(),
        reason,
    };

    std::fs::create_dir_all(&path).map_err(|e| invalid(e.to_string()))?;
    let metadata = std::fs::metadata(&path).map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    if metadata.permissions().readonly() {
        return Err(invalid("directory is not writable".to_string()));
    }
    Ok(path)
}

/// Coordinates one run across the distributed executor and the remote service.
pub struct IndexingStrategy<E, R, J>
where
    E: DistributedExecutor,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    executor: E,
    remote: R,
    jobs: J,
    system: SystemState,
    sequence: Arc<dyn SequenceGenerator>,
    config: PipelineConfig,
    reporter: Arc<dyn PipelineReporter>,
}

impl<E, R, J> IndexingStrategy<E, R, J>
where
    E: DistributedExecutor,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    pub fn new(executor: E, remote: R, jobs: J, system: SystemState, config: PipelineConfig) -> Self {
        Self {
            executor,
            remote,
            jobs,
            system,
            sequence: Arc::new(AtomicSequence::default()),
            config,
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_sequence(mut self, sequence: Arc<dyn SequenceGenerator>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn PipelineReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn next_run_id(&self) -> u64 {
        let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        compose_run_id(millis, self.sequence.next_sequence())
    }

    /// Exports `item_ids`, triggers the remote rebuild and schedules the poller.
    ///
    /// Fails with [`AppError::IndexingFailed`] if the run fails and with
    /// [`AppError::SyncTriggerFailed`] if the remote refuses the trigger.
    pub async fn execute(&self, config: &IndexRunConfig, item_ids: &[ItemId]) -> Result<(), AppError> {
        let run_id = self.next_run_id();
        let code = format!("{}-{}", config.name, run_id);
        let export_path = resolve_export_dir(config.plan.export_dir.as_deref())?;
        let batches = partition(item_ids, config.plan.batch_size);
        let batch_count = batches.len();

        self.executor
            .create_run(RunRequest {
                code: code.clone(),
                run_id,
                config_name: config.name.clone(),
                batches,
                export_path: export_path.clone(),
                execution_group: config.plan.execution_group.clone(),
            })
            .await?;
        self.executor.start(&code).await?;
        info!(
            feed = %config.name,
            run_id,
            batches = batch_count,
            items = item_ids.len(),
            export_path = %export_path.display(),
            "Distributed run started"
        );
        self.reporter.report(PipelineEvent::RunStarted {
            feed: &config.name,
            run_id,
            batches: batch_count,
            items: item_ids.len(),
        });

        self.await_run(&code, run_id).await?;
        self.reporter.report(PipelineEvent::RunSucceeded {
            feed: &config.name,
            run_id,
        });

        self.remote
            .trigger_sync(&config.endpoint.trigger_sync_url)
            .await?;
        self.reporter
            .report(PipelineEvent::SyncTriggered { feed: &config.name });

        self.schedule_poller(config).await
    }

    async fn await_run(&self, code: &str, run_id: u64) -> Result<(), AppError> {
        let _suspendable = self.system.suspendable_scope();

        loop {
            match self.executor.wait(code, self.config.wait_timeout).await? {
                WaitOutcome::Succeeded => return Ok(()),
                WaitOutcome::Failed(reason) => {
                    warn!(run = code, %reason, "Distributed run failed");
                    return Err(AppError::IndexingFailed(format!("{} ({})", code, reason)));
                }
                WaitOutcome::Pending => {
                    debug!(run = code, "Run still in progress");
                }
                WaitOutcome::Suspended => {
                    self.reporter.report(PipelineEvent::WaitSuspended { run_id });
                    tokio::time::sleep(self.config.suspend_retry_delay).await;
                }
            }
        }
    }

    async fn schedule_poller(&self, config: &IndexRunConfig) -> Result<(), AppError> {
        let first_delay = TimeDelta::from_std(self.config.first_poll_delay)
            .map_err(|e| AppError::ConfigError(format!("first poll delay out of range: {}", e)))?;
        let job = PollerJob::scheduled(&config.name, Utc::now(), first_delay);
        self.jobs.create_job(&job).await?;

        if let Some(trigger) = job.trigger.as_ref() {
            self.reporter.report(PipelineEvent::PollerScheduled {
                feed: &config.name,
                job_code: &job.code,
                first_firing: trigger.activation_time,
            });
        }
        Ok(())
    }
}
