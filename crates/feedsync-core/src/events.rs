//! Pipeline milestones and their reporters.
//!
//! The pipeline logs through `tracing` directly; [`PipelineEvent`]s are the
//! coarse milestones a launching surface may want to display (run started,
//! batch uploaded, sync triggered, and so on).

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Events emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    /// Batches were partitioned and the distributed run was created.
    RunStarted {
        feed: &'a str,
        run_id: u64,
        batches: usize,
        items: usize,
    },
    /// The system was suspended while waiting on the run.
    WaitSuspended { run_id: u64 },
    /// One upload attempt failed.
    UploadAttemptFailed {
        path: &'a Path,
        attempt: u32,
        max_attempts: u32,
        error: &'a str,
    },
    /// A batch file was uploaded.
    BatchUploaded {
        run_id: u64,
        path: &'a Path,
        items: usize,
        attempts: u32,
    },
    /// Every batch of the run succeeded.
    RunSucceeded { feed: &'a str, run_id: u64 },
    /// The remote rebuild was triggered.
    SyncTriggered { feed: &'a str },
    /// A sync-status poller job was persisted.
    PollerScheduled {
        feed: &'a str,
        job_code: &'a str,
        first_firing: DateTime<Utc>,
    },
    /// The run failed and the configuration was marked FAILURE.
    RunFailed { feed: &'a str, error: &'a str },
}

/// Receiver of [`PipelineEvent`]s.
pub trait PipelineReporter: Send + Sync {
    /// Called when a pipeline event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl PipelineReporter for SilentReporter {}

/// Reporter that logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl PipelineReporter for TracingReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted {
                feed,
                run_id,
                batches,
                items,
            } => {
                info!(feed, run_id, batches, items, "Data feed run started");
            }
            PipelineEvent::WaitSuspended { run_id } => {
                info!(run_id, "System suspended, waiting to resume");
            }
            PipelineEvent::UploadAttemptFailed {
                path,
                attempt,
                max_attempts,
                error,
            } => {
                warn!(path = %path.display(), attempt, max_attempts, %error, "Upload attempt failed");
            }
            PipelineEvent::BatchUploaded {
                run_id,
                path,
                items,
                attempts,
            } => {
                info!(run_id, path = %path.display(), items, attempts, "Batch uploaded");
            }
            PipelineEvent::RunSucceeded { feed, run_id } => {
                info!(feed, run_id, "All batches uploaded");
            }
            PipelineEvent::SyncTriggered { feed } => {
                info!(feed, "Remote synchronization triggered");
            }
            PipelineEvent::PollerScheduled {
                feed,
                job_code,
                first_firing,
            } => {
                info!(feed, job_code, %first_firing, "Sync status poller scheduled");
            }
            PipelineEvent::RunFailed { feed, error } => {
                error!(feed, %error, "Data feed run failed");
            }
        }
    }
}
