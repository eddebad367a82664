//! Distributed execution of batches.
//!
//! The strategy only needs "create, start, wait with timeout" from the
//! facility running its batches. [`LocalExecutor`] provides that on tokio
//! tasks in the current process; a multi-node facility implements the same
//! trait.
//!
//! A run is all-or-nothing: after the first failed batch, batches that have
//! not started are skipped and the run is marked FAILED once the batches
//! already in flight have finished, so they still clean up their files.
//! A wait that observes a terminal state archives the run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::SystemState;
use crate::error::AppError;
use crate::models::{Batch, DistributedRun, RunContext, RunRequest, RunState};

/// Result of one bounded wait on a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every batch succeeded.
    Succeeded,
    /// A batch failed; carries its error.
    Failed(String),
    /// The run is still in progress after the timeout.
    Pending,
    /// The whole system is suspended. Not a failure.
    Suspended,
}

/// Facility running the batches of a distributed run.
pub trait DistributedExecutor: Send + Sync {
    /// Registers a run in the CREATED state.
    fn create_run(
        &self,
        request: RunRequest,
    ) -> impl Future<Output = Result<DistributedRun, AppError>> + Send;

    /// Starts a created run.
    fn start(&self, code: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Waits up to `timeout` for the run to finish.
    fn wait(
        &self,
        code: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<WaitOutcome, AppError>> + Send;

    /// Current state of a run.
    fn run_state(&self, code: &str) -> impl Future<Output = Result<RunState, AppError>> + Send;
}

/// Processes one batch of a run.
pub trait BatchHandler: Send + Sync + 'static {
    fn process(
        &self,
        context: &RunContext,
        batch: &Batch,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

struct RunEntry {
    run: DistributedRun,
    execution_group: Option<String>,
    state_tx: watch::Sender<RunState>,
    failure: Option<String>,
}

type RunTable = Arc<Mutex<HashMap<String, RunEntry>>>;

fn lock(runs: &RunTable) -> MutexGuard<'_, HashMap<String, RunEntry>> {
    runs.lock().unwrap_or_else(|e| e.into_inner())
}

fn finish(runs: &RunTable, code: &str, state: RunState, failure: Option<String>) {
    if let Some(entry) = lock(runs).get_mut(code) {
        entry.run.state = state;
        entry.failure = failure;
        entry.state_tx.send_replace(state);
    }
}

/// In-process executor running batches on tokio tasks.
pub struct LocalExecutor<H: BatchHandler> {
    handler: Arc<H>,
    system: SystemState,
    permits: Arc<Semaphore>,
    runs: RunTable,
}

impl<H: BatchHandler> Clone for LocalExecutor<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            system: self.system.clone(),
            permits: Arc::clone(&self.permits),
            runs: Arc::clone(&self.runs),
        }
    }
}

impl<H: BatchHandler> LocalExecutor<H> {
    /// Creates an executor running at most `concurrency` batches at once.
    pub fn new(handler: H, system: SystemState, concurrency: usize) -> Self {
        Self {
            handler: Arc::new(handler),
            system,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of runs still tracked.
    pub fn tracked_runs(&self) -> usize {
        lock(&self.runs).len()
    }

    fn archive(&self, code: &str) -> Option<RunEntry> {
        let entry = lock(&self.runs).remove(code);
        if entry.is_some() {
            debug!(run = code, "Terminal run archived");
        }
        entry
    }

    async fn drive(
        handler: Arc<H>,
        permits: Arc<Semaphore>,
        runs: RunTable,
        context: RunContext,
        batches: Vec<Batch>,
    ) {
        let total = batches.len();
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for (index, batch) in batches.into_iter().enumerate() {
            let handler = Arc::clone(&handler);
            let permits = Arc::clone(&permits);
            let context = context.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(false),
                    permit = permits.acquire_owned() => {
                        permit.map_err(|e| (index, AppError::Generic(e.to_string())))?
                    }
                };
                if cancel.is_cancelled() {
                    return Ok(false);
                }
                debug!(run = %context.code, batch = index, items = batch.items.len(), "Processing batch");
                let result = handler.process(&context, &batch).await;
                if result.is_err() {
                    // Before the permit is released, so queued batches see it.
                    cancel.cancel();
                }
                result.map(|()| true).map_err(|e| (index, e))
            });
        }

        let mut completed = 0usize;
        let mut skipped = 0usize;
        let mut failure: Option<String> = None;
        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok(Ok(true)) => {
                    completed += 1;
                    continue;
                }
                Ok(Ok(false)) => {
                    skipped += 1;
                    continue;
                }
                Ok(Err((index, e))) => format!("batch {} failed: {}", index, e),
                Err(e) => format!("batch task panicked: {}", e),
            };
            cancel.cancel();
            if failure.is_none() {
                error!(run = %context.code, completed, total, error = %error, "Distributed run failed, draining in-flight batches");
                failure = Some(error);
            } else {
                warn!(run = %context.code, error = %error, "Further batch failure");
            }
        }

        match failure {
            Some(failure) => {
                info!(run = %context.code, completed, skipped, total, "Failed run drained");
                finish(&runs, &context.code, RunState::Failed, Some(failure));
            }
            None => {
                info!(run = %context.code, batches = total, "Distributed run succeeded");
                finish(&runs, &context.code, RunState::Succeeded, None);
            }
        }
    }
}

impl<H: BatchHandler> DistributedExecutor for LocalExecutor<H> {
    async fn create_run(&self, request: RunRequest) -> Result<DistributedRun, AppError> {
        let run = DistributedRun {
            code: request.code.clone(),
            run_id: request.run_id,
            config_name: request.config_name,
            state: RunState::Created,
            batches: request.batches,
            export_path: request.export_path,
        };
        let (state_tx, _rx) = watch::channel(RunState::Created);

        lock(&self.runs).insert(
            request.code,
            RunEntry {
                run: run.clone(),
                execution_group: request.execution_group,
                state_tx,
                failure: None,
            },
        );
        Ok(run)
    }

    async fn start(&self, code: &str) -> Result<(), AppError> {
        let (context, batches) = {
            let mut runs = lock(&self.runs);
            let entry = runs
                .get_mut(code)
                .ok_or_else(|| AppError::RunNotFound(code.to_string()))?;
            if entry.run.state != RunState::Created {
                return Err(AppError::Generic(format!(
                    "run {} cannot be started from state {}",
                    code, entry.run.state
                )));
            }
            if let Some(group) = entry.execution_group.as_deref() {
                debug!(run = code, execution_group = group, "Execution group ignored by local executor");
            }
            entry.run.state = RunState::Running;
            entry.state_tx.send_replace(RunState::Running);
            (entry.run.context(), entry.run.batches.clone())
        };

        if batches.is_empty() {
            warn!(run = code, "Run has no batches");
            finish(&self.runs, code, RunState::Succeeded, None);
            return Ok(());
        }

        tokio::spawn(Self::drive(
            Arc::clone(&self.handler),
            Arc::clone(&self.permits),
            Arc::clone(&self.runs),
            context,
            batches,
        ));
        Ok(())
    }

    async fn wait(&self, code: &str, timeout: Duration) -> Result<WaitOutcome, AppError> {
        let mut state_rx = lock(&self.runs)
            .get(code)
            .map(|entry| entry.state_tx.subscribe())
            .ok_or_else(|| AppError::RunNotFound(code.to_string()))?;
        let mut suspended_rx = self.system.subscribe();

        let observed = tokio::time::timeout(timeout, async {
            loop {
                if *suspended_rx.borrow_and_update() {
                    return None;
                }
                let state = *state_rx.borrow_and_update();
                if state.is_terminal() {
                    return Some(state);
                }
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return Some(*state_rx.borrow());
                        }
                    }
                    _ = suspended_rx.changed() => {}
                }
            }
        })
        .await;

        Ok(match observed {
            Err(_elapsed) => WaitOutcome::Pending,
            Ok(None) => WaitOutcome::Suspended,
            Ok(Some(RunState::Succeeded)) => {
                self.archive(code);
                WaitOutcome::Succeeded
            }
            Ok(Some(RunState::Failed)) => {
                let reason = self
                    .archive(code)
                    .and_then(|entry| entry.failure)
                    .unwrap_or_else(|| format!("run {} failed", code));
                WaitOutcome::Failed(reason)
            }
            Ok(Some(_)) => WaitOutcome::Pending,
        })
    }

    async fn run_state(&self, code: &str) -> Result<RunState, AppError> {
        lock(&self.runs)
            .get(code)
            .map(|entry| entry.run.state)
            .ok_or_else(|| AppError::RunNotFound(code.to_string()))
    }
}
