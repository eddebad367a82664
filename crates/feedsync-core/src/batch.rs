//! Batch worker: fetch, write, upload with bounded retry, clean up.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::AppError;
use crate::events::{PipelineEvent, PipelineReporter, SilentReporter};
use crate::executor::BatchHandler;
use crate::feed::FeedIndexer;
use crate::models::{Batch, IndexRunConfig, RunContext};
use crate::traits::{ConfigStore, ItemSource, TransferConnector};

/// Prefix of generated feed files.
pub const FEED_FILE_PREFIX: &str = "feed";
/// Extension of generated feed files.
pub const FEED_FILE_EXTENSION: &str = "csv";

/// File name of the `sequence`-th file of a run: `feed_<runId>_<sequence>.csv`.
pub fn feed_file_name(run_id: u64, sequence: u64) -> String {
    format!("{}_{}_{}.{}", FEED_FILE_PREFIX, run_id, sequence, FEED_FILE_EXTENSION)
}

/// Resolves the configuration of a batch by name.
///
/// Anything but exactly one match is [`AppError::ConfigNotFound`].
pub async fn resolve_config<S: ConfigStore>(store: &S, name: &str) -> Result<IndexRunConfig, AppError> {
    let mut configs = store.find_by_name(name).await?;
    if configs.len() != 1 {
        return Err(AppError::ConfigNotFound {
            name: name.to_string(),
            matches: configs.len(),
        });
    }
    configs
        .pop()
        .ok_or_else(|| AppError::ConfigNotFound {
            name: name.to_string(),
            matches: 0,
        })
}

/// Turns one batch of item ids into one uploaded feed file.
pub struct BatchWorker<S, Q, C>
where
    S: ConfigStore,
    Q: ItemSource,
    C: TransferConnector,
{
    store: S,
    items: Q,
    indexer: FeedIndexer<C>,
    sequence: AtomicU64,
    reporter: Arc<dyn PipelineReporter>,
}

impl<S, Q, C> BatchWorker<S, Q, C>
where
    S: ConfigStore,
    Q: ItemSource,
    C: TransferConnector,
{
    pub fn new(store: S, items: Q, indexer: FeedIndexer<C>) -> Self {
        Self {
            store,
            items,
            indexer,
            sequence: AtomicU64::new(1),
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn PipelineReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn next_file(&self, context: &RunContext) -> PathBuf {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        context
            .export_path
            .join(feed_file_name(context.run_id, sequence))
    }

    async fn generate(&self, config: &IndexRunConfig, batch: &Batch, path: &Path) -> Result<usize, AppError> {
        let items = self.items.fetch_items(&config.plan, &batch.items).await?;
        let count = items.len();
        let indexer = self.indexer.clone();
        let plan = config.plan.clone();
        let owned_path = path.to_path_buf();

        tokio::task::spawn_blocking(move || indexer.generate_data_feed(&items, &plan, &owned_path))
            .await
            .map_err(|e| AppError::GenerationFailed {
                path: path.to_path_buf(),
                reason: format!("generation task failed: {}", e),
            })??;
        Ok(count)
    }

    /// Uploads with up to `max_batch_retries` retries, returning the attempt count.
    async fn upload_with_retry(&self, config: &IndexRunConfig, path: &Path) -> Result<u32, AppError> {
        let max_attempts = config.plan.max_batch_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.indexer.upload_data_feed(path, &config.endpoint).await {
                Ok(_) => return Ok(attempt),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            let reason = error.to_string();
            self.reporter.report(PipelineEvent::UploadAttemptFailed {
                path,
                attempt,
                max_attempts,
                error: &reason,
            });
            warn!(feed = %config.name, path = %path.display(), attempt, max_attempts, error = %reason, "Upload attempt failed");

            if attempt >= max_attempts {
                return Err(AppError::UploadExhausted {
                    path: path.to_path_buf(),
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }
        }
    }
}

fn remove_feed_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed data feed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove data feed file"),
    }
}

impl<S, Q, C> BatchHandler for BatchWorker<S, Q, C>
where
    S: ConfigStore + 'static,
    Q: ItemSource + 'static,
    C: TransferConnector,
{
    async fn process(&self, context: &RunContext, batch: &Batch) -> Result<(), AppError> {
        let config = resolve_config(&self.store, &context.config_name).await?;
        let path = self.next_file(context);

        let items = match self.generate(&config, batch, &path).await {
            Ok(items) => items,
            Err(e) => {
                remove_feed_file(&path);
                return Err(e);
            }
        };

        let uploaded = self.upload_with_retry(&config, &path).await;
        remove_feed_file(&path);
        let attempts = uploaded?;

        self.reporter.report(PipelineEvent::BatchUploaded {
            run_id: context.run_id,
            path: &path,
            items,
            attempts,
        });
        Ok(())
    }
}
