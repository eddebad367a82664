//! Public entry point of a data feed run.
//!
//! [`IndexerService::run`] enforces one run per configuration by claiming
//! the RUNNING status in the store before dispatching work and marks the configuration FAILURE
//! on any error. On success the status stays RUNNING until the sync-status
//! poller observes the remote index swap.
//!
//! Each run executes inside an `index_run` tracing span and a registered,
//! non-suspendable operation of the [`SystemState`]. Both are released on
//! every exit path.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, debug, error, info, info_span};

use crate::batch::resolve_config;
use crate::context::{CURRENT_OPERATION, SystemState};
use crate::error::AppError;
use crate::events::{PipelineEvent, PipelineReporter, SilentReporter};
use crate::executor::DistributedExecutor;
use crate::job::PerformResult;
use crate::models::{IndexRunConfig, RunStatus};
use crate::resolver::ResolverRegistry;
use crate::strategy::IndexingStrategy;
use crate::traits::{ConfigStore, ItemSource, PollerJobStore, RemoteSyncClient};

/// Runs the data feed pipeline for one configuration.
pub struct IndexerService<S, Q, E, R, J>
where
    S: ConfigStore,
    Q: ItemSource,
    E: DistributedExecutor,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    store: S,
    items: Q,
    strategy: IndexingStrategy<E, R, J>,
    registry: ResolverRegistry,
    system: SystemState,
    reporter: Arc<dyn PipelineReporter>,
}

impl<S, Q, E, R, J> IndexerService<S, Q, E, R, J>
where
    S: ConfigStore,
    Q: ItemSource,
    E: DistributedExecutor,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    pub fn new(
        store: S,
        items: Q,
        strategy: IndexingStrategy<E, R, J>,
        registry: ResolverRegistry,
        system: SystemState,
    ) -> Self {
        Self {
            store,
            items,
            strategy,
            registry,
            system,
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn PipelineReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs the pipeline for `config`.
    ///
    /// Fails with [`AppError::AlreadyRunning`] without touching anything if
    /// the configuration is RUNNING. Any later error sets FAILURE and is
    /// returned.
    pub async fn run(&self, mut config: IndexRunConfig) -> Result<(), AppError> {
        if config.is_running() {
            return Err(AppError::AlreadyRunning(config.name.clone()));
        }
        // The caller's copy may be stale; the store decides.
        if !self.store.claim_run(&config.name).await? {
            let current = self.store.find_by_name(&config.name).await?;
            return Err(if current.is_empty() {
                AppError::ConfigNotFound {
                    name: config.name.clone(),
                    matches: 0,
                }
            } else {
                AppError::AlreadyRunning(config.name.clone())
            });
        }
        config.status = RunStatus::Running;

        let operation = self.system.register(format!("index-run:{}", config.name));
        let span = info_span!(
            "index_run",
            feed = %config.name,
            user = %config.plan.user,
            scope = %config.plan.scope
        );
        let started = Instant::now();
        debug!(feed = %config.name, "Data feed indexing started");

        let result = CURRENT_OPERATION
            .scope(operation.id(), self.run_guarded(&mut config).instrument(span))
            .await;
        drop(operation);

        match result {
            Ok(()) => {
                info!(
                    feed = %config.name,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Data feed indexing finished"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    feed = %config.name,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    error = %e,
                    "Data feed indexing failed"
                );
                config.status = RunStatus::Failure;
                if let Err(save_error) = self.store.save(&config).await {
                    error!(feed = %config.name, error = %save_error, "Could not persist FAILURE status");
                }
                let reason = e.to_string();
                self.reporter.report(PipelineEvent::RunFailed {
                    feed: &config.name,
                    error: &reason,
                });
                Err(e)
            }
        }
    }

    async fn run_guarded(&self, config: &mut IndexRunConfig) -> Result<(), AppError> {
        self.registry.validate(&config.plan)?;
        let item_ids = self.items.resolve_item_ids(&config.plan).await?;
        debug!(feed = %config.name, items = item_ids.len(), "Resolved candidate items");

        self.strategy.execute(config, &item_ids).await
    }

    /// Loads the configuration named `name` and runs it.
    pub async fn run_by_name(&self, name: &str) -> Result<(), AppError> {
        let config = resolve_config(&self.store, name).await?;
        self.run(config).await
    }
}

/// Scheduled-job wrapper around [`IndexerService`].
pub struct IndexerJob<S, Q, E, R, J>
where
    S: ConfigStore,
    Q: ItemSource,
    E: DistributedExecutor,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    service: IndexerService<S, Q, E, R, J>,
}

impl<S, Q, E, R, J> IndexerJob<S, Q, E, R, J>
where
    S: ConfigStore,
    Q: ItemSource,
    E: DistributedExecutor,
    R: RemoteSyncClient,
    J: PollerJobStore,
{
    pub fn new(service: IndexerService<S, Q, E, R, J>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &IndexerService<S, Q, E, R, J> {
        &self.service
    }

    /// Runs the named configuration. Never fails; the outcome is in the result.
    pub async fn perform(&self, config_name: &str) -> PerformResult {
        let config = match resolve_config(&self.service.store, config_name).await {
            Ok(config) => config,
            Err(e) => {
                error!(feed = config_name, error = %e, "Feed configuration is not defined");
                return PerformResult::FAILURE;
            }
        };

        match self.service.run(config).await {
            Ok(()) => PerformResult::SUCCESS,
            Err(e) => {
                error!(feed = config_name, error = %e, "Error running data feed indexing");
                PerformResult::FAILURE
            }
        }
    }
}
