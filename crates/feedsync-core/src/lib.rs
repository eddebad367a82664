//! feedsync core - domain types and the data feed pipeline.
//!
//! This crate exports a catalog to `;`-delimited feed files, ships them to a
//! remote indexing service over pooled transfer channels and tracks the
//! remote index swap that follows:
//!
//! - **Orchestration**: [`IndexerService`] guards against concurrent runs and
//!   owns the configuration status; [`IndexerJob`] wraps it for schedulers
//! - **Strategy**: [`IndexingStrategy`] partitions item ids, waits on the
//!   distributed run, triggers the remote rebuild and schedules the poller
//! - **Batches**: [`BatchWorker`] writes and uploads one file per batch with
//!   bounded retry, through [`FeedIndexer`] and [`ChannelPool`]
//! - **Completion tracking**: [`SyncStatusPoller`] and [`PollerScheduler`]
//! - **Traits**: [`ConfigStore`], [`ItemSource`], [`RemoteSyncClient`],
//!   [`PollerJobStore`], [`TransferConnector`], [`DistributedExecutor`]
//!
//! # Architecture
//!
//! ```text
//! IndexerService -> IndexingStrategy -> DistributedExecutor -> BatchWorker(s)
//!                                                                 |
//!                        RemoteSyncClient <- trigger       ChannelPool -> transfer host
//!                        PollerJobStore   <- poller job
//! ```
//!
//! Frontends (the `feedsync` CLI) plug in PostgreSQL stores, the reqwest
//! remote client and an SFTP or local-directory transfer connector.

pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod feed;
pub mod job;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod pool;
pub mod resolver;
pub mod scheduler;
pub mod strategy;
pub mod traits;

// Configuration
pub use config::{
    FeedEntry, FeedsConfig, HttpConfig, MediaUrlConfig, PipelineConfig, default_config_path,
    load_feeds_config,
};

// Error handling
pub use error::AppError;

// Domain models
pub use models::{
    Batch, DistributedRun, IndexPlan, IndexRunConfig, Item, ItemId, PropertyBinding,
    RemoteEndpoint, RunContext, RunRequest, RunState, RunStatus, SyncInfo, SyncStatusResponse,
};

// Jobs
pub use job::{JobState, PerformResult, PollerJob, Trigger};

// Pipeline events
pub use events::{PipelineEvent, PipelineReporter, SilentReporter, TracingReporter};

// Traits for dependency injection
pub use traits::{
    AtomicSequence, ConfigStore, ItemSource, PollerJobStore, RemoteSyncClient, SequenceGenerator,
    TransferChannel, TransferConnector, TransferSession,
};

// Pipeline
pub use batch::BatchWorker;
pub use context::SystemState;
pub use executor::{BatchHandler, DistributedExecutor, LocalExecutor, WaitOutcome};
pub use feed::FeedIndexer;
pub use orchestrator::{IndexerJob, IndexerService};
pub use poller::SyncStatusPoller;
pub use pool::{ChannelPool, PoolState, PoolStats, PooledChannel};
pub use resolver::{ResolverRegistry, ValueResolver};
pub use scheduler::PollerScheduler;
pub use strategy::IndexingStrategy;
