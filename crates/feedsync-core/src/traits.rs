//! Trait definitions for external collaborators.
//!
//! The pipeline never talks to a database, an HTTP endpoint or a transfer
//! host directly. Each of those is reached through one of the traits below,
//! so the core can be driven by PostgreSQL/reqwest/SFTP in production and by
//! in-memory mocks in tests.
//!
//! # Example
//!
//! ```
//! use feedsync_core::traits::{ConfigStore, ItemSource};
//! use feedsync_core::{AppError, IndexRunConfig};
//!
//! async fn count_candidates<S, Q>(store: &S, items: &Q, name: &str) -> Result<usize, AppError>
//! where
//!     S: ConfigStore,
//!     Q: ItemSource,
//! {
//!     let configs: Vec<IndexRunConfig> = store.find_by_name(name).await?;
//!     let Some(config) = configs.first() else {
//!         return Ok(0);
//!     };
//!     Ok(items.resolve_item_ids(&config.plan).await?.len())
//! }
//! ```

use std::future::Future;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::job::PollerJob;
use crate::models::{IndexPlan, IndexRunConfig, Item, ItemId, RemoteEndpoint, SyncStatusResponse};

/// Persistence for feed configurations.
pub trait ConfigStore: Send + Sync + Clone {
    /// Returns every configuration with the given name.
    ///
    /// Callers treat anything other than exactly one match as an integrity error.
    fn find_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<IndexRunConfig>, AppError>> + Send;

    /// Lists all configurations.
    fn list(&self) -> impl Future<Output = Result<Vec<IndexRunConfig>, AppError>> + Send;

    /// Persists the mutable fields of a configuration (status, sync generation, index name).
    fn save(&self, config: &IndexRunConfig) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Atomically sets the status of `name` to RUNNING unless it already is.
    ///
    /// Returns false when the configuration is RUNNING or does not exist.
    fn claim_run(&self, name: &str) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Query-and-fetch access to catalog items.
pub trait ItemSource: Send + Sync + Clone {
    /// Resolves the candidate item ids selected by the plan's query.
    fn resolve_item_ids(
        &self,
        plan: &IndexPlan,
    ) -> impl Future<Output = Result<Vec<ItemId>, AppError>> + Send;

    /// Fetches the items for a batch, in the scope and as the user of the plan.
    fn fetch_items(
        &self,
        plan: &IndexPlan,
        ids: &[ItemId],
    ) -> impl Future<Output = Result<Vec<Item>, AppError>> + Send;
}

/// Client for the remote index service.
pub trait RemoteSyncClient: Send + Sync + Clone {
    /// Asks the remote service to rebuild and swap its index.
    ///
    /// Fails with [`AppError::SyncTriggerFailed`] on a non-2xx response.
    fn trigger_sync(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Reads the remote sync status.
    ///
    /// Fails with [`AppError::StatusCheckFailed`] on a non-2xx response.
    fn sync_status(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<SyncStatusResponse, AppError>> + Send;
}

/// Persistence for sync-status poller jobs and their triggers.
pub trait PollerJobStore: Send + Sync + Clone {
    /// Stores a new job together with its trigger.
    fn create_job(&self, job: &PollerJob) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Updates a job and its trigger.
    fn save_job(&self, job: &PollerJob) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Returns active jobs whose trigger is active and due at `now`.
    fn due_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<PollerJob>, AppError>> + Send;

    /// Deletes a job.
    fn remove_job(&self, code: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Source of the low bits of run ids.
///
/// Implementations guarantee distinct values within one millisecond burst.
pub trait SequenceGenerator: Send + Sync {
    fn next_sequence(&self) -> u64;
}

/// In-process sequence wrapping at 16 bits.
#[derive(Debug, Default)]
pub struct AtomicSequence {
    next: AtomicU64,
}

impl SequenceGenerator for AtomicSequence {
    fn next_sequence(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) & 0xFFFF
    }
}

// =============================================================================
// File Transfer
// =============================================================================

/// Opens transport sessions to a transfer host.
///
/// Transfer operations are blocking; async callers run them on the blocking
/// thread pool.
pub trait TransferConnector: Send + Sync + 'static {
    type Session: TransferSession<Channel = Self::Channel>;
    type Channel: TransferChannel;

    /// Connects and authenticates a new session with the endpoint's credentials.
    fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        timeout: Duration,
    ) -> Result<Self::Session, AppError>;
}

/// One authenticated transport session carrying many channels.
pub trait TransferSession: Send + 'static {
    type Channel: TransferChannel;

    fn is_connected(&self) -> bool;

    /// Opens a new, not yet connected, channel over this session.
    fn open_channel(&self) -> Result<Self::Channel, AppError>;

    fn disconnect(&mut self);
}

/// One file-transfer channel.
pub trait TransferChannel: Send + 'static {
    fn is_connected(&self) -> bool;

    fn connect(&mut self) -> Result<(), AppError>;

    /// Disconnects the channel. Must be safe to call on a disconnected channel.
    fn disconnect(&mut self);

    /// Changes the remote working directory.
    ///
    /// Relative paths resolve against the session home, not against the
    /// current directory, so a pooled channel can be pointed at the same
    /// destination on every borrow.
    fn change_dir(&mut self, path: &str) -> Result<(), AppError>;

    /// Streams `source` into `remote_name` in the current directory.
    ///
    /// Returns the number of bytes written.
    fn put(&mut self, source: &mut dyn Read, remote_name: &str) -> Result<u64, AppError>;
}
