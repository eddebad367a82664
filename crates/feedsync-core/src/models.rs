//! Domain models for feed configurations, items and distributed runs.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

/// Identifier of a catalog item.
pub type ItemId = i64;

// =============================================================================
// Feed Configuration
// =============================================================================

/// Status of a feed configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Never run.
    #[default]
    None,
    /// A run was started and the remote swap has not been observed yet.
    Running,
    /// The remote service reported a new index generation.
    Success,
    /// The last run failed.
    Failure,
}

impl RunStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::None => "none",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RunStatus::None),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            _ => Err(AppError::ConfigError(format!("Unknown run status: '{}'", s))),
        }
    }
}

/// One column of the data feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBinding {
    /// Property name, used as the attribute name when no `attribute` parameter is set.
    pub name: String,
    /// Header text written in the first row of the feed.
    pub display_name: String,
    /// Id of the value resolver registered in the [`ResolverRegistry`](crate::resolver::ResolverRegistry).
    pub resolver_id: String,
    /// Resolver-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl PropertyBinding {
    /// Creates a binding without parameters.
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        resolver_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            resolver_id: resolver_id.into(),
            params: HashMap::new(),
        }
    }

    /// Adds a resolver parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

fn default_batch_size() -> usize {
    100
}

/// What to export and how to split it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPlan {
    /// Selector for candidate item ids, interpreted by the [`ItemSource`](crate::traits::ItemSource).
    pub query: String,
    /// Number of item ids per batch. Must be positive.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of upload retries after the first failed attempt.
    #[serde(default)]
    pub max_batch_retries: u32,
    /// Local directory for feed files. Empty means the platform temp dir.
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
    /// Affinity hint for the distributed executor.
    #[serde(default)]
    pub execution_group: Option<String>,
    /// User the item query runs as.
    #[serde(default)]
    pub user: String,
    /// Catalog scope the item query is restricted to.
    #[serde(default)]
    pub scope: String,
    /// Ordered feed columns.
    #[serde(default)]
    pub properties: Vec<PropertyBinding>,
}

/// Remote transfer host and index service endpoints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub credential: String,
    /// Remote directory for uploads. Unset means the session's home directory.
    #[serde(default)]
    pub destination_path: Option<String>,
    /// Channel pool capacity.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    pub trigger_sync_url: String,
    pub sync_status_url: String,
}

fn default_port() -> u16 {
    22
}

fn default_max_connections() -> usize {
    4
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("credential", &"<redacted>")
            .field("destination_path", &self.destination_path)
            .field("max_connections", &self.max_connections)
            .field("trigger_sync_url", &self.trigger_sync_url)
            .field("sync_status_url", &self.sync_status_url)
            .finish()
    }
}

/// One logical feed configuration.
///
/// Status is mutated by the orchestrator, the sync generation fields by the
/// sync-status poller. Nothing in the pipeline deletes a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRunConfig {
    /// Unique key.
    pub name: String,
    #[serde(default)]
    pub status: RunStatus,
    /// Remote generation observed by the poller.
    #[serde(default)]
    pub last_sync_generation: Option<NaiveDateTime>,
    /// Remote index name observed by the poller.
    #[serde(default)]
    pub last_index_name: Option<String>,
    pub plan: IndexPlan,
    pub endpoint: RemoteEndpoint,
}

impl IndexRunConfig {
    /// Returns true if a run is in flight for this configuration.
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

// =============================================================================
// Items
// =============================================================================

/// A catalog entity fetched for a batch.
///
/// Attributes are kept as JSON values so resolvers can render scalars,
/// collections and nested references alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Item {
    pub fn new(id: ItemId) -> Self {
        Self {
            id,
            attributes: Map::new(),
        }
    }

    /// Sets an attribute value.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Returns an attribute value, if present.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

// =============================================================================
// Distributed Runs
// =============================================================================

/// State of a distributed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    /// Returns true if the run will not change state anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Created => "created",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A partition of item ids processed as one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub items: Vec<ItemId>,
}

/// Splits item ids into batches of `batch_size`; the last batch may be shorter.
///
/// A `batch_size` of zero is treated as one.
///
/// # Examples
///
/// ```
/// use feedsync_core::models::partition;
///
/// let ids: Vec<i64> = (0..25).collect();
/// let sizes: Vec<usize> = partition(&ids, 10).iter().map(|b| b.items.len()).collect();
/// assert_eq!(sizes, vec![10, 10, 5]);
/// ```
pub fn partition(ids: &[ItemId], batch_size: usize) -> Vec<Batch> {
    ids.chunks(batch_size.max(1))
        .map(|chunk| Batch {
            items: chunk.to_vec(),
        })
        .collect()
}

/// Parameters needed to create a distributed run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Unique run code.
    pub code: String,
    /// Numeric run id, used in feed file names.
    pub run_id: u64,
    /// Name of the [`IndexRunConfig`] the run belongs to.
    pub config_name: String,
    pub batches: Vec<Batch>,
    pub export_path: PathBuf,
    pub execution_group: Option<String>,
}

/// A distributed run as reported by the executor.
#[derive(Debug, Clone)]
pub struct DistributedRun {
    pub code: String,
    pub run_id: u64,
    pub config_name: String,
    pub state: RunState,
    pub batches: Vec<Batch>,
    pub export_path: PathBuf,
}

impl DistributedRun {
    /// Context handed to each batch of this run.
    pub fn context(&self) -> RunContext {
        RunContext {
            code: self.code.clone(),
            run_id: self.run_id,
            config_name: self.config_name.clone(),
            export_path: self.export_path.clone(),
        }
    }
}

/// Per-run data available to a batch handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub code: String,
    pub run_id: u64,
    pub config_name: String,
    pub export_path: PathBuf,
}

// =============================================================================
// Remote Sync Status
// =============================================================================

/// Body of the remote sync-status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncStatusResponse {
    #[serde(default)]
    pub current: SyncInfo,
    #[serde(default)]
    pub previous: Option<SyncInfo>,
}

/// Index name and generation of one remote index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncInfo {
    #[serde(default)]
    pub index_name: Option<String>,
    /// Parsed `sync_time`; `None` when absent or unparseable.
    #[serde(default, deserialize_with = "deserialize_sync_time")]
    pub sync_time: Option<NaiveDateTime>,
}

const SYNC_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses `yyyy-MM-dd HH:mm:ss[.fraction]`, ignoring the fraction.
///
/// Returns `None` and logs on malformed input.
pub fn parse_sync_time(raw: &str) -> Option<NaiveDateTime> {
    let without_fraction = raw.trim().split('.').next().unwrap_or_default();
    match NaiveDateTime::parse_from_str(without_fraction, SYNC_TIME_FORMAT) {
        Ok(time) => Some(time),
        Err(e) => {
            tracing::error!(sync_time = raw, error = %e, "Error while parsing sync time");
            None
        }
    }
}

fn deserialize_sync_time<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_sync_time))
}
