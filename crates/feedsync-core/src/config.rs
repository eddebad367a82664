//! Configuration types for feedsync components.
//!
//! Two layers:
//! - `feeds.toml` describes the feed configurations (plan + endpoint) that
//!   `feedsync import` loads into the store, plus media URLs for the
//!   `imageUrl` resolver.
//! - [`PipelineConfig`] carries the pipeline timings, each overridable from
//!   the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{IndexPlan, IndexRunConfig, RemoteEndpoint, RunStatus};

// =============================================================================
// Pipeline Timings
// =============================================================================

/// Timing and concurrency knobs of the pipeline.
///
/// Environment overrides (whole seconds unless noted):
/// - `FEEDSYNC_WAIT_TIMEOUT`
/// - `FEEDSYNC_SUSPEND_RETRY_DELAY`
/// - `FEEDSYNC_FIRST_POLL_DELAY`
/// - `FEEDSYNC_POLL_INTERVAL`
/// - `FEEDSYNC_CONNECT_TIMEOUT`
/// - `FEEDSYNC_BORROW_TIMEOUT`
/// - `FEEDSYNC_BATCH_CONCURRENCY` (count)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bounded wait of one iteration of the strategy's wait loop.
    pub wait_timeout: Duration,
    /// Sleep before re-entering the wait loop while the system is suspended.
    pub suspend_retry_delay: Duration,
    /// Delay between the remote trigger and the first poller firing.
    pub first_poll_delay: Duration,
    /// Delay between two poller firings.
    pub poll_interval: Duration,
    /// Transport session connect timeout.
    pub connect_timeout: Duration,
    /// Maximum time a borrower waits for a free channel.
    pub borrow_timeout: Duration,
    /// Maximum number of batches running at once in the local executor.
    pub batch_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(5),
            suspend_retry_delay: Duration::from_secs(5),
            first_poll_delay: Duration::from_secs(2 * 60 * 60),
            poll_interval: Duration::from_secs(15 * 60),
            connect_timeout: Duration::from_secs(60),
            borrow_timeout: Duration::from_secs(60),
            batch_concurrency: 4,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `FEEDSYNC_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let secs = |key: &str, target: &mut Duration| -> Result<(), AppError> {
            if let Some(raw) = lookup(key) {
                *target = Duration::from_secs(parse_number(key, &raw)?);
            }
            Ok(())
        };

        secs("FEEDSYNC_WAIT_TIMEOUT", &mut config.wait_timeout)?;
        secs("FEEDSYNC_SUSPEND_RETRY_DELAY", &mut config.suspend_retry_delay)?;
        secs("FEEDSYNC_FIRST_POLL_DELAY", &mut config.first_poll_delay)?;
        secs("FEEDSYNC_POLL_INTERVAL", &mut config.poll_interval)?;
        secs("FEEDSYNC_CONNECT_TIMEOUT", &mut config.connect_timeout)?;
        secs("FEEDSYNC_BORROW_TIMEOUT", &mut config.borrow_timeout)?;

        if let Some(raw) = lookup("FEEDSYNC_BATCH_CONCURRENCY") {
            config.batch_concurrency = (parse_number("FEEDSYNC_BATCH_CONCURRENCY", &raw)? as usize).max(1);
        }

        Ok(config)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, AppError> {
    raw.trim().parse::<u64>().map_err(|_| {
        AppError::ConfigError(format!("{} must be a non-negative integer, got '{}'", key, raw))
    })
}

/// HTTP client configuration for the remote index service.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("feedsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

// =============================================================================
// Media URLs
// =============================================================================

fn default_media_port() -> u16 {
    9001
}

/// Base URLs of the media server per site, used by the `imageUrl` resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUrlConfig {
    /// Site uid to media base URL.
    #[serde(default)]
    pub sites: HashMap<String, String>,
    /// Port of the `http://localhost:<port>` fallback.
    #[serde(default = "default_media_port")]
    pub default_port: u16,
}

impl Default for MediaUrlConfig {
    fn default() -> Self {
        Self {
            sites: HashMap::new(),
            default_port: default_media_port(),
        }
    }
}

impl MediaUrlConfig {
    /// Returns the media base URL for a site, without a trailing `/`.
    ///
    /// Unknown or unset sites fall back to `http://localhost:<default_port>`.
    pub fn base_url(&self, site_uid: Option<&str>) -> String {
        let configured = site_uid
            .and_then(|uid| self.sites.get(uid))
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty());

        match configured {
            Some(url) => url.to_string(),
            None => format!("http://localhost:{}", self.default_port),
        }
    }
}

// =============================================================================
// Feed Configuration (feeds.toml)
// =============================================================================

/// Root configuration structure for feeds.toml.
///
/// # Example
///
/// ```toml
/// [media]
/// default_port = 9001
/// sites = { electronics = "https://media.example.com/" }
///
/// [[feeds]]
/// name = "products"
///
/// [feeds.plan]
/// query = "SELECT id FROM items WHERE scope = $1"
/// batch_size = 500
/// max_batch_retries = 2
/// scope = "online"
///
/// [[feeds.plan.properties]]
/// name = "code"
/// display_name = "Code"
/// resolver_id = "attribute"
///
/// [feeds.endpoint]
/// host = "sftp.example.com"
/// username = "feed"
/// trigger_sync_url = "https://search.example.com/sync"
/// sync_status_url = "https://search.example.com/sync/status"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default)]
    pub media: MediaUrlConfig,
    #[serde(default)]
    pub feeds: Vec<FeedEntry>,
}

impl FeedsConfig {
    /// Find a feed by name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&FeedEntry> {
        self.feeds.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// A single feed entry in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub name: String,
    pub plan: IndexPlan,
    pub endpoint: RemoteEndpoint,
}

impl FeedEntry {
    /// Builds a fresh, never-run configuration from this entry.
    pub fn to_run_config(&self) -> IndexRunConfig {
        IndexRunConfig {
            name: self.name.clone(),
            status: RunStatus::None,
            last_sync_generation: None,
            last_index_name: None,
            plan: self.plan.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "feeds.toml";

/// Returns the default configuration directory path: `~/.config/feedsync/`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("feedsync"))
}

/// Returns the default configuration file path: `~/.config/feedsync/feeds.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# feedsync feed configuration
#
# Usage:
#   feedsync import               # Load every feed below into the database
#   feedsync run products         # Export and upload one feed
#   feedsync poll                 # Run the sync-status poller loop

[media]
default_port = 9001
# sites = { electronics = "https://media.example.com" }

[[feeds]]
name = "products"

[feeds.plan]
query = "SELECT id FROM items ORDER BY id"
batch_size = 500
max_batch_retries = 2
user = "feedsync"
scope = "online"

[[feeds.plan.properties]]
name = "code"
display_name = "Code"
resolver_id = "attribute"

[[feeds.plan.properties]]
name = "categories"
display_name = "Categories"
resolver_id = "categoryName"

[[feeds.plan.properties]]
name = "picture"
display_name = "Image"
resolver_id = "imageUrl"
params = { siteUid = "electronics" }

[feeds.endpoint]
host = "sftp.example.com"
port = 22
username = "feed"
credential = ""
destination_path = "incoming"
max_connections = 4
trigger_sync_url = "https://search.example.com/api/sync"
sync_status_url = "https://search.example.com/api/sync/status"
"#;

/// Load feed configuration from a TOML file.
///
/// # Returns
/// * `Ok(Some(config))` - Configuration loaded successfully
/// * `Ok(None)` - No default configuration could be found or created
/// * `Err(e)` - Configuration file exists but is invalid, or a custom path is missing
///
/// When the default file does not exist a template is written there first.
pub fn load_feeds_config(path: Option<PathBuf>) -> Result<Option<FeedsConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if !using_default_path {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
        if let Err(e) = create_default_config(&config_path) {
            tracing::warn!("Could not create default config template: {}", e);
            return Ok(None);
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    parse_feeds_config(&content).map(Some).map_err(|e| match e {
        AppError::ConfigError(msg) => {
            AppError::ConfigError(format!("Invalid TOML in '{}': {}", config_path.display(), msg))
        }
        other => other,
    })
}

/// Parses feeds.toml content.
pub fn parse_feeds_config(content: &str) -> Result<FeedsConfig, AppError> {
    toml::from_str(content).map_err(|e| AppError::ConfigError(e.to_string()))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    tracing::info!("Created default config template at: {}", path.display());

    Ok(())
}
