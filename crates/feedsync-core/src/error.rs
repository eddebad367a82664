use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents every failure the feed pipeline can surface. The
/// first group mirrors the pipeline taxonomy (guard violations, local I/O,
/// transport, remote contract, configuration integrity); the second group
/// wraps the ambient libraries (`sqlx`, `serde_json`, HTTP client).
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Examples
///
/// ```
/// use feedsync_core::error::AppError;
///
/// fn guard(running: bool) -> Result<(), AppError> {
///     if running {
///         return Err(AppError::AlreadyRunning("products".to_string()));
///     }
///     Ok(())
/// }
///
/// assert!(guard(true).is_err());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// A run was requested for a configuration whose status is already RUNNING.
    #[error("Data feed synchronization is already running for '{0}'")]
    AlreadyRunning(String),

    /// The export directory could not be created or is not writable.
    #[error("Invalid export path {path}: {reason}")]
    InvalidExportPath { path: PathBuf, reason: String },

    /// A data feed file expected on disk does not exist.
    #[error("Data feed file not found: {0}")]
    FileNotFound(PathBuf),

    /// Writing the data feed file failed. Never retried.
    #[error("Data feed generation failed for {path}: {reason}")]
    GenerationFailed { path: PathBuf, reason: String },

    /// A single upload attempt failed at the transport level.
    #[error("Upload of {path} failed: {reason}")]
    UploadFailed { path: PathBuf, reason: String },

    /// Every upload attempt for a batch failed.
    #[error("Upload of {path} failed after {attempts} attempts: {last_error}")]
    UploadExhausted {
        path: PathBuf,
        attempts: u32,
        last_error: Box<AppError>,
    },

    /// The remote rebuild trigger did not answer with a 2xx status.
    #[error("Error while triggering synchronization: {0}")]
    SyncTriggerFailed(String),

    /// The remote sync-status endpoint did not answer with a 2xx status.
    #[error("Error while getting data feed synchronization status: {0}")]
    StatusCheckFailed(String),

    /// Zero or several configurations matched a name.
    #[error("Feed configuration lookup for '{name}' matched {matches} entries")]
    ConfigNotFound { name: String, matches: usize },

    /// A property binding references an unknown value resolver.
    #[error("Invalid value resolver '{0}'")]
    InvalidResolver(String),

    /// The distributed run finished in the FAILED state.
    #[error("Indexing run {0} has failed")]
    IndexingFailed(String),

    /// The distributed facility does not know the requested run.
    #[error("Distributed run not found: {0}")]
    RunNotFound(String),

    /// Error reported by the file-transfer transport (session or channel).
    #[error("Transport error: {0}")]
    TransportError(String),

    /// No channel became available within the borrow timeout.
    #[error("Channel pool exhausted after waiting {0} seconds")]
    PoolExhausted(u64),

    /// A system-wide suspend was refused because non-suspendable work is running.
    #[error("Suspend rejected, non-suspendable operations running: {}", .0.join(", "))]
    SuspendRejected(Vec<String>),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// HTTP client request failed before a status code was received.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::AlreadyRunning(name) => format!(
                "Feed '{}' is already being synchronized.\n   Wait for the current run to finish or reset its status.",
                name
            ),
            AppError::InvalidExportPath { path, .. } => format!(
                "Cannot write data feed files to {}.\n   Check the export_dir setting and directory permissions.",
                path.display()
            ),
            AppError::UploadExhausted { attempts, .. } => format!(
                "Uploading the data feed failed {} times.\n   Check the transfer host credentials and connectivity.",
                attempts
            ),
            AppError::SyncTriggerFailed(_) => {
                "The remote index service refused the rebuild request.\n   Check trigger_sync_url.".to_string()
            }
            AppError::StatusCheckFailed(_) => {
                "The remote index service did not report its sync status.\n   Check sync_status_url.".to_string()
            }
            AppError::ConfigNotFound { name, matches: 0 } => {
                format!("Feed configuration '{}' does not exist.", name)
            }
            AppError::ConfigNotFound { name, matches } => format!(
                "Feed configuration '{}' is ambiguous ({} matches).",
                name, matches
            ),
            AppError::InvalidResolver(id) => format!(
                "Unknown value resolver '{}'.\n   Valid resolvers are registered at startup.",
                id
            ),
            AppError::IndexingFailed(_) => {
                "Data feed export failed. See the log for the failing batch.".to_string()
            }
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your configuration file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is a transient transport failure worth retrying.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use feedsync_core::error::AppError;
    ///
    /// let err = AppError::UploadFailed { path: PathBuf::from("a.csv"), reason: "reset".into() };
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::InvalidResolver("nope".into());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::UploadFailed { .. }
                | AppError::TransportError(_)
                | AppError::PoolExhausted(_)
                | AppError::ClientError(_)
        )
    }
}
