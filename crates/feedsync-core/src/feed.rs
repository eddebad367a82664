//! Data feed file writer and uploader.
//!
//! # Format
//!
//! ```text
//! Code;Name;Categories;\n
//! A1;Camera;Cameras,Lenses;\n
//! ```
//!
//! One header row of display names, then one row per item. Every cell is
//! followed by `;`, including the last one. The remote agent consuming the
//! files relies on that trailing delimiter.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{IndexPlan, Item, RemoteEndpoint};
use crate::pool::ChannelPool;
use crate::resolver::{ResolverRegistry, ValueResolver};
use crate::traits::{TransferChannel, TransferConnector};

/// Cell delimiter.
pub const DELIMITER: char = ';';
/// Separator of collection elements inside one cell.
pub const COLLECTION_SEPARATOR: &str = ",";

/// Renders a resolved value as one cell.
///
/// `null` renders empty, arrays comma-joined, strings verbatim.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(values) => values
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(COLLECTION_SEPARATOR),
        Value::Object(_) => value.to_string(),
    }
}

/// Writes feed files and ships them through the channel pool.
pub struct FeedIndexer<C: TransferConnector> {
    registry: ResolverRegistry,
    pool: ChannelPool<C>,
}

impl<C: TransferConnector> Clone for FeedIndexer<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<C: TransferConnector> FeedIndexer<C> {
    pub fn new(registry: ResolverRegistry, pool: ChannelPool<C>) -> Self {
        Self { registry, pool }
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &ChannelPool<C> {
        &self.pool
    }

    /// Appends the header and one row per item to `path`.
    ///
    /// Unknown resolver ids fail with [`AppError::InvalidResolver`] before the
    /// file is touched. I/O and resolver failures are [`AppError::GenerationFailed`].
    pub fn generate_data_feed(&self, items: &[Item], plan: &IndexPlan, path: &Path) -> Result<(), AppError> {
        let resolvers = plan
            .properties
            .iter()
            .map(|binding| self.registry.get(&binding.resolver_id))
            .collect::<Result<Vec<&dyn ValueResolver>, _>>()?;

        let generation_failed = |reason: String| AppError::GenerationFailed {
            path: path.to_path_buf(),
            reason,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| generation_failed(e.to_string()))?;
        let mut writer = BufWriter::new(file);

        let mut line = String::new();
        for binding in &plan.properties {
            line.push_str(&binding.display_name);
            line.push(DELIMITER);
        }
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .map_err(|e| generation_failed(e.to_string()))?;

        for item in items {
            line.clear();
            for (binding, resolver) in plan.properties.iter().zip(&resolvers) {
                let value = resolver.resolve(item, binding).map_err(|e| {
                    generation_failed(format!("item {} property '{}': {}", item.id, binding.name, e))
                })?;
                line.push_str(&render_value(&value));
                line.push(DELIMITER);
            }
            line.push('\n');
            writer
                .write_all(line.as_bytes())
                .map_err(|e| generation_failed(e.to_string()))?;
        }

        writer.flush().map_err(|e| generation_failed(e.to_string()))?;
        drop(writer);

        mark_readable_executable(path).map_err(|e| generation_failed(e.to_string()))?;
        debug!(path = %path.display(), items = items.len(), "Data feed generated");
        Ok(())
    }

    /// Uploads `path` through a pooled channel.
    ///
    /// Blocking; see [`upload_data_feed`](Self::upload_data_feed) for async callers.
    pub fn upload_data_feed_blocking(&self, path: &Path, endpoint: &RemoteEndpoint) -> Result<u64, AppError> {
        upload(&self.pool, path, endpoint)
    }

    /// Uploads `path` on the blocking thread pool.
    ///
    /// Fails with [`AppError::FileNotFound`] if the file is absent, and with
    /// [`AppError::UploadFailed`] on any transport error. The channel is
    /// returned on success and invalidated on failure.
    pub async fn upload_data_feed(&self, path: &Path, endpoint: &RemoteEndpoint) -> Result<u64, AppError> {
        let pool = self.pool.clone();
        let owned_path = path.to_path_buf();
        let endpoint = endpoint.clone();

        tokio::task::spawn_blocking(move || upload(&pool, &owned_path, &endpoint))
            .await
            .map_err(|e| AppError::UploadFailed {
                path: path.to_path_buf(),
                reason: format!("upload task failed: {}", e),
            })?
    }
}

fn upload<C: TransferConnector>(
    pool: &ChannelPool<C>,
    path: &Path,
    endpoint: &RemoteEndpoint,
) -> Result<u64, AppError> {
    if !path.is_file() {
        return Err(AppError::FileNotFound(path.to_path_buf()));
    }
    let upload_failed = |e: AppError| AppError::UploadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let remote_name = remote_file_name(path)?;
    let mut channel = pool.borrow(endpoint).map_err(upload_failed)?;

    let result = (|| {
        if let Some(destination) = endpoint.destination_path.as_deref().filter(|d| !d.is_empty()) {
            channel.change_dir(destination)?;
        }
        let mut file = File::open(path).map_err(|e| AppError::TransportError(e.to_string()))?;
        channel.put(&mut file, &remote_name)
    })();

    match result {
        Ok(bytes) => {
            pool.return_channel(channel);
            debug!(path = %path.display(), bytes, host = %endpoint.host, "Data feed uploaded");
            Ok(bytes)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Upload failed, invalidating channel");
            pool.invalidate(channel);
            Err(upload_failed(e))
        }
    }
}

fn remote_file_name(path: &Path) -> Result<String, AppError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::FileNotFound(PathBuf::from(path)))
}

#[cfg(unix)]
fn mark_readable_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o555);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn mark_readable_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
