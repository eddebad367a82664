//! Transfer connector backed by a local directory.
//!
//! Useful when the remote agent's inbox is a mounted share, and for running
//! the whole pipeline on one machine. The connector root plays the role of
//! the session's home directory: relative destination paths resolve against
//! it, absolute ones are taken as-is.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use feedsync_core::error::AppError;
use feedsync_core::models::RemoteEndpoint;
use feedsync_core::traits::{TransferChannel, TransferConnector, TransferSession};
use tracing::debug;

/// [`TransferConnector`] writing uploads under `root`.
#[derive(Debug, Clone)]
pub struct LocalDirConnector {
    root: PathBuf,
}

impl LocalDirConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TransferConnector for LocalDirConnector {
    type Session = LocalSession;
    type Channel = LocalChannel;

    fn connect(&self, endpoint: &RemoteEndpoint, _timeout: Duration) -> Result<LocalSession, AppError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            AppError::TransportError(format!("Cannot open {}: {}", self.root.display(), e))
        })?;
        debug!(root = %self.root.display(), host = %endpoint.host, "Local transfer session opened");
        Ok(LocalSession {
            root: self.root.clone(),
            connected: true,
        })
    }
}

pub struct LocalSession {
    root: PathBuf,
    connected: bool,
}

impl TransferSession for LocalSession {
    type Channel = LocalChannel;

    fn is_connected(&self) -> bool {
        self.connected && self.root.is_dir()
    }

    fn open_channel(&self) -> Result<LocalChannel, AppError> {
        if !self.connected {
            return Err(AppError::TransportError("session is closed".to_string()));
        }
        Ok(LocalChannel {
            root: self.root.clone(),
            cwd: self.root.clone(),
            connected: false,
        })
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

pub struct LocalChannel {
    root: PathBuf,
    cwd: PathBuf,
    connected: bool,
}

impl LocalChannel {
    fn ensure_connected(&self) -> Result<(), AppError> {
        if self.connected {
            Ok(())
        } else {
            Err(AppError::TransportError("channel is not connected".to_string()))
        }
    }
}

impl TransferChannel for LocalChannel {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self) -> Result<(), AppError> {
        self.cwd = self.root.clone();
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn change_dir(&mut self, path: &str) -> Result<(), AppError> {
        self.ensure_connected()?;
        let target = self.root.join(path);
        if !target.is_dir() {
            return Err(AppError::TransportError(format!(
                "No such directory: {}",
                target.display()
            )));
        }
        self.cwd = target;
        Ok(())
    }

    fn put(&mut self, source: &mut dyn Read, remote_name: &str) -> Result<u64, AppError> {
        self.ensure_connected()?;
        if remote_name.is_empty() || remote_name.contains(['/', '\\']) {
            return Err(AppError::TransportError(format!(
                "Invalid remote file name: {:?}",
                remote_name
            )));
        }

        let target = self.cwd.join(remote_name);
        let mut file = File::create(&target).map_err(|e| {
            AppError::TransportError(format!("Cannot create {}: {}", target.display(), e))
        })?;
        io::copy(source, &mut file).map_err(|e| {
            AppError::TransportError(format!("Write to {} failed: {}", target.display(), e))
        })
    }
}
