//! feedsync Client - concrete collaborators for the feed pipeline
//!
//! This crate provides implementations of the `feedsync-core` traits that
//! talk to the outside world:
//!
//! - [`http`] - the remote index service (trigger and sync-status endpoints)
//! - [`local`] - a transfer connector writing into a local or mounted directory
//! - `sftp` - SFTP transfer over `ssh2` (requires the `sftp` feature)
//!
//! # Overview
//!
//! Transfer connectors are blocking, like the underlying SSH library; the
//! core's channel pool runs them on the blocking thread pool.

pub mod http;
pub mod local;
#[cfg(feature = "sftp")]
pub mod sftp;

// Re-export main client types
pub use http::SyncServiceClient;
pub use local::LocalDirConnector;
#[cfg(feature = "sftp")]
pub use sftp::SftpConnector;
