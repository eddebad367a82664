//! feedsync DB - PostgreSQL persistence for the feed pipeline
//!
//! This crate implements the storage traits of `feedsync-core` on top of
//! `sqlx`.
//!
//! # Overview
//!
//! The main components are:
//! - [`PgConfigStore`] - Feed configurations and their run status
//! - [`PgPollerJobStore`] - Sync-status poller jobs and triggers
//! - [`PgItemSource`] - Catalog items exported into feeds
//!
//! [`run_migrations`] creates the schema from the embedded `migrations/` directory.

mod config_repository;
mod item_repository;
mod job_repository;

pub use config_repository::PgConfigStore;
pub use item_repository::PgItemSource;
pub use job_repository::PgPollerJobStore;

use feedsync_core::error::AppError;
use sqlx::PgPool;

/// Applies the embedded SQL migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))
}
