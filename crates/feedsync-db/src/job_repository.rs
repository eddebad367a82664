//! Poller job repository for PostgreSQL.
//!
//! Implements the [`PollerJobStore`] trait. A job and its trigger live in one
//! row; a job without a trigger has NULL trigger columns.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use feedsync_core::error::AppError;
use feedsync_core::job::{JobState, PollerJob, Trigger};
use feedsync_core::traits::PollerJobStore;

/// PostgreSQL implementation of the poller job store.
#[derive(Clone)]
pub struct PgPollerJobStore {
    pool: Pool<Postgres>,
}

impl PgPollerJobStore {
    /// Create a new job repository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a job by code.
    pub async fn get(&self, code: &str) -> Result<Option<PollerJob>, AppError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT code, config_name, state, active, remove_on_exit,
                   trigger_activation_time, trigger_active
            FROM poller_jobs
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PollerJob::try_from).transpose()
    }

    /// Lists the jobs polling for one feed configuration.
    pub async fn list_for_config(&self, config_name: &str) -> Result<Vec<PollerJob>, AppError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT code, config_name, state, active, remove_on_exit,
                   trigger_activation_time, trigger_active
            FROM poller_jobs
            WHERE config_name = $1
            ORDER BY created_at
            "#,
        )
        .bind(config_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PollerJob::try_from).collect()
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

/// Helper struct for deserializing job rows from the database.
#[derive(sqlx::FromRow)]
struct JobRow {
    code: String,
    config_name: String,
    state: String,
    active: bool,
    remove_on_exit: bool,
    trigger_activation_time: Option<DateTime<Utc>>,
    trigger_active: Option<bool>,
}

impl TryFrom<JobRow> for PollerJob {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state: JobState = row
            .state
            .parse()
            .map_err(|e| AppError::Generic(format!("job {}: {}", row.code, e)))?;
        let trigger = row.trigger_activation_time.map(|activation_time| Trigger {
            activation_time,
            active: row.trigger_active.unwrap_or(false),
        });

        Ok(Self {
            code: row.code,
            config_name: row.config_name,
            state,
            active: row.active,
            remove_on_exit: row.remove_on_exit,
            trigger,
        })
    }
}

// =============================================================================
// PollerJobStore Trait Implementation
// =============================================================================

impl PollerJobStore for PgPollerJobStore {
    async fn create_job(&self, job: &PollerJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO poller_jobs
                (code, config_name, state, active, remove_on_exit,
                 trigger_activation_time, trigger_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&job.code)
        .bind(&job.config_name)
        .bind(job.state.as_str())
        .bind(job.active)
        .bind(job.remove_on_exit)
        .bind(job.trigger.as_ref().map(|t| t.activation_time))
        .bind(job.trigger.as_ref().map(|t| t.active))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_job(&self, job: &PollerJob) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE poller_jobs
            SET
                state = $2,
                active = $3,
                remove_on_exit = $4,
                trigger_activation_time = $5,
                trigger_active = $6,
                updated_at = NOW()
            WHERE code = $1
            "#,
        )
        .bind(&job.code)
        .bind(job.state.as_str())
        .bind(job.active)
        .bind(job.remove_on_exit)
        .bind(job.trigger.as_ref().map(|t| t.activation_time))
        .bind(job.trigger.as_ref().map(|t| t.active))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Generic(format!("Poller job {} not found", job.code)));
        }
        Ok(())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<PollerJob>, AppError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT code, config_name, state, active, remove_on_exit,
                   trigger_activation_time, trigger_active
            FROM poller_jobs
            WHERE active
              AND trigger_active
              AND trigger_activation_time <= $1
            ORDER BY trigger_activation_time ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PollerJob::try_from).collect()
    }

    async fn remove_job(&self, code: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM poller_jobs WHERE code = $1")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
