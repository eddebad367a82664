//! Feed configuration repository for PostgreSQL.
//!
//! Implements [`ConfigStore`]. The plan and endpoint of a configuration are
//! JSONB documents; `save` only touches the fields the pipeline mutates, while
//! [`PgConfigStore::upsert`] replaces the whole definition (used by imports).

use chrono::NaiveDateTime;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;

use feedsync_core::error::AppError;
use feedsync_core::models::{IndexPlan, IndexRunConfig, RemoteEndpoint, RunStatus};
use feedsync_core::traits::ConfigStore;

/// PostgreSQL implementation of [`ConfigStore`].
#[derive(Clone)]
pub struct PgConfigStore {
    pool: Pool<Postgres>,
}

impl PgConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a configuration definition.
    ///
    /// Plan and endpoint are overwritten; the run status and the observed
    /// sync generation of an existing row are preserved.
    pub async fn upsert(&self, config: &IndexRunConfig) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO feed_configs (name, status, last_sync_generation, last_index_name, plan, endpoint)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO UPDATE SET
                plan = EXCLUDED.plan,
                endpoint = EXCLUDED.endpoint,
                updated_at = NOW()
            "#,
        )
        .bind(&config.name)
        .bind(config.status.as_str())
        .bind(config.last_sync_generation)
        .bind(&config.last_index_name)
        .bind(Json(&config.plan))
        .bind(Json(&config.endpoint))
        .execute(&self.pool)
        .await?;

        debug!(feed = %config.name, "Feed configuration imported");
        Ok(())
    }

    /// Resets a configuration stuck in RUNNING (e.g. after a crash mid-run).
    ///
    /// Returns false if the configuration does not exist or is not RUNNING.
    pub async fn reset_status(&self, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE feed_configs
            SET status = 'none', updated_at = NOW()
            WHERE name = $1 AND status = 'running'
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct ConfigRow {
    name: String,
    status: String,
    last_sync_generation: Option<NaiveDateTime>,
    last_index_name: Option<String>,
    plan: Json<IndexPlan>,
    endpoint: Json<RemoteEndpoint>,
}

impl TryFrom<ConfigRow> for IndexRunConfig {
    type Error = AppError;

    fn try_from(row: ConfigRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse::<RunStatus>()?,
            name: row.name,
            last_sync_generation: row.last_sync_generation,
            last_index_name: row.last_index_name,
            plan: row.plan.0,
            endpoint: row.endpoint.0,
        })
    }
}

const SELECT_CONFIG: &str = r#"
    SELECT name, status, last_sync_generation, last_index_name, plan, endpoint
    FROM feed_configs
"#;

// =============================================================================
// ConfigStore Trait Implementation
// =============================================================================

impl ConfigStore for PgConfigStore {
    async fn find_by_name(&self, name: &str) -> Result<Vec<IndexRunConfig>, AppError> {
        let query = format!("{} WHERE name = $1", SELECT_CONFIG);
        let rows: Vec<ConfigRow> = sqlx::query_as(&query)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(IndexRunConfig::try_from).collect()
    }

    async fn list(&self) -> Result<Vec<IndexRunConfig>, AppError> {
        let query = format!("{} ORDER BY name", SELECT_CONFIG);
        let rows: Vec<ConfigRow> = sqlx::query_as(&query).fetch_all(&self.pool).await?;

        rows.into_iter().map(IndexRunConfig::try_from).collect()
    }

    async fn save(&self, config: &IndexRunConfig) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO feed_configs (name, status, last_sync_generation, last_index_name, plan, endpoint)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO UPDATE SET
                status = EXCLUDED.status,
                last_sync_generation = EXCLUDED.last_sync_generation,
                last_index_name = EXCLUDED.last_index_name,
                updated_at = NOW()
            "#,
        )
        .bind(&config.name)
        .bind(config.status.as_str())
        .bind(config.last_sync_generation)
        .bind(&config.last_index_name)
        .bind(Json(&config.plan))
        .bind(Json(&config.endpoint))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_run(&self, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE feed_configs
            SET status = 'running', updated_at = NOW()
            WHERE name = $1 AND status <> 'running'
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
