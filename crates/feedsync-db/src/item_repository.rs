//! Catalog item access for PostgreSQL.
//!
//! The plan's `query` is a SQL statement returning one `BIGINT` id column.
//! If it references `$1`, the plan scope is bound to it. Fetching restricts
//! items to the plan scope unless the scope is empty.

use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;

use feedsync_core::error::AppError;
use feedsync_core::models::{IndexPlan, Item, ItemId};
use feedsync_core::traits::ItemSource;

/// PostgreSQL implementation of [`ItemSource`].
#[derive(Clone)]
pub struct PgItemSource {
    pool: Pool<Postgres>,
}

impl PgItemSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or updates one item.
    pub async fn upsert(&self, item: &Item, scope: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO items (id, scope, attributes)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                scope = EXCLUDED.scope,
                attributes = EXCLUDED.attributes,
                updated_at = NOW()
            "#,
        )
        .bind(item.id)
        .bind(scope)
        .bind(Json(&item.attributes))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn binds_scope(query: &str) -> bool {
    query.contains("$1")
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    attributes: Json<Map<String, Value>>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            attributes: row.attributes.0,
        }
    }
}

impl ItemSource for PgItemSource {
    async fn resolve_item_ids(&self, plan: &IndexPlan) -> Result<Vec<ItemId>, AppError> {
        let mut query = sqlx::query_scalar::<_, i64>(&plan.query);
        if binds_scope(&plan.query) {
            query = query.bind(&plan.scope);
        }
        let ids = query.fetch_all(&self.pool).await?;

        debug!(user = %plan.user, scope = %plan.scope, items = ids.len(), "Item query executed");
        Ok(ids)
    }

    async fn fetch_items(&self, plan: &IndexPlan, ids: &[ItemId]) -> Result<Vec<Item>, AppError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
            SELECT id, attributes
            FROM items
            WHERE id = ANY($1)
              AND ($2 = '' OR scope = $2)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .bind(&plan.scope)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Item::from).collect())
    }
}
