use async_trait::async_trait;
use chrono::Utc;
use services::models::RootIndex;
use services::ports::IndexStore;
use services::RepositoryError;
use tracing::debug;
use uuid::Uuid;

use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

pub struct RootIndexRepository {
    pool: DbPool,
}

impl RootIndexRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_index(row: &tokio_postgres::Row) -> RootIndex {
        RootIndex {
            id: row.get("id"),
            root_id: row.get("root_id"),
            index_type: row.get("index_type"),
            created: row.get("created"),
        }
    }
}

#[async_trait]
impl IndexStore for RootIndexRepository {
    async fn get_for_root(&self, root_id: Uuid) -> Result<Option<RootIndex>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM root_index WHERE root_id = $1", &[&root_id])
            .await
            .map_err(map_pg_error)?;
        Ok(row.as_ref().map(Self::row_to_index))
    }

    async fn upsert(&self, root_id: Uuid, index_type: &str) -> Result<RootIndex, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = client
            .query_one(
                r#"
                INSERT INTO root_index (id, root_id, index_type, created)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (root_id, index_type) DO UPDATE SET index_type = EXCLUDED.index_type
                RETURNING *
                "#,
                &[&id, &root_id, &index_type, &now],
            )
            .await
            .map_err(map_pg_error)?;
        debug!("Subscribed root {} to index '{}'", root_id, index_type);
        Ok(Self::row_to_index(&row))
    }

    async fn delete_for_root(&self, root_id: Uuid) -> Result<Option<RootIndex>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                "DELETE FROM root_index WHERE root_id = $1 RETURNING *",
                &[&root_id],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.as_ref().map(Self::row_to_index))
    }

    async fn count_for_type(&self, index_type: &str) -> Result<i64, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_one(
                "SELECT count(*) FROM root_index WHERE index_type = $1",
                &[&index_type],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.get(0))
    }
}
