use chrono::Utc;
use services::models::StorageNode;
use services::RepositoryError;
use tracing::debug;
use uuid::Uuid;

use crate::models::CreateNodeParams;
use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

pub struct NodeRepository {
    pool: DbPool,
}

impl NodeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub(crate) fn row_to_node(row: &tokio_postgres::Row) -> StorageNode {
        StorageNode {
            id: row.get("id"),
            name: row.get("name"),
            api_url: row.get("api_url"),
            sts_api_url: row.get("sts_api_url"),
            region: row.get("region"),
            access_key_id: row.get("access_key_id"),
            secret_access_key: row.get("secret_access_key"),
            assume_role_arn: row.get("assume_role_arn"),
            creator_id: row.get("creator_id"),
            created: row.get("created"),
        }
    }

    pub async fn create(
        &self,
        creator_id: Uuid,
        params: CreateNodeParams,
    ) -> Result<StorageNode, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = client
            .query_one(
                r#"
                INSERT INTO storage_node (
                    id, name, api_url, sts_api_url, region,
                    access_key_id, secret_access_key, assume_role_arn,
                    creator_id, created
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING *
                "#,
                &[
                    &id,
                    &params.name,
                    &params.api_url,
                    &params.sts_api_url,
                    &params.region,
                    &params.access_key_id,
                    &params.secret_access_key,
                    &params.assume_role_arn,
                    &creator_id,
                    &now,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        debug!("Created storage node: {} ({})", params.name, id);
        Ok(Self::row_to_node(&row))
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<StorageNode>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM storage_node WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        Ok(row.as_ref().map(Self::row_to_node))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<StorageNode>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM storage_node WHERE name = $1", &[&name])
            .await
            .map_err(map_pg_error)?;
        Ok(row.as_ref().map(Self::row_to_node))
    }

    pub async fn list(&self) -> Result<Vec<StorageNode>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query("SELECT * FROM storage_node ORDER BY created", &[])
            .await
            .map_err(map_pg_error)?;
        Ok(rows.iter().map(Self::row_to_node).collect())
    }

    /// Delete a node, cascading to its roots.
    pub async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let affected = client
            .execute("DELETE FROM storage_node WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        Ok(affected > 0)
    }
}
