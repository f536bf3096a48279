use async_trait::async_trait;
use chrono::Utc;
use services::models::{Share, SharePermission};
use services::ports::{NewShare, ShareStore};
use services::RepositoryError;
use tracing::debug;
use uuid::Uuid;

use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

pub struct ShareRepository {
    pool: DbPool,
}

impl ShareRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_share(row: &tokio_postgres::Row) -> Result<Share, RepositoryError> {
        let permission: String = row.get("permission");
        Ok(Share {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            creator_id: row.get("creator_id"),
            sharee_id: row.get("sharee_id"),
            permission: SharePermission::parse(&permission).ok_or_else(|| {
                RepositoryError::DataConversionError(anyhow::anyhow!(
                    "unknown permission '{permission}'"
                ))
            })?,
            expiration: row.get("expiration"),
            created: row.get("created"),
        })
    }
}

#[async_trait]
impl ShareStore for ShareRepository {
    async fn create(&self, share: NewShare) -> Result<Share, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = client
            .query_one(
                r#"
                INSERT INTO share (
                    id, workspace_id, creator_id, sharee_id, permission, expiration, created
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
                "#,
                &[
                    &id,
                    &share.workspace_id,
                    &share.creator_id,
                    &share.sharee_id,
                    &share.permission.as_str(),
                    &share.expiration,
                    &now,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        debug!(
            "Created share: workspace {} -> sharee {}",
            share.workspace_id, share.sharee_id
        );
        Self::row_to_share(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Share>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM share WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(Self::row_to_share).transpose()
    }

    async fn find_for_sharee(
        &self,
        workspace_id: Uuid,
        sharee_id: Uuid,
    ) -> Result<Option<Share>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                "SELECT * FROM share WHERE workspace_id = $1 AND sharee_id = $2",
                &[&workspace_id, &sharee_id],
            )
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(Self::row_to_share).transpose()
    }

    async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<Share>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(
                "SELECT * FROM share WHERE workspace_id = $1 ORDER BY created",
                &[&workspace_id],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(Self::row_to_share).collect()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Share>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(
                "SELECT * FROM share WHERE creator_id = $1 OR sharee_id = $1 ORDER BY created",
                &[&user_id],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(Self::row_to_share).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let affected = client
            .execute("DELETE FROM share WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        Ok(affected > 0)
    }
}
