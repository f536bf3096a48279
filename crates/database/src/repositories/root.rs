use async_trait::async_trait;
use chrono::Utc;
use services::models::{RootType, StorageNode, WorkspaceRoot};
use services::ports::RootStore;
use services::RepositoryError;
use tracing::debug;
use uuid::Uuid;

use crate::models::CreateRootParams;
use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

pub struct RootRepository {
    pool: DbPool,
}

impl RootRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub(crate) fn row_to_root(row: &tokio_postgres::Row) -> Result<WorkspaceRoot, RepositoryError> {
        let root_type: String = row.get("root_type");
        Ok(WorkspaceRoot {
            id: row.get("id"),
            root_type: RootType::parse(&root_type).ok_or_else(|| {
                RepositoryError::DataConversionError(anyhow::anyhow!(
                    "unknown root_type '{root_type}'"
                ))
            })?,
            bucket: row.get("bucket"),
            base_path: row.get("base_path"),
            node_id: row.get("node_id"),
            created: row.get("created"),
        })
    }

    pub async fn create(&self, params: CreateRootParams) -> Result<WorkspaceRoot, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = client
            .query_one(
                r#"
                INSERT INTO workspace_root (id, root_type, bucket, base_path, node_id, created)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
                &[
                    &id,
                    &params.root_type.as_str(),
                    &params.bucket,
                    &params.base_path,
                    &params.node_id,
                    &now,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        debug!(
            "Created {} root {}/{} on node {}",
            params.root_type.as_str(),
            params.bucket,
            params.base_path,
            params.node_id
        );
        Self::row_to_root(&row)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<WorkspaceRoot>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM workspace_root WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(Self::row_to_root).transpose()
    }

    pub async fn list(&self, node_id: Option<Uuid>) -> Result<Vec<WorkspaceRoot>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = match node_id {
            Some(node_id) => {
                client
                    .query(
                        "SELECT * FROM workspace_root WHERE node_id = $1 ORDER BY created",
                        &[&node_id],
                    )
                    .await
            }
            None => {
                client
                    .query("SELECT * FROM workspace_root ORDER BY created", &[])
                    .await
            }
        }
        .map_err(map_pg_error)?;
        rows.iter().map(Self::row_to_root).collect()
    }

    /// Delete a root. Referencing workspaces make this a foreign-key
    /// violation unless `cascade` removes them first.
    pub async fn delete(&self, id: Uuid, cascade: bool) -> Result<bool, RepositoryError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(map_pg_error)?;
        if cascade {
            tx.execute("DELETE FROM workspace WHERE root_id = $1", &[&id])
                .await
                .map_err(map_pg_error)?;
        }
        let affected = tx
            .execute("DELETE FROM workspace_root WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        tx.commit().await.map_err(map_pg_error)?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl RootStore for RootRepository {
    async fn get(&self, id: Uuid) -> Result<Option<WorkspaceRoot>, RepositoryError> {
        self.get_by_id(id).await
    }

    async fn find_covering(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<(WorkspaceRoot, StorageNode)>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        // Longest base_path wins when several roots share a bucket.
        let row = client
            .query_opt(
                r#"
                SELECT r.id, r.root_type, r.bucket, r.base_path, r.node_id, r.created,
                       n.id AS n_id, n.name AS n_name, n.api_url AS n_api_url,
                       n.sts_api_url AS n_sts_api_url, n.region AS n_region,
                       n.access_key_id AS n_access_key_id,
                       n.secret_access_key AS n_secret_access_key,
                       n.assume_role_arn AS n_assume_role_arn,
                       n.creator_id AS n_creator_id, n.created AS n_created
                FROM workspace_root r
                JOIN storage_node n ON n.id = r.node_id
                WHERE r.bucket = $1 AND $2 LIKE r.base_path || '%'
                ORDER BY length(r.base_path) DESC
                LIMIT 1
                "#,
                &[&bucket, &key],
            )
            .await
            .map_err(map_pg_error)?;
        match row {
            Some(row) => {
                let root = Self::row_to_root(&row)?;
                let node = StorageNode {
                    id: row.get("n_id"),
                    name: row.get("n_name"),
                    api_url: row.get("n_api_url"),
                    sts_api_url: row.get("n_sts_api_url"),
                    region: row.get("n_region"),
                    access_key_id: row.get("n_access_key_id"),
                    secret_access_key: row.get("n_secret_access_key"),
                    assume_role_arn: row.get("n_assume_role_arn"),
                    creator_id: row.get("n_creator_id"),
                    created: row.get("n_created"),
                };
                Ok(Some((root, node)))
            }
            None => Ok(None),
        }
    }
}
