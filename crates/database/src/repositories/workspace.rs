use async_trait::async_trait;
use chrono::Utc;
use services::models::{RootType, StorageNode, User, Workspace, WorkspaceContext, WorkspaceRoot};
use services::ports::{WorkspaceFilter, WorkspaceStore};
use services::RepositoryError;
use tracing::debug;
use uuid::Uuid;

use crate::models::CreateWorkspaceParams;
use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

/// Context query shared by every lookup flavor: the workspace with its
/// owner, root, and node denormalized into one row.
const CONTEXT_SELECT: &str = r#"
    SELECT w.id, w.name, w.base_path, w.owner_id, w.root_id, w.created,
           u.username AS u_username, u.email AS u_email, u.created AS u_created,
           r.root_type AS r_root_type, r.bucket AS r_bucket,
           r.base_path AS r_base_path, r.node_id AS r_node_id, r.created AS r_created,
           n.name AS n_name, n.api_url AS n_api_url, n.sts_api_url AS n_sts_api_url,
           n.region AS n_region, n.access_key_id AS n_access_key_id,
           n.secret_access_key AS n_secret_access_key,
           n.assume_role_arn AS n_assume_role_arn,
           n.creator_id AS n_creator_id, n.created AS n_created
    FROM workspace w
    JOIN users u ON u.id = w.owner_id
    JOIN workspace_root r ON r.id = w.root_id
    JOIN storage_node n ON n.id = r.node_id
"#;

pub struct WorkspaceRepository {
    pool: DbPool,
}

impl WorkspaceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_context(row: &tokio_postgres::Row) -> Result<WorkspaceContext, RepositoryError> {
        let root_type: String = row.get("r_root_type");
        Ok(WorkspaceContext {
            workspace: Workspace {
                id: row.get("id"),
                name: row.get("name"),
                base_path: row.get("base_path"),
                owner_id: row.get("owner_id"),
                root_id: row.get("root_id"),
                created: row.get("created"),
            },
            owner: User {
                id: row.get("owner_id"),
                username: row.get("u_username"),
                email: row.get("u_email"),
                created: row.get("u_created"),
            },
            root: WorkspaceRoot {
                id: row.get("root_id"),
                root_type: RootType::parse(&root_type).ok_or_else(|| {
                    RepositoryError::DataConversionError(anyhow::anyhow!(
                        "unknown root_type '{root_type}'"
                    ))
                })?,
                bucket: row.get("r_bucket"),
                base_path: row.get("r_base_path"),
                node_id: row.get("r_node_id"),
                created: row.get("r_created"),
            },
            node: StorageNode {
                id: row.get("r_node_id"),
                name: row.get("n_name"),
                api_url: row.get("n_api_url"),
                sts_api_url: row.get("n_sts_api_url"),
                region: row.get("n_region"),
                access_key_id: row.get("n_access_key_id"),
                secret_access_key: row.get("n_secret_access_key"),
                assume_role_arn: row.get("n_assume_role_arn"),
                creator_id: row.get("n_creator_id"),
                created: row.get("n_created"),
            },
        })
    }

    pub async fn create(
        &self,
        params: CreateWorkspaceParams,
    ) -> Result<WorkspaceContext, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        client
            .execute(
                r#"
                INSERT INTO workspace (id, name, base_path, owner_id, root_id, created)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
                &[
                    &id,
                    &params.name,
                    &params.base_path,
                    &params.owner_id,
                    &params.root_id,
                    &now,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        debug!("Created workspace: {} for user: {}", params.name, params.owner_id);
        self.get_context_inner(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("workspace".to_string()))
    }

    async fn get_context_inner(
        &self,
        id: Uuid,
    ) -> Result<Option<WorkspaceContext>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let query = format!("{CONTEXT_SELECT} WHERE w.id = $1");
        let row = client
            .query_opt(&query, &[&id])
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(Self::row_to_context).transpose()
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let affected = client
            .execute("DELETE FROM workspace WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl WorkspaceStore for WorkspaceRepository {
    async fn get_context(&self, id: Uuid) -> Result<Option<WorkspaceContext>, RepositoryError> {
        self.get_context_inner(id).await
    }

    async fn load_contexts(&self, ids: &[Uuid]) -> Result<Vec<WorkspaceContext>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let query = format!("{CONTEXT_SELECT} WHERE w.id = ANY($1)");
        let rows = client
            .query(&query, &[&ids])
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(Self::row_to_context).collect()
    }

    async fn search_accessible(
        &self,
        requester_id: Uuid,
        filter: &WorkspaceFilter,
    ) -> Result<Vec<WorkspaceContext>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;

        let mut query = format!(
            r#"{CONTEXT_SELECT}
            LEFT JOIN share s ON s.workspace_id = w.id AND s.sharee_id = $1
            WHERE (w.owner_id = $1 OR s.id IS NOT NULL OR ($2 AND r.root_type = 'public'))
            "#
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
            vec![&requester_id, &filter.public];
        let mut param_index = 3;

        let like_pattern = filter.like.as_ref().map(|like| format!("%{like}%"));
        if let Some(ref name) = filter.name {
            query.push_str(&format!(" AND w.name = ${param_index}"));
            params.push(name);
            param_index += 1;
        }
        if let Some(ref owner_id) = filter.owner_id {
            query.push_str(&format!(" AND w.owner_id = ${param_index}"));
            params.push(owner_id);
            param_index += 1;
        }
        if let Some(ref pattern) = like_pattern {
            query.push_str(&format!(" AND w.name ILIKE ${param_index}"));
            params.push(pattern);
        }
        query.push_str(" ORDER BY w.created");

        let rows = client.query(&query, &params).await.map_err(map_pg_error)?;
        rows.iter().map(Self::row_to_context).collect()
    }

    async fn list_in_root(&self, root_id: Uuid) -> Result<Vec<WorkspaceContext>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let query = format!("{CONTEXT_SELECT} WHERE w.root_id = $1");
        let rows = client
            .query(&query, &[&root_id])
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(Self::row_to_context).collect()
    }

    async fn find_in_root(
        &self,
        root_id: Uuid,
        owner_username: &str,
        name: &str,
    ) -> Result<Option<WorkspaceContext>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let query = format!("{CONTEXT_SELECT} WHERE w.root_id = $1 AND u.username = $2 AND w.name = $3");
        let row = client
            .query_opt(&query, &[&root_id, &owner_username, &name])
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(Self::row_to_context).transpose()
    }
}
