use async_trait::async_trait;
use chrono::Utc;
use services::models::S3Token;
use services::ports::{NewToken, TokenStore};
use services::RepositoryError;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

pub struct TokenRepository {
    pool: DbPool,
}

impl TokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Digest of the sorted workspace and root bindings. Two broker calls
    /// for the same constellation produce the same hash, which is what the
    /// unique constraint keys on.
    fn constellation_hash(workspace_ids: &[Uuid], root_ids: &[Uuid]) -> String {
        let mut workspaces: Vec<Uuid> = workspace_ids.to_vec();
        workspaces.sort();
        let mut roots: Vec<Uuid> = root_ids.to_vec();
        roots.sort();
        let mut hasher = Sha256::new();
        for id in &workspaces {
            hasher.update(id.as_bytes());
        }
        hasher.update(b"|");
        for id in &roots {
            hasher.update(id.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn row_to_token(
        row: &tokio_postgres::Row,
        workspace_ids: Vec<Uuid>,
        root_ids: Vec<Uuid>,
    ) -> S3Token {
        S3Token {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            storage_node_id: row.get("storage_node_id"),
            access_key_id: row.get("access_key_id"),
            secret_access_key: row.get("secret_access_key"),
            session_token: row.get("session_token"),
            expiration: row.get("expiration"),
            policy: row.get("policy"),
            workspace_ids,
            root_ids,
            created: row.get("created"),
        }
    }

    async fn load_bindings(
        client: &deadpool_postgres::Object,
        token_id: Uuid,
    ) -> Result<(Vec<Uuid>, Vec<Uuid>), RepositoryError> {
        let workspace_rows = client
            .query(
                "SELECT workspace_id FROM token_workspace WHERE token_id = $1 ORDER BY workspace_id",
                &[&token_id],
            )
            .await
            .map_err(map_pg_error)?;
        let root_rows = client
            .query(
                "SELECT root_id FROM token_root WHERE token_id = $1 ORDER BY root_id",
                &[&token_id],
            )
            .await
            .map_err(map_pg_error)?;
        Ok((
            workspace_rows.iter().map(|r| r.get(0)).collect(),
            root_rows.iter().map(|r| r.get(0)).collect(),
        ))
    }
}

#[async_trait]
impl TokenStore for TokenRepository {
    async fn find_reusable(
        &self,
        owner_id: Uuid,
        node_id: Uuid,
        workspace_ids: &[Uuid],
        root_ids: &[Uuid],
    ) -> Result<Option<S3Token>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let mut workspaces: Vec<Uuid> = workspace_ids.to_vec();
        workspaces.sort();
        let mut roots: Vec<Uuid> = root_ids.to_vec();
        roots.sort();

        // Exact set equality on both bindings; the later expiration wins.
        let row = client
            .query_opt(
                r#"
                SELECT t.* FROM s3token t
                WHERE t.owner_id = $1
                  AND t.storage_node_id = $2
                  AND t.expiration > now()
                  AND ARRAY(
                        SELECT workspace_id FROM token_workspace
                        WHERE token_id = t.id ORDER BY workspace_id
                      ) = $3::uuid[]
                  AND ARRAY(
                        SELECT root_id FROM token_root
                        WHERE token_id = t.id ORDER BY root_id
                      ) = $4::uuid[]
                ORDER BY t.expiration DESC
                LIMIT 1
                "#,
                &[&owner_id, &node_id, &workspaces, &roots],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.map(|row| Self::row_to_token(&row, workspaces, roots)))
    }

    /// Insert the token and its bindings in one transaction. A leftover
    /// expired token for the same constellation is replaced; a live one
    /// surfaces as `AlreadyExists` for the broker to retry-fetch.
    async fn create(&self, token: NewToken) -> Result<S3Token, RepositoryError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(map_pg_error)?;

        let hash = Self::constellation_hash(&token.workspace_ids, &token.root_ids);
        tx.execute(
            r#"
            DELETE FROM s3token
            WHERE owner_id = $1 AND storage_node_id = $2
              AND constellation_hash = $3 AND expiration <= now()
            "#,
            &[&token.owner_id, &token.storage_node_id, &hash],
        )
        .await
        .map_err(map_pg_error)?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = tx
            .query_one(
                r#"
                INSERT INTO s3token (
                    id, owner_id, storage_node_id, access_key_id, secret_access_key,
                    session_token, expiration, policy, constellation_hash, created
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING *
                "#,
                &[
                    &id,
                    &token.owner_id,
                    &token.storage_node_id,
                    &token.access_key_id,
                    &token.secret_access_key,
                    &token.session_token,
                    &token.expiration,
                    &token.policy,
                    &hash,
                    &now,
                ],
            )
            .await
            .map_err(map_pg_error)?;

        for workspace_id in &token.workspace_ids {
            tx.execute(
                "INSERT INTO token_workspace (token_id, workspace_id) VALUES ($1, $2)",
                &[&id, &workspace_id],
            )
            .await
            .map_err(map_pg_error)?;
        }
        for root_id in &token.root_ids {
            tx.execute(
                "INSERT INTO token_root (token_id, root_id) VALUES ($1, $2)",
                &[&id, &root_id],
            )
            .await
            .map_err(map_pg_error)?;
        }
        tx.commit().await.map_err(map_pg_error)?;

        debug!("Persisted token: {} for user: {}", id, token.owner_id);
        let mut workspaces = token.workspace_ids;
        workspaces.sort();
        let mut roots = token.root_ids;
        roots.sort();
        Ok(Self::row_to_token(&row, workspaces, roots))
    }

    async fn get(&self, id: Uuid) -> Result<Option<S3Token>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM s3token WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        match row {
            Some(row) => {
                let (workspaces, roots) = Self::load_bindings(&client, id).await?;
                Ok(Some(Self::row_to_token(&row, workspaces, roots)))
            }
            None => Ok(None),
        }
    }

    async fn list_for_user(&self, owner_id: Uuid) -> Result<Vec<S3Token>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(
                "SELECT * FROM s3token WHERE owner_id = $1 ORDER BY created",
                &[&owner_id],
            )
            .await
            .map_err(map_pg_error)?;
        let mut tokens = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.get("id");
            let (workspaces, roots) = Self::load_bindings(&client, id).await?;
            tokens.push(Self::row_to_token(row, workspaces, roots));
        }
        Ok(tokens)
    }

    /// Associations go first; cascade handles them, but the explicit order
    /// keeps the delete visible in statement logs.
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(map_pg_error)?;
        tx.execute("DELETE FROM token_workspace WHERE token_id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        tx.execute("DELETE FROM token_root WHERE token_id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        let affected = tx
            .execute("DELETE FROM s3token WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        tx.commit().await.map_err(map_pg_error)?;
        Ok(affected > 0)
    }

    async fn delete_all_for_user(&self, owner_id: Uuid) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let affected = client
            .execute("DELETE FROM s3token WHERE owner_id = $1", &[&owner_id])
            .await
            .map_err(map_pg_error)?;
        Ok(affected)
    }

    async fn delete_for_workspace(&self, workspace_id: Uuid) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let affected = client
            .execute(
                r#"
                DELETE FROM s3token WHERE id IN (
                    SELECT token_id FROM token_workspace WHERE workspace_id = $1
                )
                "#,
                &[&workspace_id],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(affected)
    }
}
