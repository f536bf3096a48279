use async_trait::async_trait;
use chrono::Utc;
use services::models::CrawlRound;
use services::ports::CrawlStore;
use services::RepositoryError;
use tracing::debug;
use uuid::Uuid;

use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

/// Round transitions are serialized per workspace by locking the latest
/// round row (`ORDER BY start_time DESC LIMIT 1 FOR UPDATE`).
pub struct CrawlRepository {
    pool: DbPool,
}

impl CrawlRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_round(row: &tokio_postgres::Row) -> CrawlRound {
        CrawlRound {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            succeeded: row.get("succeeded"),
            last_indexed_key: row.get("last_indexed_key"),
            total_objects: row.get("total_objects"),
            total_size: row.get("total_size"),
            created: row.get("created"),
        }
    }
}

const LATEST_FOR_UPDATE: &str = r#"
    SELECT * FROM workspace_crawl_round
    WHERE workspace_id = $1
    ORDER BY start_time DESC
    LIMIT 1
    FOR UPDATE
"#;

#[async_trait]
impl CrawlStore for CrawlRepository {
    async fn latest_round(
        &self,
        workspace_id: Uuid,
    ) -> Result<Option<CrawlRound>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                r#"
                SELECT * FROM workspace_crawl_round
                WHERE workspace_id = $1
                ORDER BY start_time DESC
                LIMIT 1
                "#,
                &[&workspace_id],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.as_ref().map(Self::row_to_round))
    }

    async fn open_or_create(&self, workspace_id: Uuid) -> Result<CrawlRound, RepositoryError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(map_pg_error)?;

        let latest = tx
            .query_opt(LATEST_FOR_UPDATE, &[&workspace_id])
            .await
            .map_err(map_pg_error)?;
        if let Some(row) = latest {
            let round = Self::row_to_round(&row);
            if !round.succeeded {
                tx.commit().await.map_err(map_pg_error)?;
                return Ok(round);
            }
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = tx
            .query_one(
                r#"
                INSERT INTO workspace_crawl_round (id, workspace_id, start_time, created)
                VALUES ($1, $2, $3, $3)
                RETURNING *
                "#,
                &[&id, &workspace_id, &now],
            )
            .await
            .map_err(map_pg_error)?;
        tx.commit().await.map_err(map_pg_error)?;
        debug!("Opened crawl round {} for workspace {}", id, workspace_id);
        Ok(Self::row_to_round(&row))
    }

    async fn apply_batch(
        &self,
        workspace_id: Uuid,
        added_objects: i64,
        added_size: i64,
        last_indexed_key: Option<String>,
        succeeded: bool,
    ) -> Result<Option<CrawlRound>, RepositoryError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(map_pg_error)?;

        let latest = tx
            .query_opt(LATEST_FOR_UPDATE, &[&workspace_id])
            .await
            .map_err(map_pg_error)?;
        let Some(row) = latest else {
            tx.rollback().await.map_err(map_pg_error)?;
            return Ok(None);
        };
        let round = Self::row_to_round(&row);
        if round.succeeded {
            tx.rollback().await.map_err(map_pg_error)?;
            return Ok(None);
        }

        let end_time = succeeded.then(Utc::now);
        let row = tx
            .query_one(
                r#"
                UPDATE workspace_crawl_round
                SET total_objects = total_objects + $2,
                    total_size = total_size + $3,
                    last_indexed_key = COALESCE($4, last_indexed_key),
                    succeeded = succeeded OR $5,
                    end_time = COALESCE($6, end_time)
                WHERE id = $1
                RETURNING *
                "#,
                &[
                    &round.id,
                    &added_objects,
                    &added_size,
                    &last_indexed_key,
                    &succeeded,
                    &end_time,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        tx.commit().await.map_err(map_pg_error)?;
        Ok(Some(Self::row_to_round(&row)))
    }
}
