use async_trait::async_trait;
use chrono::Utc;
use services::models::User;
use services::ports::UserStore;
use services::RepositoryError;
use tracing::debug;
use uuid::Uuid;

use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: tokio_postgres::Row) -> User {
        User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            created: row.get("created"),
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM users WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)?;
        Ok(row.map(Self::row_to_user))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM users WHERE username ILIKE $1", &[&username])
            .await
            .map_err(map_pg_error)?;
        Ok(row.map(Self::row_to_user))
    }

    /// Look up by username/email, creating the row on first login.
    pub async fn get_or_create(
        &self,
        username: &str,
        email: &str,
    ) -> Result<User, RepositoryError> {
        if let Some(user) = self.get_by_username(username).await? {
            return Ok(user);
        }
        let client = self.pool.get().await.map_err(pool_error)?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = client
            .query_one(
                r#"
                INSERT INTO users (id, username, email, created)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (username) DO UPDATE SET email = EXCLUDED.email
                RETURNING *
                "#,
                &[&id, &username, &email, &now],
            )
            .await
            .map_err(map_pg_error)?;
        debug!("Provisioned user: {}", username);
        Ok(Self::row_to_user(row))
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn get(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        self.get_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        self.get_by_username(username).await
    }
}
