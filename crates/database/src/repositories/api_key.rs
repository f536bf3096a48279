use chrono::Utc;
use rand::Rng;
use services::models::ApiKey;
use services::RepositoryError;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::pool::DbPool;
use crate::repositories::utils::{map_pg_error, pool_error};

pub struct ApiKeyRepository {
    pool: DbPool,
}

impl ApiKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn generate_key_id() -> String {
        format!("wio_{}", Uuid::new_v4().simple())
    }

    fn generate_secret() -> String {
        let bytes: [u8; 32] = rand::rng().random();
        hex::encode(bytes)
    }

    fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Constant-time comparison of a presented secret against the stored
    /// digest. Both sides are fixed-length SHA-256 hex.
    pub fn verify_secret(secret: &str, secret_hash: &str) -> bool {
        let presented = Self::hash_secret(secret);
        if presented.len() != secret_hash.len() {
            return false;
        }
        presented
            .bytes()
            .zip(secret_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    fn row_to_api_key(row: &tokio_postgres::Row) -> ApiKey {
        ApiKey {
            id: row.get("id"),
            user_id: row.get("user_id"),
            key_id: row.get("key_id"),
            secret_hash: row.get("secret_hash"),
            created: row.get("created"),
        }
    }

    /// Create a key for the user. The plaintext secret is returned exactly
    /// once; only its digest is stored.
    pub async fn create(&self, user_id: Uuid) -> Result<(ApiKey, String), RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let id = Uuid::new_v4();
        let key_id = Self::generate_key_id();
        let secret = Self::generate_secret();
        let secret_hash = Self::hash_secret(&secret);
        let now = Utc::now();
        let row = client
            .query_one(
                r#"
                INSERT INTO api_key (id, user_id, key_id, secret_hash, created)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
                "#,
                &[&id, &user_id, &key_id, &secret_hash, &now],
            )
            .await
            .map_err(map_pg_error)?;
        debug!("Created API key: {} for user: {}", key_id, user_id);
        Ok((Self::row_to_api_key(&row), secret))
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(
                "SELECT * FROM api_key WHERE user_id = $1 ORDER BY created",
                &[&user_id],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(rows.iter().map(Self::row_to_api_key).collect())
    }

    pub async fn get_by_key_id(&self, key_id: &str) -> Result<Option<ApiKey>, RepositoryError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt("SELECT * FROM api_key WHERE key_id = $1", &[&key_id])
            .await
            .map_err(map_pg_error)?;
        Ok(row.as_ref().map(Self::row_to_api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_round_trip_verifies() {
        let secret = ApiKeyRepository::generate_secret();
        let hash = ApiKeyRepository::hash_secret(&secret);
        assert!(ApiKeyRepository::verify_secret(&secret, &hash));
        assert!(!ApiKeyRepository::verify_secret("wrong", &hash));
    }

    #[test]
    fn generated_identifiers_are_distinct() {
        assert_ne!(
            ApiKeyRepository::generate_key_id(),
            ApiKeyRepository::generate_key_id()
        );
        assert_ne!(
            ApiKeyRepository::generate_secret(),
            ApiKeyRepository::generate_secret()
        );
    }
}
