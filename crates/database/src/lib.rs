pub mod migrations;
pub mod models;
pub mod pool;
pub mod repositories;

pub use models::*;
pub use pool::DbPool;
pub use repositories::{
    ApiKeyRepository, CrawlRepository, NodeRepository, RootIndexRepository, RootRepository,
    ShareRepository, TokenRepository, UserRepository, WorkspaceRepository,
};

use anyhow::Result;
use std::sync::Arc;

/// Database service combining all repositories.
pub struct Database {
    pub users: Arc<UserRepository>,
    pub nodes: Arc<NodeRepository>,
    pub roots: Arc<RootRepository>,
    pub workspaces: Arc<WorkspaceRepository>,
    pub shares: Arc<ShareRepository>,
    pub tokens: Arc<TokenRepository>,
    pub api_keys: Arc<ApiKeyRepository>,
    pub root_indexes: Arc<RootIndexRepository>,
    pub crawls: Arc<CrawlRepository>,
    pool: DbPool,
}

impl Database {
    /// Create a new database service from a connection pool
    pub fn new(pool: DbPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            nodes: Arc::new(NodeRepository::new(pool.clone())),
            roots: Arc::new(RootRepository::new(pool.clone())),
            workspaces: Arc::new(WorkspaceRepository::new(pool.clone())),
            shares: Arc::new(ShareRepository::new(pool.clone())),
            tokens: Arc::new(TokenRepository::new(pool.clone())),
            api_keys: Arc::new(ApiKeyRepository::new(pool.clone())),
            root_indexes: Arc::new(RootIndexRepository::new(pool.clone())),
            crawls: Arc::new(CrawlRepository::new(pool.clone())),
            pool,
        }
    }

    /// Create a new database service from configuration
    pub async fn from_config(settings: &config::Settings) -> Result<Self> {
        let pool = pool::create_pool(&settings.database_uri).await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}
