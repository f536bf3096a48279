//! Store traits implemented by the database crate. Engines depend on these
//! instead of the concrete repositories so they can be exercised against
//! in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::RepositoryError;
use crate::error::ServiceError;
use crate::models::{
    CrawlRound, RootIndex, S3Token, Share, SharePermission, StorageNode, User, WorkspaceContext,
    WorkspaceRoot,
};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;
    /// Case-insensitive exact match on username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilter {
    pub name: Option<String>,
    pub owner_id: Option<Uuid>,
    pub like: Option<String>,
    /// Include workspaces in public roots beyond owned/shared ones.
    pub public: bool,
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn get_context(&self, id: Uuid) -> Result<Option<WorkspaceContext>, RepositoryError>;
    async fn load_contexts(&self, ids: &[Uuid]) -> Result<Vec<WorkspaceContext>, RepositoryError>;
    /// Workspaces visible to the requester: owned, shared-with, and (when
    /// the filter says so) public-root workspaces.
    async fn search_accessible(
        &self,
        requester_id: Uuid,
        filter: &WorkspaceFilter,
    ) -> Result<Vec<WorkspaceContext>, RepositoryError>;
    /// All workspaces belonging to a root, for unmanaged prefix matching.
    async fn list_in_root(&self, root_id: Uuid) -> Result<Vec<WorkspaceContext>, RepositoryError>;
    /// Lookup by `(owner username, workspace name)` within a root.
    async fn find_in_root(
        &self,
        root_id: Uuid,
        owner_username: &str,
        name: &str,
    ) -> Result<Option<WorkspaceContext>, RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct NewShare {
    pub workspace_id: Uuid,
    pub creator_id: Uuid,
    pub sharee_id: Uuid,
    pub permission: SharePermission,
    pub expiration: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ShareStore: Send + Sync {
    async fn create(&self, share: NewShare) -> Result<Share, RepositoryError>;
    async fn get(&self, id: Uuid) -> Result<Option<Share>, RepositoryError>;
    async fn find_for_sharee(
        &self,
        workspace_id: Uuid,
        sharee_id: Uuid,
    ) -> Result<Option<Share>, RepositoryError>;
    async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<Share>, RepositoryError>;
    /// Shares where the user is creator or sharee.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Share>, RepositoryError>;
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct NewToken {
    pub owner_id: Uuid,
    pub storage_node_id: Uuid,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
    pub policy: serde_json::Value,
    pub workspace_ids: Vec<Uuid>,
    pub root_ids: Vec<Uuid>,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Find an unexpired token of the owner on the node bound to exactly
    /// the given foreign-workspace set and root set. When duplicates exist
    /// the one with the latest expiration wins.
    async fn find_reusable(
        &self,
        owner_id: Uuid,
        node_id: Uuid,
        workspace_ids: &[Uuid],
        root_ids: &[Uuid],
    ) -> Result<Option<S3Token>, RepositoryError>;
    /// Persist the token and its bindings atomically.
    async fn create(&self, token: NewToken) -> Result<S3Token, RepositoryError>;
    async fn get(&self, id: Uuid) -> Result<Option<S3Token>, RepositoryError>;
    async fn list_for_user(&self, owner_id: Uuid) -> Result<Vec<S3Token>, RepositoryError>;
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;
    async fn delete_all_for_user(&self, owner_id: Uuid) -> Result<u64, RepositoryError>;
    /// Invalidate every token bound to a workspace (share revocation).
    async fn delete_for_workspace(&self, workspace_id: Uuid) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait CrawlStore: Send + Sync {
    /// Latest round by start time, or none.
    async fn latest_round(&self, workspace_id: Uuid) -> Result<Option<CrawlRound>, RepositoryError>;
    /// Return the open round, or create a fresh one if the latest is
    /// closed. Serialized per workspace (row lock in the Postgres
    /// implementation).
    async fn open_or_create(&self, workspace_id: Uuid) -> Result<CrawlRound, RepositoryError>;
    /// Fold one ingest batch into the open round. Returns the updated
    /// round, or `None` if no round is open.
    async fn apply_batch(
        &self,
        workspace_id: Uuid,
        added_objects: i64,
        added_size: i64,
        last_indexed_key: Option<String>,
        succeeded: bool,
    ) -> Result<Option<CrawlRound>, RepositoryError>;
}

#[async_trait]
pub trait RootStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<WorkspaceRoot>, RepositoryError>;
    /// Root whose bucket matches and whose base_path prefixes the object
    /// key, together with its node.
    async fn find_covering(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<(WorkspaceRoot, StorageNode)>, RepositoryError>;
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get_for_root(&self, root_id: Uuid) -> Result<Option<RootIndex>, RepositoryError>;
    async fn upsert(&self, root_id: Uuid, index_type: &str) -> Result<RootIndex, RepositoryError>;
    async fn delete_for_root(&self, root_id: Uuid) -> Result<Option<RootIndex>, RepositoryError>;
    /// Remaining subscriptions on an index type, to decide whether the
    /// search index itself should be dropped.
    async fn count_for_type(&self, index_type: &str) -> Result<i64, RepositoryError>;
}

/// Credentials returned by an STS assume-role call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

#[async_trait]
pub trait StsProvider: Send + Sync {
    async fn assume_role(
        &self,
        node: &StorageNode,
        session_name: &str,
        policy_json: &str,
    ) -> Result<StsCredentials, ServiceError>;
}

/// The search engine, reduced to what the broker needs: index lifecycle
/// and newline-delimited bulk submission.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn ensure_index(&self, name: &str) -> Result<(), ServiceError>;
    async fn delete_index(&self, name: &str) -> Result<(), ServiceError>;
    async fn bulk(&self, body: String) -> Result<(), ServiceError>;
}

