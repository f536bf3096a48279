//! Request and response DTOs. Domain models are projected into these
//! before serialization; secret material is stripped here, not in
//! handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use services::models::{
    ApiKey, CrawlRound, RootType, S3Token, Share, SharePermission, StorageNode, User,
    WorkspaceContext, WorkspaceRoot,
};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    pub public_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            created: user.created,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    pub api_url: String,
    pub sts_api_url: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub assume_role_arn: Option<String>,
}

/// Node view with operator credentials withheld unless the requester
/// created the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub id: Uuid,
    pub name: String,
    pub api_url: String,
    pub sts_api_url: Option<String>,
    pub region: String,
    pub creator_id: Uuid,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assume_role_arn: Option<String>,
}

impl NodeResponse {
    pub fn for_requester(node: StorageNode, requester_id: Uuid) -> Self {
        let is_operator = node.creator_id == requester_id;
        Self {
            id: node.id,
            name: node.name,
            api_url: node.api_url,
            sts_api_url: node.sts_api_url,
            region: node.region,
            creator_id: node.creator_id,
            created: node.created,
            access_key_id: is_operator.then_some(node.access_key_id),
            secret_access_key: is_operator.then_some(node.secret_access_key),
            assume_role_arn: if is_operator {
                node.assume_role_arn
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRootRequest {
    pub root_type: RootType,
    pub bucket: String,
    #[serde(default)]
    pub base_path: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub id: Uuid,
    pub root_type: RootType,
    pub bucket: String,
    pub base_path: String,
    pub node_id: Uuid,
    pub created: DateTime<Utc>,
}

impl From<WorkspaceRoot> for RootResponse {
    fn from(root: WorkspaceRoot) -> Self {
        Self {
            id: root.id,
            root_type: root.root_type,
            bucket: root.bucket,
            base_path: root.base_path,
            node_id: root.node_id,
            created: root.created,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RootQuery {
    pub node_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRootQuery {
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootImportEntry {
    pub key: String,
    pub size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootImportResponse {
    pub prefixes: Vec<String>,
    pub objects: Vec<RootImportEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootIndexResponse {
    pub id: Uuid,
    pub root_id: Uuid,
    pub index_type: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub unmanaged: bool,
    pub base_path: Option<String>,
    pub node_name: Option<String>,
    pub root_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceQuery {
    pub name: Option<String>,
    pub owner_id: Option<Uuid>,
    pub like: Option<String>,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceResponse {
    pub id: Uuid,
    pub name: String,
    pub base_path: Option<String>,
    pub owner_id: Uuid,
    pub root_id: Uuid,
    pub created: DateTime<Utc>,
    pub owner: UserResponse,
    pub root: RootResponse,
}

impl From<WorkspaceContext> for WorkspaceResponse {
    fn from(ctx: WorkspaceContext) -> Self {
        Self {
            id: ctx.workspace.id,
            name: ctx.workspace.name,
            base_path: ctx.workspace.base_path,
            owner_id: ctx.workspace.owner_id,
            root_id: ctx.workspace.root_id,
            created: ctx.workspace.created,
            owner: ctx.owner.into(),
            root: ctx.root.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub workspace_id: Option<Uuid>,
    pub workspace: Option<String>,
    pub sharee_id: Option<Uuid>,
    pub sharee: Option<String>,
    pub permission: SharePermission,
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub creator_id: Uuid,
    pub sharee_id: Uuid,
    pub permission: SharePermission,
    pub expiration: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

impl From<Share> for ShareResponse {
    fn from(share: Share) -> Self {
        Self {
            id: share.id,
            workspace_id: share.workspace_id,
            creator_id: share.creator_id,
            sharee_id: share.sharee_id,
            permission: share.permission,
            expiration: share.expiration,
            created: share.created,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub workspaces: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TokenSearchRequest {
    pub search_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub storage_node_id: Uuid,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
    pub policy: serde_json::Value,
    pub workspace_ids: Vec<Uuid>,
    pub root_ids: Vec<Uuid>,
    pub created: DateTime<Utc>,
}

impl From<S3Token> for TokenResponse {
    fn from(token: S3Token) -> Self {
        Self {
            id: token.id,
            owner_id: token.owner_id,
            storage_node_id: token.storage_node_id,
            access_key_id: token.access_key_id,
            secret_access_key: token.secret_access_key,
            session_token: token.session_token,
            expiration: token.expiration,
            policy: token.policy,
            workspace_ids: token.workspace_ids,
            root_ids: token.root_ids,
            created: token.created,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenNodeResponse {
    pub token: TokenResponse,
    pub node: NodeResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenSearchMatch {
    pub workspace: WorkspaceResponse,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenSearchResponse {
    pub tokens: Vec<TokenNodeResponse>,
    pub workspaces: std::collections::HashMap<String, TokenSearchMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_id: String,
    pub created: DateTime<Utc>,
    /// Present only in the create response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl ApiKeyResponse {
    pub fn from_key(key: ApiKey, secret: Option<String>) -> Self {
        Self {
            id: key.id,
            user_id: key.user_id,
            key_id: key.key_id,
            created: key.created,
            secret,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CrawlRoundResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub last_indexed_key: Option<String>,
    pub total_objects: i64,
    pub total_size: i64,
}

impl From<CrawlRound> for CrawlRoundResponse {
    fn from(round: CrawlRound) -> Self {
        Self {
            id: round.id,
            workspace_id: round.workspace_id,
            start_time: round.start_time,
            end_time: round.end_time,
            succeeded: round.succeeded,
            last_indexed_key: round.last_indexed_key,
            total_objects: round.total_objects,
            total_size: round.total_size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}
