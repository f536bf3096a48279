//! Domain models shared by the engines. The database crate maps rows into
//! these; handlers project them to response DTOs before serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created: DateTime<Utc>,
}

/// A registered S3-compatible endpoint plus its operator credentials.
/// Credentials are secret operator material; only `api` decides when the
/// requester is allowed to see them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageNode {
    pub id: Uuid,
    pub name: String,
    pub api_url: String,
    pub sts_api_url: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub assume_role_arn: Option<String>,
    pub creator_id: Uuid,
    pub created: DateTime<Utc>,
}

impl StorageNode {
    /// Endpoint used for assume-role calls. AWS nodes (those with a role
    /// arn) default to the regional STS endpoint; MinIO answers STS on its
    /// own URL.
    pub fn sts_endpoint(&self) -> String {
        if let Some(url) = &self.sts_api_url {
            url.clone()
        } else if self.assume_role_arn.is_some() {
            format!("https://sts.{}.amazonaws.com", self.region)
        } else {
            self.api_url.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootType {
    Public,
    Private,
    Unmanaged,
}

impl RootType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootType::Public => "public",
            RootType::Private => "private",
            RootType::Unmanaged => "unmanaged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(RootType::Public),
            "private" => Some(RootType::Private),
            "unmanaged" => Some(RootType::Unmanaged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRoot {
    pub id: Uuid,
    pub root_type: RootType,
    pub bucket: String,
    pub base_path: String,
    pub node_id: Uuid,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    /// Set only for unmanaged workspaces; identifies the prefix inside the
    /// root instead of the derived `{username}/{name}` layout.
    pub base_path: Option<String>,
    pub owner_id: Uuid,
    pub root_id: Uuid,
    pub created: DateTime<Utc>,
}

/// A workspace with its owner, root, and node joined in. Engines operate
/// on this denormalized view so no store call happens mid-computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceContext {
    pub workspace: Workspace,
    pub owner: User,
    pub root: WorkspaceRoot,
    pub node: StorageNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePermission {
    Read,
    ReadWrite,
    Own,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharePermission::Read => "read",
            SharePermission::ReadWrite => "readwrite",
            SharePermission::Own => "own",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(SharePermission::Read),
            "readwrite" => Some(SharePermission::ReadWrite),
            "own" => Some(SharePermission::Own),
            _ => None,
        }
    }

    /// Whether the holder may put and delete objects.
    pub fn can_write(&self) -> bool {
        matches!(self, SharePermission::ReadWrite | SharePermission::Own)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Share {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub creator_id: Uuid,
    pub sharee_id: Uuid,
    pub permission: SharePermission,
    pub expiration: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

/// A persisted STS credential bound to a requester and a constellation of
/// workspaces/roots on one node. `expiration` is the source of truth for
/// reuse; expired rows may linger until GC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Token {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_id: String,
    pub secret_hash: String,
    pub created: DateTime<Utc>,
}

/// Presence of a RootIndex means the root is subscribed for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootIndex {
    pub id: Uuid,
    pub root_id: Uuid,
    pub index_type: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRound {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub last_indexed_key: Option<String>,
    pub total_objects: i64,
    pub total_size: i64,
    pub created: DateTime<Utc>,
}

impl CrawlRound {
    pub fn is_open(&self) -> bool {
        !self.succeeded
    }
}
