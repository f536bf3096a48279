//! Insert parameter structs for the repositories. Domain rows live in
//! `services::models`; the repositories map Postgres rows straight into
//! those.

use services::models::RootType;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CreateNodeParams {
    pub name: String,
    pub api_url: String,
    pub sts_api_url: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub assume_role_arn: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateRootParams {
    pub root_type: RootType,
    pub bucket: String,
    pub base_path: String,
    pub node_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct CreateWorkspaceParams {
    pub name: String,
    pub base_path: Option<String>,
    pub owner_id: Uuid,
    pub root_id: Uuid,
}
