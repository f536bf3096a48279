//! In-memory port implementations for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::common::RepositoryError;
use crate::error::ServiceError;
use crate::models::{
    CrawlRound, RootIndex, RootType, S3Token, Share, StorageNode, User, Workspace,
    WorkspaceContext, WorkspaceRoot,
};
use crate::ports::{
    CrawlStore, IndexStore, NewShare, NewToken, RootStore, SearchIndex, ShareStore, StsCredentials,
    StsProvider, TokenStore, UserStore, WorkspaceFilter, WorkspaceStore,
};

pub fn user(name: &str) -> User {
    User {
        id: Uuid::new_v4(),
        username: name.to_string(),
        email: format!("{name}@example.com"),
        created: Utc::now(),
    }
}

pub fn node(creator: &User) -> StorageNode {
    StorageNode {
        id: Uuid::new_v4(),
        name: "minio".to_string(),
        api_url: "http://minio:9000".to_string(),
        sts_api_url: None,
        region: "us-east-1".to_string(),
        access_key_id: "ak".to_string(),
        secret_access_key: "sk".to_string(),
        assume_role_arn: None,
        creator_id: creator.id,
        created: Utc::now(),
    }
}

pub fn root(node: &StorageNode, root_type: RootType, bucket: &str, base_path: &str) -> WorkspaceRoot {
    WorkspaceRoot {
        id: Uuid::new_v4(),
        root_type,
        bucket: bucket.to_string(),
        base_path: base_path.to_string(),
        node_id: node.id,
        created: Utc::now(),
    }
}

pub fn context(
    node: &StorageNode,
    root: &WorkspaceRoot,
    owner: &User,
    name: &str,
    base_path: Option<&str>,
) -> WorkspaceContext {
    WorkspaceContext {
        workspace: Workspace {
            id: Uuid::new_v4(),
            name: name.to_string(),
            base_path: base_path.map(|s| s.to_string()),
            owner_id: owner.id,
            root_id: root.id,
            created: Utc::now(),
        },
        owner: owner.clone(),
        root: root.clone(),
        node: node.clone(),
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    pub users: Mutex<Vec<User>>,
    pub contexts: Mutex<Vec<WorkspaceContext>>,
    pub shares: Mutex<Vec<Share>>,
    pub tokens: Mutex<Vec<S3Token>>,
    pub rounds: Mutex<Vec<CrawlRound>>,
    pub indexes: Mutex<Vec<RootIndex>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: &User) {
        self.users.lock().unwrap().push(user.clone());
    }

    pub fn add_context(&self, ctx: &WorkspaceContext) {
        self.contexts.lock().unwrap().push(ctx.clone());
    }

    pub fn add_share(&self, share: &Share) {
        self.shares.lock().unwrap().push(share.clone());
    }

    pub fn add_index(&self, root_id: Uuid, index_type: &str) {
        self.indexes.lock().unwrap().push(RootIndex {
            id: Uuid::new_v4(),
            root_id,
            index_type: index_type.to_string(),
            created: Utc::now(),
        });
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryStore {
    async fn get_context(&self, id: Uuid) -> Result<Option<WorkspaceContext>, RepositoryError> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.workspace.id == id)
            .cloned())
    }

    async fn load_contexts(&self, ids: &[Uuid]) -> Result<Vec<WorkspaceContext>, RepositoryError> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| ids.contains(&c.workspace.id))
            .cloned()
            .collect())
    }

    async fn search_accessible(
        &self,
        requester_id: Uuid,
        filter: &WorkspaceFilter,
    ) -> Result<Vec<WorkspaceContext>, RepositoryError> {
        let shares = self.shares.lock().unwrap();
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| {
                let shared = shares
                    .iter()
                    .any(|s| s.workspace_id == c.workspace.id && s.sharee_id == requester_id);
                let visible = c.workspace.owner_id == requester_id
                    || shared
                    || (filter.public && c.root.root_type == RootType::Public);
                let name_ok = filter
                    .name
                    .as_ref()
                    .map(|n| &c.workspace.name == n)
                    .unwrap_or(true);
                let owner_ok = filter
                    .owner_id
                    .map(|o| c.workspace.owner_id == o)
                    .unwrap_or(true);
                let like_ok = filter
                    .like
                    .as_ref()
                    .map(|l| c.workspace.name.contains(l.as_str()))
                    .unwrap_or(true);
                visible && name_ok && owner_ok && like_ok
            })
            .cloned()
            .collect())
    }

    async fn list_in_root(&self, root_id: Uuid) -> Result<Vec<WorkspaceContext>, RepositoryError> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.root.id == root_id)
            .cloned()
            .collect())
    }

    async fn find_in_root(
        &self,
        root_id: Uuid,
        owner_username: &str,
        name: &str,
    ) -> Result<Option<WorkspaceContext>, RepositoryError> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .iter()
            .find(|c| {
                c.root.id == root_id && c.owner.username == owner_username && c.workspace.name == name
            })
            .cloned())
    }
}

#[async_trait]
impl ShareStore for InMemoryStore {
    async fn create(&self, share: NewShare) -> Result<Share, RepositoryError> {
        let mut shares = self.shares.lock().unwrap();
        if shares.iter().any(|s| {
            s.workspace_id == share.workspace_id
                && s.creator_id == share.creator_id
                && s.sharee_id == share.sharee_id
        }) {
            return Err(RepositoryError::AlreadyExists);
        }
        let created = Share {
            id: Uuid::new_v4(),
            workspace_id: share.workspace_id,
            creator_id: share.creator_id,
            sharee_id: share.sharee_id,
            permission: share.permission,
            expiration: share.expiration,
            created: Utc::now(),
        };
        shares.push(created.clone());
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Share>, RepositoryError> {
        Ok(self.shares.lock().unwrap().iter().find(|s| s.id == id).cloned())
    }

    async fn find_for_sharee(
        &self,
        workspace_id: Uuid,
        sharee_id: Uuid,
    ) -> Result<Option<Share>, RepositoryError> {
        Ok(self
            .shares
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.workspace_id == workspace_id && s.sharee_id == sharee_id)
            .cloned())
    }

    async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<Share>, RepositoryError> {
        Ok(self
            .shares
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Share>, RepositoryError> {
        Ok(self
            .shares
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.creator_id == user_id || s.sharee_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut shares = self.shares.lock().unwrap();
        let before = shares.len();
        shares.retain(|s| s.id != id);
        Ok(shares.len() < before)
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn find_reusable(
        &self,
        owner_id: Uuid,
        node_id: Uuid,
        workspace_ids: &[Uuid],
        root_ids: &[Uuid],
    ) -> Result<Option<S3Token>, RepositoryError> {
        let now = Utc::now();
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                let mut tw = t.workspace_ids.clone();
                tw.sort();
                let mut tr = t.root_ids.clone();
                tr.sort();
                t.owner_id == owner_id
                    && t.storage_node_id == node_id
                    && t.expiration > now
                    && tw == workspace_ids
                    && tr == root_ids
            })
            .max_by_key(|t| t.expiration)
            .cloned())
    }

    async fn create(&self, token: NewToken) -> Result<S3Token, RepositoryError> {
        let created = S3Token {
            id: Uuid::new_v4(),
            owner_id: token.owner_id,
            storage_node_id: token.storage_node_id,
            access_key_id: token.access_key_id,
            secret_access_key: token.secret_access_key,
            session_token: token.session_token,
            expiration: token.expiration,
            policy: token.policy,
            workspace_ids: token.workspace_ids,
            root_ids: token.root_ids,
            created: Utc::now(),
        };
        self.tokens.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<S3Token>, RepositoryError> {
        Ok(self.tokens.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    async fn list_for_user(&self, owner_id: Uuid) -> Result<Vec<S3Token>, RepositoryError> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|t| t.id != id);
        Ok(tokens.len() < before)
    }

    async fn delete_all_for_user(&self, owner_id: Uuid) -> Result<u64, RepositoryError> {
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|t| t.owner_id != owner_id);
        Ok((before - tokens.len()) as u64)
    }

    async fn delete_for_workspace(&self, workspace_id: Uuid) -> Result<u64, RepositoryError> {
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|t| !t.workspace_ids.contains(&workspace_id));
        Ok((before - tokens.len()) as u64)
    }
}

#[async_trait]
impl CrawlStore for InMemoryStore {
    async fn latest_round(&self, workspace_id: Uuid) -> Result<Option<CrawlRound>, RepositoryError> {
        Ok(self
            .rounds
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.workspace_id == workspace_id)
            .max_by_key(|r| r.start_time)
            .cloned())
    }

    async fn open_or_create(&self, workspace_id: Uuid) -> Result<CrawlRound, RepositoryError> {
        let mut rounds = self.rounds.lock().unwrap();
        if let Some(open) = rounds
            .iter()
            .filter(|r| r.workspace_id == workspace_id)
            .max_by_key(|r| r.start_time)
            .filter(|r| !r.succeeded)
        {
            return Ok(open.clone());
        }
        let round = CrawlRound {
            id: Uuid::new_v4(),
            workspace_id,
            start_time: Utc::now(),
            end_time: None,
            succeeded: false,
            last_indexed_key: None,
            total_objects: 0,
            total_size: 0,
            created: Utc::now(),
        };
        rounds.push(round.clone());
        Ok(round)
    }

    async fn apply_batch(
        &self,
        workspace_id: Uuid,
        added_objects: i64,
        added_size: i64,
        last_indexed_key: Option<String>,
        succeeded: bool,
    ) -> Result<Option<CrawlRound>, RepositoryError> {
        let mut rounds = self.rounds.lock().unwrap();
        let open = rounds
            .iter_mut()
            .filter(|r| r.workspace_id == workspace_id)
            .max_by_key(|r| r.start_time)
            .filter(|r| !r.succeeded);
        let Some(round) = open else {
            return Ok(None);
        };
        round.total_objects += added_objects;
        round.total_size += added_size;
        if last_indexed_key.is_some() {
            round.last_indexed_key = last_indexed_key;
        }
        if succeeded {
            round.succeeded = true;
            round.end_time = Some(Utc::now());
        }
        Ok(Some(round.clone()))
    }
}

#[async_trait]
impl RootStore for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<WorkspaceRoot>, RepositoryError> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.root.id == id)
            .map(|c| c.root.clone()))
    }

    async fn find_covering(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<(WorkspaceRoot, StorageNode)>, RepositoryError> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.root.bucket == bucket && key.starts_with(c.root.base_path.as_str()))
            .map(|c| (c.root.clone(), c.node.clone())))
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn get_for_root(&self, root_id: Uuid) -> Result<Option<RootIndex>, RepositoryError> {
        Ok(self
            .indexes
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.root_id == root_id)
            .cloned())
    }

    async fn upsert(&self, root_id: Uuid, index_type: &str) -> Result<RootIndex, RepositoryError> {
        let mut indexes = self.indexes.lock().unwrap();
        if let Some(existing) = indexes.iter().find(|i| i.root_id == root_id) {
            return Ok(existing.clone());
        }
        let index = RootIndex {
            id: Uuid::new_v4(),
            root_id,
            index_type: index_type.to_string(),
            created: Utc::now(),
        };
        indexes.push(index.clone());
        Ok(index)
    }

    async fn delete_for_root(&self, root_id: Uuid) -> Result<Option<RootIndex>, RepositoryError> {
        let mut indexes = self.indexes.lock().unwrap();
        let found = indexes.iter().find(|i| i.root_id == root_id).cloned();
        indexes.retain(|i| i.root_id != root_id);
        Ok(found)
    }

    async fn count_for_type(&self, index_type: &str) -> Result<i64, RepositoryError> {
        Ok(self
            .indexes
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.index_type == index_type)
            .count() as i64)
    }
}

/// STS double that mints deterministic credentials and counts calls.
pub struct FakeSts {
    pub calls: AtomicUsize,
}

impl FakeSts {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StsProvider for FakeSts {
    async fn assume_role(
        &self,
        _node: &StorageNode,
        session_name: &str,
        _policy_json: &str,
    ) -> Result<StsCredentials, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StsCredentials {
            access_key_id: format!("AKIA{call}"),
            secret_access_key: "secret".to_string(),
            session_token: format!("session-{session_name}"),
            expiration: Utc::now() + Duration::hours(1),
        })
    }
}

/// Search-engine double recording bulk bodies; doubles as a tiny index so
/// idempotence laws can be asserted.
#[derive(Default)]
pub struct RecordingSearchIndex {
    pub bodies: Mutex<Vec<String>>,
    pub documents: Mutex<HashMap<String, serde_json::Value>>,
}

impl RecordingSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchIndex for RecordingSearchIndex {
    async fn ensure_index(&self, _name: &str) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn delete_index(&self, _name: &str) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn bulk(&self, body: String) -> Result<(), ServiceError> {
        let mut documents = self.documents.lock().unwrap();
        let mut lines = body.lines();
        while let Some(action_line) = lines.next() {
            let action: serde_json::Value = serde_json::from_str(action_line)
                .map_err(|e| ServiceError::Upstream(format!("bad bulk action: {e}")))?;
            if let Some(update) = action.get("update") {
                let id = update["_id"].as_str().unwrap_or_default().to_string();
                let payload: serde_json::Value = lines
                    .next()
                    .and_then(|line| serde_json::from_str(line).ok())
                    .ok_or_else(|| ServiceError::Upstream("missing doc line".to_string()))?;
                documents.insert(id, payload["doc"].clone());
            } else if let Some(delete) = action.get("delete") {
                let id = delete["_id"].as_str().unwrap_or_default();
                documents.remove(id);
            }
        }
        drop(documents);
        self.bodies.lock().unwrap().push(body);
        Ok(())
    }
}
