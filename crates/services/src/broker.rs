//! Credential broker: group requested workspaces by node, segment them by
//! the requester's relationship, reuse or mint one STS token per node, and
//! persist the binding.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{RootType, S3Token, Share, StorageNode, User, WorkspaceContext};
use crate::policy;
use crate::ports::{NewToken, ShareStore, StsProvider, TokenStore, WorkspaceStore};
use crate::resolver::WorkspaceResolver;
use crate::RepositoryError;

/// A minted or reused token together with the node it is valid on.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: S3Token,
    pub node: StorageNode,
}

/// One resolved search term.
#[derive(Debug, Clone)]
pub struct TermMatch {
    pub workspace: WorkspaceContext,
    pub path: String,
}

#[derive(Debug)]
pub struct TokenSearchOutcome {
    pub tokens: Vec<IssuedToken>,
    pub workspaces: HashMap<String, TermMatch>,
}

/// The per-node segmentation of a workspace constellation.
struct Segments {
    mine: Vec<WorkspaceContext>,
    foreign: Vec<(WorkspaceContext, Option<Share>)>,
}

pub struct CredentialBroker {
    workspaces: Arc<dyn WorkspaceStore>,
    shares: Arc<dyn ShareStore>,
    tokens: Arc<dyn TokenStore>,
    sts: Arc<dyn StsProvider>,
    resolver: Arc<WorkspaceResolver>,
}

impl CredentialBroker {
    pub fn new(
        workspaces: Arc<dyn WorkspaceStore>,
        shares: Arc<dyn ShareStore>,
        tokens: Arc<dyn TokenStore>,
        sts: Arc<dyn StsProvider>,
        resolver: Arc<WorkspaceResolver>,
    ) -> Self {
        Self {
            workspaces,
            shares,
            tokens,
            sts,
            resolver,
        }
    }

    /// Issue one token per storage node covering the requested workspaces.
    pub async fn issue(
        &self,
        requester: &User,
        workspace_ids: &[Uuid],
    ) -> Result<Vec<IssuedToken>, ServiceError> {
        let contexts = self
            .workspaces
            .load_contexts(workspace_ids)
            .await
            .map_err(ServiceError::from)?;
        if contexts.len() != workspace_ids.iter().collect::<BTreeSet<_>>().len() {
            return Err(ServiceError::NotFound("workspace".to_string()));
        }

        let mut by_node: BTreeMap<Uuid, Vec<WorkspaceContext>> = BTreeMap::new();
        for ctx in contexts {
            by_node.entry(ctx.node.id).or_default().push(ctx);
        }

        let mut issued = Vec::with_capacity(by_node.len());
        for (node_id, group) in by_node {
            let node = group[0].node.clone();
            let segments = self.segment(requester, group).await?;
            let token = self.reuse_or_mint(requester, &node, node_id, segments).await?;
            issued.push(IssuedToken { token, node });
        }
        Ok(issued)
    }

    /// Sort workspaces into the "mine" segment (owned or public) and the
    /// foreign segment (reached through a share). Owner-held unmanaged
    /// workspaces need explicit prefix handling, so they travel as foreign
    /// with no share. Anything else is a permission error.
    async fn segment(
        &self,
        requester: &User,
        group: Vec<WorkspaceContext>,
    ) -> Result<Segments, ServiceError> {
        let mut mine = Vec::new();
        let mut foreign = Vec::new();
        let now = Utc::now();

        for ctx in group {
            let owned = ctx.workspace.owner_id == requester.id;
            if owned && ctx.root.root_type == RootType::Unmanaged {
                foreign.push((ctx, None));
            } else if owned {
                mine.push(ctx);
            } else {
                let share = self
                    .shares
                    .find_for_sharee(ctx.workspace.id, requester.id)
                    .await
                    .map_err(ServiceError::from)?
                    .filter(|s| s.expiration.map(|exp| exp > now).unwrap_or(true));
                if let Some(share) = share {
                    foreign.push((ctx, Some(share)));
                } else if ctx.root.root_type == RootType::Public {
                    mine.push(ctx);
                } else {
                    return Err(ServiceError::PermissionDenied(format!(
                        "User {} is not permitted to access {}",
                        requester.username, ctx.workspace.name
                    )));
                }
            }
        }
        Ok(Segments { mine, foreign })
    }

    async fn reuse_or_mint(
        &self,
        requester: &User,
        node: &StorageNode,
        node_id: Uuid,
        segments: Segments,
    ) -> Result<S3Token, ServiceError> {
        let foreign_ids: Vec<Uuid> = {
            let mut ids: Vec<Uuid> = segments
                .foreign
                .iter()
                .map(|(ctx, _)| ctx.workspace.id)
                .collect();
            ids.sort();
            ids.dedup();
            ids
        };
        let root_ids: Vec<Uuid> = {
            let mut ids: Vec<Uuid> = segments.mine.iter().map(|ctx| ctx.root.id).collect();
            ids.sort();
            ids.dedup();
            ids
        };

        if let Some(existing) = self
            .tokens
            .find_reusable(requester.id, node_id, &foreign_ids, &root_ids)
            .await
            .map_err(ServiceError::from)?
        {
            debug!(token = %existing.id, node = %node.name, "reusing existing token");
            return Ok(existing);
        }

        let policy_doc = policy::synthesize(requester, &segments.mine, &segments.foreign)?;
        let policy_json = serde_json::to_string(&policy_doc)
            .map_err(|e| ServiceError::Internal(format!("policy serialization: {e}")))?;

        let credentials = self
            .sts
            .assume_role(node, &requester.id.to_string(), &policy_json)
            .await?;

        let workspace_ids: Vec<Uuid> = foreign_ids;
        let new_token = NewToken {
            owner_id: requester.id,
            storage_node_id: node_id,
            access_key_id: credentials.access_key_id,
            secret_access_key: credentials.secret_access_key,
            session_token: credentials.session_token,
            expiration: credentials.expiration,
            policy: serde_json::to_value(&policy_doc)
                .map_err(|e| ServiceError::Internal(format!("policy serialization: {e}")))?,
            workspace_ids: workspace_ids.clone(),
            root_ids: root_ids.clone(),
        };

        match self.tokens.create(new_token).await {
            Ok(token) => {
                debug!(token = %token.id, node = %node.name, "minted token");
                Ok(token)
            }
            // Lost a race against a concurrent mint for the same
            // constellation: the committed token wins, fetch it.
            Err(RepositoryError::AlreadyExists) => self
                .tokens
                .find_reusable(requester.id, node_id, &workspace_ids, &root_ids)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| {
                    ServiceError::Internal("token vanished after duplicate insert".to_string())
                }),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a token from the database. Credentials already issued by the
    /// object store keep working until they expire naturally.
    pub async fn revoke(&self, requester: &User, token_id: Uuid) -> Result<(), ServiceError> {
        let token = self
            .tokens
            .get(token_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound("token".to_string()))?;
        if token.owner_id != requester.id {
            return Err(ServiceError::PermissionDenied(
                "Only the owner can revoke a token".to_string(),
            ));
        }
        self.tokens.delete(token_id).await.map_err(ServiceError::from)?;
        Ok(())
    }

    /// Delete every token owned by the user, returning the count.
    pub async fn revoke_all(&self, requester: &User) -> Result<u64, ServiceError> {
        self.tokens
            .delete_all_for_user(requester.id)
            .await
            .map_err(ServiceError::from)
    }

    pub async fn list(&self, requester: &User) -> Result<Vec<S3Token>, ServiceError> {
        self.tokens
            .list_for_user(requester.id)
            .await
            .map_err(ServiceError::from)
    }

    /// Resolve search terms, then issue tokens for the union of matched
    /// workspaces. Terms that match nothing (flags, local paths) are left
    /// out of the map rather than failing the whole request.
    pub async fn search_tokens(
        &self,
        requester: &User,
        terms: &[String],
    ) -> Result<TokenSearchOutcome, ServiceError> {
        let mut matches: HashMap<String, TermMatch> = HashMap::new();
        let mut ids: Vec<Uuid> = Vec::new();

        for term in terms {
            if let Some((ctx, path)) = self.resolver.resolve(requester, term).await? {
                if !ids.contains(&ctx.workspace.id) {
                    ids.push(ctx.workspace.id);
                }
                matches.insert(
                    term.clone(),
                    TermMatch {
                        workspace: ctx,
                        path,
                    },
                );
            }
        }

        let tokens = if ids.is_empty() {
            Vec::new()
        } else {
            self.issue(requester, &ids).await?
        };

        Ok(TokenSearchOutcome {
            tokens,
            workspaces: matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SharePermission;
    use crate::ports::NewShare;
    use crate::test_utils::{context, node, root, user, FakeSts, InMemoryStore};
    use std::sync::atomic::Ordering;

    fn broker_with(store: Arc<InMemoryStore>, sts: Arc<FakeSts>) -> CredentialBroker {
        let resolver = Arc::new(WorkspaceResolver::new(store.clone(), store.clone()));
        CredentialBroker::new(store.clone(), store.clone(), store, sts, resolver)
    }

    #[tokio::test]
    async fn private_workspace_happy_path() {
        let store = Arc::new(InMemoryStore::new());
        let sts = Arc::new(FakeSts::new());
        let alice = user("alice");
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_context(&ctx);

        let broker = broker_with(store, sts);
        let issued = broker.issue(&alice, &[ctx.workspace.id]).await.unwrap();
        assert_eq!(issued.len(), 1);
        let token = &issued[0].token;
        assert!(token.expiration > Utc::now());
        assert_eq!(token.root_ids, vec![r.id]);
        assert!(token.workspace_ids.is_empty());

        let policy = serde_json::to_string(&token.policy).unwrap();
        assert!(policy.contains("arn:aws:s3:::b/alice/*"));
        assert!(!policy.contains("bob"));
    }

    #[tokio::test]
    async fn token_reuse_skips_second_sts_call() {
        let store = Arc::new(InMemoryStore::new());
        let sts = Arc::new(FakeSts::new());
        let alice = user("alice");
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_context(&ctx);

        let broker = broker_with(store, sts.clone());
        let first = broker.issue(&alice, &[ctx.workspace.id]).await.unwrap();
        let second = broker.issue(&alice, &[ctx.workspace.id]).await.unwrap();
        assert_eq!(
            first[0].token.access_key_id,
            second[0].token.access_key_id
        );
        assert_eq!(sts.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn foreign_workspace_without_share_is_denied() {
        let store = Arc::new(InMemoryStore::new());
        let sts = Arc::new(FakeSts::new());
        let alice = user("alice");
        let bob = user("bob");
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_user(&bob);
        store.add_context(&ctx);

        let broker = broker_with(store, sts);
        let err = broker.issue(&bob, &[ctx.workspace.id]).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn shared_workspace_issues_scoped_read_token() {
        let store = Arc::new(InMemoryStore::new());
        let sts = Arc::new(FakeSts::new());
        let alice = user("alice");
        let bob = user("bob");
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_user(&bob);
        store.add_context(&ctx);
        ShareStore::create(
            store.as_ref(),
            NewShare {
                workspace_id: ctx.workspace.id,
                creator_id: alice.id,
                sharee_id: bob.id,
                permission: SharePermission::Read,
                expiration: None,
            },
        )
        .await
        .unwrap();

        let broker = broker_with(store, sts);
        let outcome = broker
            .search_tokens(&bob, &["alice/photos/sep.jpg".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.tokens.len(), 1);
        let matched = &outcome.workspaces["alice/photos/sep.jpg"];
        assert_eq!(matched.workspace.workspace.name, "photos");
        assert_eq!(matched.path, "sep.jpg");

        let policy = serde_json::to_string(&outcome.tokens[0].token.policy).unwrap();
        assert!(policy.contains("s3:GetObject"));
        assert!(policy.contains("arn:aws:s3:::b/alice/photos/*"));
        assert!(!policy.contains("s3:PutObject"));
    }

    #[tokio::test]
    async fn constellations_spanning_nodes_get_one_token_each() {
        let store = Arc::new(InMemoryStore::new());
        let sts = Arc::new(FakeSts::new());
        let alice = user("alice");
        let n1 = node(&alice);
        let n2 = node(&alice);
        let r1 = root(&n1, RootType::Private, "b1", "");
        let r2 = root(&n2, RootType::Private, "b2", "");
        let c1 = context(&n1, &r1, &alice, "photos", None);
        let c2 = context(&n2, &r2, &alice, "scans", None);
        store.add_user(&alice);
        store.add_context(&c1);
        store.add_context(&c2);

        let broker = broker_with(store, sts.clone());
        let issued = broker
            .issue(&alice, &[c1.workspace.id, c2.workspace.id])
            .await
            .unwrap();
        assert_eq!(issued.len(), 2);
        assert_eq!(sts.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn revoke_deletes_only_own_tokens() {
        let store = Arc::new(InMemoryStore::new());
        let sts = Arc::new(FakeSts::new());
        let alice = user("alice");
        let bob = user("bob");
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_user(&bob);
        store.add_context(&ctx);

        let broker = broker_with(store, sts);
        let issued = broker.issue(&alice, &[ctx.workspace.id]).await.unwrap();
        let token_id = issued[0].token.id;

        let err = broker.revoke(&bob, token_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
        broker.revoke(&alice, token_id).await.unwrap();
        assert!(broker.list(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_workspace_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let sts = Arc::new(FakeSts::new());
        let alice = user("alice");
        store.add_user(&alice);
        let broker = broker_with(store, sts);
        let err = broker.issue(&alice, &[Uuid::new_v4()]).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
