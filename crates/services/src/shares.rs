//! Share management: explicit grants from workspace owners to other users,
//! and the permission checks derived from them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{Share, SharePermission, User};
use crate::ports::{NewShare, ShareStore, TokenStore, UserStore, WorkspaceStore};
use crate::resolver::WorkspaceResolver;

/// Create request accepting ids or names for both sharee and workspace.
#[derive(Debug, Clone)]
pub struct CreateShare {
    pub workspace_id: Option<Uuid>,
    pub workspace: Option<String>,
    pub sharee_id: Option<Uuid>,
    pub sharee: Option<String>,
    pub permission: SharePermission,
    pub expiration: Option<DateTime<Utc>>,
}

pub struct ShareService {
    users: Arc<dyn UserStore>,
    workspaces: Arc<dyn WorkspaceStore>,
    shares: Arc<dyn ShareStore>,
    tokens: Arc<dyn TokenStore>,
    resolver: Arc<WorkspaceResolver>,
}

impl ShareService {
    pub fn new(
        users: Arc<dyn UserStore>,
        workspaces: Arc<dyn WorkspaceStore>,
        shares: Arc<dyn ShareStore>,
        tokens: Arc<dyn TokenStore>,
        resolver: Arc<WorkspaceResolver>,
    ) -> Self {
        Self {
            users,
            workspaces,
            shares,
            tokens,
            resolver,
        }
    }

    pub async fn create(
        &self,
        creator: &User,
        request: CreateShare,
    ) -> Result<Share, ServiceError> {
        let sharee = match (request.sharee_id, &request.sharee) {
            (Some(id), _) => self
                .users
                .get(id)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| ServiceError::NotFound("sharee".to_string()))?,
            (None, Some(username)) => self
                .users
                .find_by_username(username)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| ServiceError::NotFound("sharee".to_string()))?,
            (None, None) => {
                return Err(ServiceError::InvalidArgument(
                    "sharee_id or sharee is required".to_string(),
                ))
            }
        };

        let workspace = match (request.workspace_id, &request.workspace) {
            (Some(id), _) => self
                .workspaces
                .get_context(id)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| ServiceError::NotFound("workspace".to_string()))?,
            (None, Some(term)) => self
                .resolver
                .resolve(creator, term)
                .await?
                .map(|(ctx, _)| ctx)
                .ok_or_else(|| ServiceError::NotFound("workspace".to_string()))?,
            (None, None) => {
                return Err(ServiceError::InvalidArgument(
                    "workspace_id or workspace is required".to_string(),
                ))
            }
        };

        // TODO: allow holders of an own-type share to delegate.
        if workspace.workspace.owner_id != creator.id {
            return Err(ServiceError::PermissionDenied(
                "Only the owner can share a workspace".to_string(),
            ));
        }

        let share = self
            .shares
            .create(NewShare {
                workspace_id: workspace.workspace.id,
                creator_id: creator.id,
                sharee_id: sharee.id,
                permission: request.permission,
                expiration: request.expiration,
            })
            .await
            .map_err(ServiceError::from)?;
        debug!(share = %share.id, workspace = %workspace.workspace.name, sharee = %sharee.username, "created share");
        Ok(share)
    }

    /// Shares where the user is creator or sharee.
    pub async fn list(&self, user: &User) -> Result<Vec<Share>, ServiceError> {
        self.shares
            .list_for_user(user.id)
            .await
            .map_err(ServiceError::from)
    }

    /// Delete a share and invalidate every cached token that depends on its
    /// workspace. Outstanding STS credentials at the object store keep
    /// working until natural expiry.
    pub async fn revoke(&self, requester: &User, share_id: Uuid) -> Result<(), ServiceError> {
        let share = self
            .shares
            .get(share_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound("share".to_string()))?;

        let workspace = self
            .workspaces
            .get_context(share.workspace_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound("workspace".to_string()))?;

        if share.creator_id != requester.id && workspace.workspace.owner_id != requester.id {
            return Err(ServiceError::PermissionDenied(
                "Only the share creator or workspace owner can revoke a share".to_string(),
            ));
        }

        let invalidated = self
            .tokens
            .delete_for_workspace(share.workspace_id)
            .await
            .map_err(ServiceError::from)?;
        debug!(share = %share_id, invalidated, "revoked share and dependent tokens");
        self.shares.delete(share_id).await.map_err(ServiceError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RootType;
    use crate::ports::{NewToken, TokenStore};
    use crate::test_utils::{context, node, root, user, InMemoryStore};

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: ShareService,
        alice: User,
        bob: User,
        workspace_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let alice = user("alice");
        let bob = user("bob");
        store.add_user(&alice);
        store.add_user(&bob);
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_context(&ctx);
        let resolver = Arc::new(WorkspaceResolver::new(store.clone(), store.clone()));
        let service = ShareService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            resolver,
        );
        Fixture {
            store,
            service,
            alice,
            bob,
            workspace_id: ctx.workspace.id,
        }
    }

    fn create_request(f: &Fixture) -> CreateShare {
        CreateShare {
            workspace_id: Some(f.workspace_id),
            workspace: None,
            sharee_id: None,
            sharee: Some("bob".to_string()),
            permission: SharePermission::Read,
            expiration: None,
        }
    }

    #[tokio::test]
    async fn owner_shares_by_username_and_duplicate_conflicts() {
        let f = fixture();
        let share = f.service.create(&f.alice, create_request(&f)).await.unwrap();
        assert_eq!(share.sharee_id, f.bob.id);
        assert_eq!(share.permission, SharePermission::Read);

        let err = f.service.create(&f.alice, create_request(&f)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn only_the_owner_may_share() {
        let f = fixture();
        let err = f.service.create(&f.bob, create_request(&f)).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn workspace_resolved_by_term() {
        let f = fixture();
        let request = CreateShare {
            workspace_id: None,
            workspace: Some("alice/photos".to_string()),
            sharee_id: Some(f.bob.id),
            sharee: None,
            permission: SharePermission::ReadWrite,
            expiration: None,
        };
        let share = f.service.create(&f.alice, request).await.unwrap();
        assert_eq!(share.workspace_id, f.workspace_id);
    }

    #[tokio::test]
    async fn missing_sharee_is_not_found() {
        let f = fixture();
        let request = CreateShare {
            workspace_id: Some(f.workspace_id),
            workspace: None,
            sharee_id: None,
            sharee: Some("nobody".to_string()),
            permission: SharePermission::Read,
            expiration: None,
        };
        let err = f.service.create(&f.alice, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_covers_both_directions() {
        let f = fixture();
        f.service.create(&f.alice, create_request(&f)).await.unwrap();
        assert_eq!(f.service.list(&f.alice).await.unwrap().len(), 1);
        assert_eq!(f.service.list(&f.bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn revoking_a_share_invalidates_dependent_tokens() {
        let f = fixture();
        let share = f.service.create(&f.alice, create_request(&f)).await.unwrap();

        // A token bob minted against the shared workspace.
        TokenStore::create(
            f.store.as_ref(),
            NewToken {
                owner_id: f.bob.id,
                storage_node_id: Uuid::new_v4(),
                access_key_id: "ak".to_string(),
                secret_access_key: "sk".to_string(),
                session_token: "st".to_string(),
                expiration: Utc::now() + chrono::Duration::hours(1),
                policy: serde_json::json!({}),
                workspace_ids: vec![f.workspace_id],
                root_ids: vec![],
            },
        )
        .await
        .unwrap();
        assert_eq!(
            TokenStore::list_for_user(f.store.as_ref(), f.bob.id)
                .await
                .unwrap()
                .len(),
            1
        );

        f.service.revoke(&f.alice, share.id).await.unwrap();
        assert!(TokenStore::list_for_user(f.store.as_ref(), f.bob.id)
            .await
            .unwrap()
            .is_empty());
        assert!(f.service.list(&f.bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_stranger_cannot_revoke() {
        let f = fixture();
        let carol = user("carol");
        f.store.add_user(&carol);
        let share = f.service.create(&f.alice, create_request(&f)).await.unwrap();
        let err = f.service.revoke(&carol, share.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }
}
