//! Resolve slash-separated search terms like `alice/photos/2024/sep.jpg`
//! into a workspace and an interior path.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{User, WorkspaceContext};
use crate::ports::{UserStore, WorkspaceFilter, WorkspaceStore};

pub struct WorkspaceResolver {
    users: Arc<dyn UserStore>,
    workspaces: Arc<dyn WorkspaceStore>,
}

impl WorkspaceResolver {
    pub fn new(users: Arc<dyn UserStore>, workspaces: Arc<dyn WorkspaceStore>) -> Self {
        Self { users, workspaces }
    }

    /// Resolve a term to `(workspace, inner_path)`.
    ///
    /// The leading component is first treated as a username guess; when
    /// that produces nothing, a hail-mary pass retries with the original
    /// leading component as the workspace name. Ambiguity is a hard error,
    /// never a fallback. A term that matches nothing resolves to `None`.
    pub async fn resolve(
        &self,
        requester: &User,
        term: &str,
    ) -> Result<Option<(WorkspaceContext, String)>, ServiceError> {
        let parts: Vec<&str> = term.split('/').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return Err(ServiceError::InvalidArgument(format!(
                "malformed search term '{term}'"
            )));
        }

        let mut owner_id: Option<Uuid> = None;
        let mut name_idx = 0usize;
        if parts.len() >= 2 {
            if let Some(owner) = self
                .users
                .find_by_username(parts[0])
                .await
                .map_err(ServiceError::from)?
            {
                owner_id = Some(owner.id);
                name_idx = 1;
            }
        }

        if let Some(found) = self
            .attempt(requester, parts[name_idx], owner_id, &parts[name_idx + 1..])
            .await?
        {
            return Ok(Some(found));
        }

        // Hail mary: the username guess was wrong, retry with the original
        // leading component as the workspace name.
        if name_idx == 1 {
            debug!(term, "retrying resolution without username guess");
            if let Some(found) = self.attempt(requester, parts[0], None, &parts[1..]).await? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    async fn attempt(
        &self,
        requester: &User,
        name: &str,
        owner_id: Option<Uuid>,
        rest: &[&str],
    ) -> Result<Option<(WorkspaceContext, String)>, ServiceError> {
        let filter = WorkspaceFilter {
            name: Some(name.to_string()),
            owner_id,
            like: None,
            public: true,
        };
        let mut matches = self
            .workspaces
            .search_accessible(requester.id, &filter)
            .await
            .map_err(ServiceError::from)?;

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some((matches.remove(0), rest.join("/")))),
            _ => Err(ServiceError::InvalidArgument(format!(
                "Multiple workspace matches for {name}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RootType, SharePermission};
    use crate::ports::NewShare;
    use crate::test_utils::{context, node, root, user, InMemoryStore};
    use crate::ports::ShareStore;

    async fn fixture() -> (Arc<InMemoryStore>, WorkspaceResolver, User, User) {
        let store = Arc::new(InMemoryStore::new());
        let alice = user("alice");
        let bob = user("bob");
        store.add_user(&alice);
        store.add_user(&bob);
        let resolver = WorkspaceResolver::new(store.clone(), store.clone());
        (store, resolver, alice, bob)
    }

    #[tokio::test]
    async fn resolves_owner_name_and_inner_path() {
        let (store, resolver, alice, _) = fixture().await;
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        store.add_context(&context(&n, &r, &alice, "photos", None));

        let (ctx, path) = resolver
            .resolve(&alice, "alice/photos/2024/sep.jpg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.workspace.name, "photos");
        assert_eq!(path, "2024/sep.jpg");
    }

    #[tokio::test]
    async fn hail_mary_retries_when_username_guess_is_wrong() {
        let (store, resolver, alice, _) = fixture().await;
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        // A workspace named like a username: the first pass treats "alice"
        // as the owner, finds nothing called "shared", then retries with
        // "alice" as the workspace name.
        store.add_context(&context(&n, &r, &alice, "alice", None));

        let (ctx, path) = resolver
            .resolve(&alice, "alice/shared/file.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.workspace.name, "alice");
        assert_eq!(path, "shared/file.txt");
    }

    #[tokio::test]
    async fn ambiguous_matches_are_a_hard_error() {
        let (store, resolver, alice, bob) = fixture().await;
        let carol = user("carol");
        store.add_user(&carol);
        let n = node(&alice);
        let pub_root = root(&n, RootType::Public, "b", "");
        store.add_context(&context(&n, &pub_root, &alice, "photos", None));
        store.add_context(&context(&n, &pub_root, &bob, "photos", None));

        let err = resolver.resolve(&carol, "photos").await.unwrap_err();
        match err {
            ServiceError::InvalidArgument(msg) => {
                assert!(msg.contains("Multiple workspace matches for photos"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sharee_sees_shared_workspace() {
        let (store, resolver, alice, bob) = fixture().await;
        let n = node(&alice);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
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

        let resolved = resolver.resolve(&bob, "alice/photos").await.unwrap();
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn unknown_term_resolves_to_none() {
        let (_, resolver, alice, _) = fixture().await;
        assert!(resolver.resolve(&alice, "nothing/here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_term_is_invalid() {
        let (_, resolver, alice, _) = fixture().await;
        assert!(matches!(
            resolver.resolve(&alice, "///").await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }
}
