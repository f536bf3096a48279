//! Crawl coordination: the resumable, round-based pull side of indexing.
//!
//! A round is the unit of work for pulling a workspace's object inventory
//! into the index. The client drives listing; the broker owns round state
//! and the bulk submission.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::index::{encode_bulk, path_parts, BulkOp, IndexDocument, MediaMetadata};
use crate::keys::{object_primary_key, workspace_key};
use crate::models::{CrawlRound, User, WorkspaceContext};
use crate::ports::{CrawlStore, IndexStore, SearchIndex, ShareStore, WorkspaceStore};

/// One listed object in a crawl batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlObject {
    pub time: DateTime<Utc>,
    pub size: i64,
    #[serde(rename = "eTag", default)]
    pub e_tag: Option<String>,
    pub path: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub media: Option<MediaMetadata>,
}

/// A batch of listed objects, tagged with the resume key. `succeeded` is
/// true only on the final batch and closes the round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlBatch {
    pub documents: Vec<CrawlObject>,
    #[serde(default)]
    pub last_indexed_key: Option<String>,
    #[serde(default)]
    pub succeeded: bool,
}

pub struct CrawlService {
    workspaces: Arc<dyn WorkspaceStore>,
    shares: Arc<dyn ShareStore>,
    crawls: Arc<dyn CrawlStore>,
    indexes: Arc<dyn IndexStore>,
    search: Arc<dyn SearchIndex>,
}

impl CrawlService {
    pub fn new(
        workspaces: Arc<dyn WorkspaceStore>,
        shares: Arc<dyn ShareStore>,
        crawls: Arc<dyn CrawlStore>,
        indexes: Arc<dyn IndexStore>,
        search: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            workspaces,
            shares,
            crawls,
            indexes,
            search,
        }
    }

    async fn operator_context(
        &self,
        requester: &User,
        workspace_id: Uuid,
    ) -> Result<WorkspaceContext, ServiceError> {
        let ctx = self
            .workspaces
            .get_context(workspace_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound("workspace".to_string()))?;
        if ctx.node.creator_id != requester.id {
            return Err(ServiceError::PermissionDenied(
                "User must be node operator to index".to_string(),
            ));
        }
        Ok(ctx)
    }

    /// Open a new round, or return the existing open round together with
    /// its resume point. A crash or disconnect leaves the round open, so
    /// the next call resumes where the listing stopped.
    pub async fn create_round(
        &self,
        requester: &User,
        workspace_id: Uuid,
    ) -> Result<CrawlRound, ServiceError> {
        self.operator_context(requester, workspace_id).await?;
        let round = self
            .crawls
            .open_or_create(workspace_id)
            .await
            .map_err(ServiceError::from)?;
        debug!(round = %round.id, workspace = %workspace_id, resume = ?round.last_indexed_key, "crawl round");
        Ok(round)
    }

    /// Ingest one batch: bulk-upsert the documents, fold the totals into
    /// the round, record the resume key, and close the round when the
    /// batch is final.
    pub async fn bulk_ingest(
        &self,
        requester: &User,
        workspace_id: Uuid,
        batch: CrawlBatch,
    ) -> Result<CrawlRound, ServiceError> {
        let ctx = self.operator_context(requester, workspace_id).await?;

        let index = self
            .indexes
            .get_for_root(ctx.root.id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| {
                ServiceError::InvalidArgument(format!(
                    "index does not exist for workspace {}::{}",
                    ctx.workspace.name, ctx.workspace.id
                ))
            })?;

        let open = self
            .crawls
            .latest_round(workspace_id)
            .await
            .map_err(ServiceError::from)?;
        if !open.map(|r| r.is_open()).unwrap_or(false) {
            return Err(ServiceError::ConflictingState(
                "no open crawl round for workspace".to_string(),
            ));
        }

        let prefix = workspace_key(&ctx.workspace, &ctx.owner.username, &ctx.root)?;
        let user_shares: Vec<Uuid> = self
            .shares
            .list_for_workspace(ctx.workspace.id)
            .await
            .map_err(ServiceError::from)?
            .into_iter()
            .map(|share| share.sharee_id)
            .collect();

        let mut added_size: i64 = 0;
        let mut ops = Vec::with_capacity(batch.documents.len());
        for object in &batch.documents {
            added_size += object.size;
            let (filename, extension) = path_parts(&object.path);
            let id = object_primary_key(&ctx.node.api_url, &ctx.root.bucket, &prefix, &object.path);
            let doc = IndexDocument {
                time: object.time,
                size: object.size,
                e_tag: object.e_tag.clone().unwrap_or_default(),
                extension,
                content_type: object.content_type.clone(),
                text: object.path.clone(),
                workspace_id: ctx.workspace.id,
                workspace_name: ctx.workspace.name.clone(),
                owner_id: ctx.owner.id,
                owner_name: ctx.owner.username.clone(),
                root_id: ctx.root.id,
                bucket: ctx.root.bucket.clone(),
                server: ctx.node.api_url.clone(),
                root: prefix.clone(),
                path: object.path.clone(),
                filename,
                user_shares: user_shares.clone(),
                media: object.media.clone().unwrap_or_default(),
            };
            ops.push(BulkOp::Upsert {
                id,
                doc: Box::new(doc),
            });
        }

        if !ops.is_empty() {
            self.search.bulk(encode_bulk(&index.index_type, &ops)).await?;
        }

        let added_objects = batch.documents.len() as i64;
        let round = self
            .crawls
            .apply_batch(
                workspace_id,
                added_objects,
                added_size,
                batch.last_indexed_key.clone(),
                batch.succeeded,
            )
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| {
                // The round closed between our check and the update.
                ServiceError::ConflictingState("no open crawl round for workspace".to_string())
            })?;
        debug!(
            round = %round.id,
            objects = round.total_objects,
            size = round.total_size,
            closed = round.succeeded,
            "crawl batch applied"
        );
        Ok(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RootType;
    use crate::test_utils::{context, node, root, user, InMemoryStore, RecordingSearchIndex};

    struct Fixture {
        store: Arc<InMemoryStore>,
        search: Arc<RecordingSearchIndex>,
        service: CrawlService,
        operator: User,
        workspace_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(RecordingSearchIndex::new());
        let operator = user("op");
        let n = node(&operator);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &operator, "photos", None);
        store.add_user(&operator);
        store.add_context(&ctx);
        store.add_index(r.id, "default");
        let service = CrawlService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            search.clone(),
        );
        Fixture {
            store,
            search,
            service,
            operator,
            workspace_id: ctx.workspace.id,
        }
    }

    fn object(path: &str, size: i64) -> CrawlObject {
        CrawlObject {
            time: Utc::now(),
            size,
            e_tag: Some("etag".to_string()),
            path: path.to_string(),
            content_type: None,
            media: None,
        }
    }

    #[tokio::test]
    async fn create_round_twice_returns_the_same_round() {
        let f = fixture();
        let first = f.service.create_round(&f.operator, f.workspace_id).await.unwrap();
        let second = f.service.create_round(&f.operator, f.workspace_id).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn only_the_node_operator_may_crawl() {
        let f = fixture();
        let stranger = user("stranger");
        f.store.add_user(&stranger);
        let err = f
            .service
            .create_round(&stranger, f.workspace_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn batches_accumulate_then_close_the_round() {
        let f = fixture();
        let round = f.service.create_round(&f.operator, f.workspace_id).await.unwrap();

        let mid = f
            .service
            .bulk_ingest(
                &f.operator,
                f.workspace_id,
                CrawlBatch {
                    documents: vec![object("a/b/c", 10), object("a/b/d", 20)],
                    last_indexed_key: Some("a/b/d".to_string()),
                    succeeded: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(mid.id, round.id);
        assert_eq!(mid.total_objects, 2);
        assert_eq!(mid.total_size, 30);
        assert_eq!(mid.last_indexed_key.as_deref(), Some("a/b/d"));
        assert!(mid.is_open());

        let closed = f
            .service
            .bulk_ingest(
                &f.operator,
                f.workspace_id,
                CrawlBatch {
                    documents: vec![object("a/b/e", 5)],
                    last_indexed_key: Some("a/b/e".to_string()),
                    succeeded: true,
                },
            )
            .await
            .unwrap();
        assert!(closed.succeeded);
        assert!(closed.end_time.is_some());
        assert_eq!(closed.total_objects, 3);
        assert_eq!(f.search.document_count(), 3);

        // A closed round rejects further batches.
        let err = f
            .service
            .bulk_ingest(
                &f.operator,
                f.workspace_id,
                CrawlBatch {
                    documents: vec![object("late", 1)],
                    last_indexed_key: None,
                    succeeded: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConflictingState(_)));
    }

    #[tokio::test]
    async fn resume_point_survives_an_interrupted_round() {
        let f = fixture();
        f.service.create_round(&f.operator, f.workspace_id).await.unwrap();
        f.service
            .bulk_ingest(
                &f.operator,
                f.workspace_id,
                CrawlBatch {
                    documents: vec![object("a/b/c", 1)],
                    last_indexed_key: Some("a/b/c".to_string()),
                    succeeded: false,
                },
            )
            .await
            .unwrap();

        // Client disconnects; the next create_round resumes.
        let resumed = f.service.create_round(&f.operator, f.workspace_id).await.unwrap();
        assert_eq!(resumed.last_indexed_key.as_deref(), Some("a/b/c"));

        f.service
            .bulk_ingest(
                &f.operator,
                f.workspace_id,
                CrawlBatch {
                    documents: vec![],
                    last_indexed_key: None,
                    succeeded: true,
                },
            )
            .await
            .unwrap();

        // With the latest round closed, a fresh round starts clean.
        let fresh = f.service.create_round(&f.operator, f.workspace_id).await.unwrap();
        assert_ne!(fresh.id, resumed.id);
        assert!(fresh.last_indexed_key.is_none());
    }

    #[tokio::test]
    async fn upserting_the_same_listing_twice_is_idempotent() {
        let f = fixture();
        f.service.create_round(&f.operator, f.workspace_id).await.unwrap();
        let batch = CrawlBatch {
            documents: vec![object("a/b/c", 1)],
            last_indexed_key: Some("a/b/c".to_string()),
            succeeded: false,
        };
        f.service
            .bulk_ingest(&f.operator, f.workspace_id, batch.clone())
            .await
            .unwrap();
        f.service
            .bulk_ingest(&f.operator, f.workspace_id, batch)
            .await
            .unwrap();
        assert_eq!(f.search.document_count(), 1);
    }

    #[tokio::test]
    async fn bulk_without_root_index_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(RecordingSearchIndex::new());
        let operator = user("op");
        let n = node(&operator);
        let r = root(&n, RootType::Private, "b", "");
        let ctx = context(&n, &r, &operator, "photos", None);
        store.add_user(&operator);
        store.add_context(&ctx);
        let service = CrawlService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            search,
        );
        service.create_round(&operator, ctx.workspace.id).await.unwrap();
        let err = service
            .bulk_ingest(
                &operator,
                ctx.workspace.id,
                CrawlBatch {
                    documents: vec![object("x", 1)],
                    last_indexed_key: None,
                    succeeded: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }
}
