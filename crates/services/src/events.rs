//! Push ingest: parse object-store bucket notifications, derive the owning
//! workspace, and emit bulk index operations.
//!
//! MinIO is slightly inconsistent with AWS in its notification schema;
//! the payload types here accept both.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::index::{encode_bulk, path_parts, BulkOp, IndexDocument, MediaMetadata};
use crate::keys::{join_prefix, object_primary_key};
use crate::models::{RootType, StorageNode, WorkspaceContext, WorkspaceRoot};
use crate::ports::{IndexStore, RootStore, SearchIndex, ShareStore, WorkspaceStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventUserIdentity {
    #[serde(rename = "principalId")]
    pub principal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventObject {
    pub key: String,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(rename = "eTag", default)]
    pub e_tag: Option<String>,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntity {
    pub bucket: EventBucket,
    pub object: EventObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(rename = "eventTime")]
    pub event_time: DateTime<Utc>,
    #[serde(rename = "userIdentity", default)]
    pub user_identity: Option<EventUserIdentity>,
    pub s3: EventEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketEventNotification {
    #[serde(rename = "Records")]
    pub records: Vec<EventRecord>,
    #[serde(rename = "EventName", default)]
    pub event_name: Option<String>,
    #[serde(rename = "Key", default)]
    pub key: Option<String>,
}

const CREATED_EVENTS: [&str; 3] = [
    "s3:ObjectCreated:Put",
    "s3:ObjectCreated:Post",
    "s3:ObjectCreated:Copy",
];
const REMOVED_EVENT: &str = "s3:ObjectRemoved:Delete";

pub struct EventService {
    roots: Arc<dyn RootStore>,
    workspaces: Arc<dyn WorkspaceStore>,
    shares: Arc<dyn ShareStore>,
    indexes: Arc<dyn IndexStore>,
    search: Arc<dyn SearchIndex>,
}

impl EventService {
    pub fn new(
        roots: Arc<dyn RootStore>,
        workspaces: Arc<dyn WorkspaceStore>,
        shares: Arc<dyn ShareStore>,
        indexes: Arc<dyn IndexStore>,
        search: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            roots,
            workspaces,
            shares,
            indexes,
            search,
        }
    }

    /// Apply one notification payload. Records are applied in array order
    /// and submitted as a single bulk call; upserts and deletes are
    /// idempotent because ids are content-derived.
    pub async fn handle(&self, event: BucketEventNotification) -> Result<(), ServiceError> {
        let mut index_type: Option<String> = None;
        let mut ops: Vec<BulkOp> = Vec::with_capacity(event.records.len());

        for record in &event.records {
            let key = urlencoding::decode(&record.s3.object.key)
                .map_err(|e| ServiceError::InvalidArgument(format!("undecodable key: {e}")))?
                .into_owned();
            let bucket = &record.s3.bucket.name;

            let (root, node) = self
                .roots
                .find_covering(bucket, &key)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| {
                    ServiceError::InvalidArgument(format!("no index for object {key}"))
                })?;

            let index = self
                .indexes
                .get_for_root(root.id)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| {
                    ServiceError::InvalidArgument(format!("no index for object {key}"))
                })?;
            // One payload never spans buckets with different index types.
            let index_name = index.index_type.clone();
            index_type.get_or_insert(index_name);

            let (ctx, workspace_prefix, inner_path) = self.derive_workspace(&root, &key).await?;

            let id = object_primary_key(&node.api_url, bucket, &workspace_prefix, &inner_path);

            if CREATED_EVENTS.contains(&record.event_name.as_str()) {
                let doc = self
                    .build_document(record, &ctx, &node, &workspace_prefix, &inner_path)
                    .await?;
                ops.push(BulkOp::Upsert {
                    id,
                    doc: Box::new(doc),
                });
            } else if record.event_name == REMOVED_EVENT {
                ops.push(BulkOp::Delete { id });
            } else {
                return Err(ServiceError::InvalidArgument(format!(
                    "Bucket notification type unsupported: {}",
                    record.event_name
                )));
            }
        }

        if let Some(index) = index_type {
            debug!(index = %index, ops = ops.len(), "submitting bucket-event bulk");
            self.search.bulk(encode_bulk(&index, &ops)).await?;
        }
        Ok(())
    }

    /// Resolve the workspace an object key belongs to, returning its
    /// context, the workspace prefix within the bucket, and the inner path.
    async fn derive_workspace(
        &self,
        root: &WorkspaceRoot,
        key: &str,
    ) -> Result<(WorkspaceContext, String, String), ServiceError> {
        let relative = key
            .strip_prefix(root.base_path.as_str())
            .unwrap_or(key)
            .trim_start_matches('/');

        if root.root_type == RootType::Unmanaged {
            // The workspace whose base_path is the longest prefix of the
            // key inside the root.
            let candidates = self
                .workspaces
                .list_in_root(root.id)
                .await
                .map_err(ServiceError::from)?;
            let mut best: Option<(WorkspaceContext, String)> = None;
            for ctx in candidates {
                let Some(base_path) = ctx.workspace.base_path.clone() else {
                    continue;
                };
                let prefix = base_path.trim_matches('/');
                // Prefix match on a path-segment boundary only.
                let covers = relative == prefix
                    || (relative.starts_with(prefix)
                        && relative.as_bytes().get(prefix.len()) == Some(&b'/'));
                if covers
                    && best
                        .as_ref()
                        .map(|(_, b)| prefix.len() > b.len())
                        .unwrap_or(true)
                {
                    best = Some((ctx, prefix.to_string()));
                }
            }
            let (ctx, base_path) = best.ok_or_else(|| {
                ServiceError::InvalidArgument(format!("no workspace found for object {key}"))
            })?;
            let inner_path = relative[base_path.len()..]
                .trim_start_matches('/')
                .to_string();
            let prefix = join_prefix(&[&root.base_path, &base_path]);
            Ok((ctx, prefix, inner_path))
        } else {
            // Managed layout: {scope}/{user}/{workspace}/{inner...}
            let parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
            if parts.len() < 3 {
                return Err(ServiceError::InvalidArgument(format!(
                    "no workspace found for object {key}"
                )));
            }
            let (scope, user_name, workspace_name) = (parts[0], parts[1], parts[2]);
            let inner_path = parts[3..].join("/");
            let ctx = self
                .workspaces
                .find_in_root(root.id, user_name, workspace_name)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| {
                    ServiceError::InvalidArgument(format!("no workspace found for object {key}"))
                })?;
            let prefix = join_prefix(&[&root.base_path, scope, user_name, workspace_name]);
            Ok((ctx, prefix, inner_path))
        }
    }

    async fn build_document(
        &self,
        record: &EventRecord,
        ctx: &WorkspaceContext,
        node: &StorageNode,
        workspace_prefix: &str,
        inner_path: &str,
    ) -> Result<IndexDocument, ServiceError> {
        let user_shares: Vec<Uuid> = self
            .shares
            .list_for_workspace(ctx.workspace.id)
            .await
            .map_err(ServiceError::from)?
            .into_iter()
            .map(|share| share.sharee_id)
            .collect();
        let (filename, extension) = path_parts(inner_path);

        Ok(IndexDocument {
            time: record.event_time,
            size: record.s3.object.size.unwrap_or(0),
            e_tag: record.s3.object.e_tag.clone().unwrap_or_default(),
            extension,
            content_type: record.s3.object.content_type.clone(),
            text: inner_path.to_string(),
            workspace_id: ctx.workspace.id,
            workspace_name: ctx.workspace.name.clone(),
            owner_id: ctx.owner.id,
            owner_name: ctx.owner.username.clone(),
            root_id: ctx.root.id,
            bucket: ctx.root.bucket.clone(),
            server: node.api_url.clone(),
            root: workspace_prefix.to_string(),
            path: inner_path.to_string(),
            filename,
            user_shares,
            media: MediaMetadata::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::object_primary_key;
    use crate::test_utils::{context, node, root, user, InMemoryStore, RecordingSearchIndex};

    fn service(store: Arc<InMemoryStore>, search: Arc<RecordingSearchIndex>) -> EventService {
        EventService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            search,
        )
    }

    fn notification(event_name: &str, bucket: &str, key: &str, size: i64) -> BucketEventNotification {
        serde_json::from_value(serde_json::json!({
            "Records": [{
                "eventName": event_name,
                "eventTime": "2024-09-30T00:12:42.220Z",
                "userIdentity": {"principalId": "SGEQ"},
                "s3": {
                    "bucket": {"name": bucket},
                    "object": {"key": key, "size": size, "eTag": "bea5"}
                }
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn put_event_upserts_with_content_derived_id() {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(RecordingSearchIndex::new());
        let alice = user("alice");
        let n = node(&alice);
        let r = root(&n, RootType::Public, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_context(&ctx);
        store.add_index(r.id, "default");

        let svc = service(store, search.clone());
        svc.handle(notification(
            "s3:ObjectCreated:Put",
            "b",
            "public%2Falice%2Fphotos%2FREADME.md",
            5892,
        ))
        .await
        .unwrap();

        let expected_id =
            object_primary_key("http://minio:9000", "b", "public/alice/photos", "README.md");
        let documents = search.documents.lock().unwrap();
        let doc = documents.get(&expected_id).expect("document indexed");
        assert_eq!(doc["path"], "README.md");
        assert_eq!(doc["owner_name"], "alice");
        assert_eq!(doc["workspace_name"], "photos");
        assert_eq!(doc["root"], "public/alice/photos");
        assert_eq!(doc["size"], 5892);
    }

    #[tokio::test]
    async fn delete_event_removes_the_document_idempotently() {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(RecordingSearchIndex::new());
        let alice = user("alice");
        let n = node(&alice);
        let r = root(&n, RootType::Public, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_context(&ctx);
        store.add_index(r.id, "default");

        let svc = service(store, search.clone());
        let key = "public/alice/photos/README.md";
        svc.handle(notification("s3:ObjectCreated:Put", "b", key, 1))
            .await
            .unwrap();
        assert_eq!(search.document_count(), 1);

        svc.handle(notification("s3:ObjectRemoved:Delete", "b", key, 0))
            .await
            .unwrap();
        assert_eq!(search.document_count(), 0);

        // Deleting again is a no-op, not an error.
        svc.handle(notification("s3:ObjectRemoved:Delete", "b", key, 0))
            .await
            .unwrap();
        assert_eq!(search.document_count(), 0);
    }

    #[tokio::test]
    async fn unsupported_event_type_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(RecordingSearchIndex::new());
        let alice = user("alice");
        let n = node(&alice);
        let r = root(&n, RootType::Public, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_context(&ctx);
        store.add_index(r.id, "default");

        let svc = service(store, search);
        let err = svc
            .handle(notification(
                "s3:ObjectAccessed:Get",
                "b",
                "public/alice/photos/README.md",
                1,
            ))
            .await
            .unwrap_err();
        match err {
            ServiceError::InvalidArgument(msg) => {
                assert!(msg.contains("unsupported"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn object_outside_any_root_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(RecordingSearchIndex::new());
        let svc = service(store, search);
        let err = svc
            .handle(notification(
                "s3:ObjectCreated:Put",
                "unknown-bucket",
                "some/key",
                1,
            ))
            .await
            .unwrap_err();
        match err {
            ServiceError::InvalidArgument(msg) => assert!(msg.contains("no index for object")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unmanaged_root_matches_longest_workspace_prefix() {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(RecordingSearchIndex::new());
        let op = user("op");
        let n = node(&op);
        let r = root(&n, RootType::Unmanaged, "lake", "data");
        let shallow = context(&n, &r, &op, "all", Some("set"));
        let deep = context(&n, &r, &op, "deep", Some("set/deep"));
        store.add_user(&op);
        store.add_context(&shallow);
        store.add_context(&deep);
        store.add_index(r.id, "default");

        let svc = service(store, search.clone());
        svc.handle(notification(
            "s3:ObjectCreated:Put",
            "lake",
            "data/set/deep/file.bin",
            7,
        ))
        .await
        .unwrap();

        let expected_id =
            object_primary_key("http://minio:9000", "lake", "data/set/deep", "file.bin");
        let documents = search.documents.lock().unwrap();
        let doc = documents.get(&expected_id).expect("document indexed");
        assert_eq!(doc["workspace_name"], "deep");
        assert_eq!(doc["path"], "file.bin");
    }

    #[tokio::test]
    async fn records_in_one_payload_are_applied_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(RecordingSearchIndex::new());
        let alice = user("alice");
        let n = node(&alice);
        let r = root(&n, RootType::Public, "b", "");
        let ctx = context(&n, &r, &alice, "photos", None);
        store.add_user(&alice);
        store.add_context(&ctx);
        store.add_index(r.id, "default");

        let key = "public/alice/photos/a.txt";
        let payload: BucketEventNotification = serde_json::from_value(serde_json::json!({
            "Records": [
                {
                    "eventName": "s3:ObjectCreated:Put",
                    "eventTime": "2024-09-30T00:12:42.220Z",
                    "s3": {"bucket": {"name": "b"}, "object": {"key": key, "size": 1, "eTag": "x"}}
                },
                {
                    "eventName": "s3:ObjectRemoved:Delete",
                    "eventTime": "2024-09-30T00:12:43.220Z",
                    "s3": {"bucket": {"name": "b"}, "object": {"key": key}}
                }
            ]
        }))
        .unwrap();

        let svc = service(store, search.clone());
        svc.handle(payload).await.unwrap();
        // Create then delete in one payload nets out to no document, and
        // a single bulk submission.
        assert_eq!(search.document_count(), 0);
        assert_eq!(search.bodies.lock().unwrap().len(), 1);
    }
}
