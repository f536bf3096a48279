//! Index documents, the authoritative field mapping, and the stateless
//! newline-delimited bulk encoder for the search engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use elasticsearch::http::transport::Transport;
use elasticsearch::indices::{IndicesCreateParts, IndicesDeleteParts};
use elasticsearch::{BulkParts, Elasticsearch, SearchParts};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::ports::SearchIndex;

/// Media attributes extracted out-of-band (ffprobe side channel) and
/// attached to documents when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_tag_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ts: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_frame_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
}

/// One denormalized record in the search engine, identifying a single
/// object. Keyed by `keys::object_primary_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub time: DateTime<Utc>,
    pub size: i64,
    #[serde(rename = "eTag")]
    pub e_tag: String,
    pub extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Search-as-you-type surface over the inner path.
    pub text: String,
    pub workspace_id: Uuid,
    pub workspace_name: String,
    pub owner_id: Uuid,
    pub owner_name: String,
    pub root_id: Uuid,
    pub bucket: String,
    pub server: String,
    /// Object-key prefix of the workspace within the bucket.
    pub root: String,
    pub path: String,
    pub filename: String,
    pub user_shares: Vec<Uuid>,
    #[serde(flatten)]
    pub media: MediaMetadata,
}

/// Split an inner path into `(filename, extension)`.
pub fn path_parts(path: &str) -> (String, String) {
    let filename = path.rsplit('/').next().unwrap_or("").to_string();
    let extension = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_string(),
        _ => String::new(),
    };
    (filename, extension)
}

/// The index mapping applied on creation.
pub fn document_mapping() -> serde_json::Value {
    json!({
        "properties": {
            "time": {"type": "date"},
            "size": {"type": "double"},
            "eTag": {"type": "text"},
            "extension": {"type": "keyword"},
            "content_type": {"type": "keyword"},
            "text": {"type": "search_as_you_type"},
            "workspace_id": {"type": "keyword"},
            "workspace_name": {"type": "text"},
            "owner_id": {"type": "keyword"},
            "owner_name": {"type": "text"},
            "root_id": {"type": "keyword"},
            "bucket": {"type": "text"},
            "server": {"type": "text"},
            "root": {"type": "text"},
            "path": {"type": "text"},
            "filename": {"type": "text"},
            "user_shares": {"type": "keyword"},
            "codec_tag_string": {"type": "keyword"},
            "width": {"type": "double"},
            "height": {"type": "double"},
            "duration_ts": {"type": "double"},
            "r_frame_rate": {"type": "keyword"},
            "bit_rate": {"type": "double"},
            "duration_sec": {"type": "double"},
            "format_name": {"type": "keyword"}
        }
    })
}

#[derive(Debug, Clone)]
pub enum BulkOp {
    Upsert { id: String, doc: Box<IndexDocument> },
    Delete { id: String },
}

/// Assemble the newline-delimited bulk payload: exactly alternating action
/// and document lines for upserts, action lines alone for deletes. Ops are
/// never batched across indices; callers split per index.
pub fn encode_bulk(index: &str, ops: &[BulkOp]) -> String {
    let mut body = String::new();
    for op in ops {
        match op {
            BulkOp::Upsert { id, doc } => {
                body.push_str(
                    &serde_json::json!({"update": {"_index": index, "_id": id}}).to_string(),
                );
                body.push('\n');
                body.push_str(
                    &serde_json::json!({"doc": doc, "doc_as_upsert": true}).to_string(),
                );
                body.push('\n');
            }
            BulkOp::Delete { id } => {
                body.push_str(
                    &serde_json::json!({"delete": {"_index": index, "_id": id}}).to_string(),
                );
                body.push('\n');
            }
        }
    }
    body
}

/// Elasticsearch-backed implementation of the `SearchIndex` port.
pub struct EsSearchIndex {
    client: Elasticsearch,
}

impl EsSearchIndex {
    pub fn new(nodes: &[String]) -> Result<Self, ServiceError> {
        let url = nodes
            .first()
            .ok_or_else(|| ServiceError::Internal("no search engine nodes configured".to_string()))?;
        let transport = Transport::single_node(url)
            .map_err(|e| ServiceError::Upstream(format!("search engine transport: {e}")))?;
        Ok(Self {
            client: Elasticsearch::new(transport),
        })
    }

    /// Free-text query over a set of indices, returning the raw engine
    /// response body.
    pub async fn search(
        &self,
        index: &str,
        query: &str,
    ) -> Result<serde_json::Value, ServiceError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(json!({
                "query": {
                    "multi_match": {
                        "query": query,
                        "type": "bool_prefix",
                        "fields": ["text", "text._2gram", "text._3gram", "path", "filename"]
                    }
                }
            }))
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("search failed: {e}")))?;
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ServiceError::Upstream(format!("search response: {e}")))
    }
}

#[async_trait]
impl SearchIndex for EsSearchIndex {
    async fn ensure_index(&self, name: &str) -> Result<(), ServiceError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(name))
            .body(json!({"mappings": document_mapping()}))
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("index create failed: {e}")))?;
        let status = response.status_code();
        // Already-existing index is fine; the mapping is immutable anyway.
        if status.is_success() || status.as_u16() == 400 {
            Ok(())
        } else {
            Err(ServiceError::Upstream(format!(
                "index create returned {status}"
            )))
        }
    }

    async fn delete_index(&self, name: &str) -> Result<(), ServiceError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[name]))
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("index delete failed: {e}")))?;
        let status = response.status_code();
        if status.is_success() || status.as_u16() == 404 {
            Ok(())
        } else {
            Err(ServiceError::Upstream(format!(
                "index delete returned {status}"
            )))
        }
    }

    async fn bulk(&self, body: String) -> Result<(), ServiceError> {
        let response = self
            .client
            .bulk(BulkParts::None)
            .body(vec![body])
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("bulk failed: {e}")))?;
        let status = response.status_code();
        if status.is_success() {
            Ok(())
        } else {
            Err(ServiceError::Upstream(format!("bulk returned {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str) -> IndexDocument {
        let (filename, extension) = path_parts(path);
        IndexDocument {
            time: Utc::now(),
            size: 5,
            e_tag: "etag".to_string(),
            extension,
            content_type: None,
            text: path.to_string(),
            workspace_id: Uuid::new_v4(),
            workspace_name: "photos".to_string(),
            owner_id: Uuid::new_v4(),
            owner_name: "alice".to_string(),
            root_id: Uuid::new_v4(),
            bucket: "b".to_string(),
            server: "http://minio:9000".to_string(),
            root: "alice/photos".to_string(),
            path: path.to_string(),
            filename,
            user_shares: vec![],
            media: MediaMetadata::default(),
        }
    }

    #[test]
    fn bulk_upsert_lines_alternate() {
        let ops = vec![
            BulkOp::Upsert {
                id: "aaaa".to_string(),
                doc: Box::new(doc("2024/sep.jpg")),
            },
            BulkOp::Delete {
                id: "bbbb".to_string(),
            },
        ];
        let body = encode_bulk("default", &ops);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);

        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["update"]["_id"], "aaaa");
        assert_eq!(action["update"]["_index"], "default");

        let payload: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(payload["doc_as_upsert"], true);
        assert_eq!(payload["doc"]["path"], "2024/sep.jpg");
        assert_eq!(payload["doc"]["eTag"], "etag");

        let delete: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(delete["delete"]["_id"], "bbbb");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn media_fields_are_omitted_when_absent() {
        let value = serde_json::to_value(doc("a.txt")).unwrap();
        assert!(value.get("codec_tag_string").is_none());
        assert!(value.get("content_type").is_none());
        assert_eq!(value["filename"], "a.txt");
        assert_eq!(value["extension"], "txt");
    }

    #[test]
    fn path_parts_edge_cases() {
        assert_eq!(path_parts("a/b/c.tar.gz"), ("c.tar.gz".to_string(), "gz".to_string()));
        assert_eq!(path_parts("README"), ("README".to_string(), String::new()));
        assert_eq!(path_parts(".hidden"), (".hidden".to_string(), String::new()));
    }

    #[test]
    fn mapping_covers_the_authoritative_fields() {
        let mapping = document_mapping();
        let props = &mapping["properties"];
        assert_eq!(props["time"]["type"], "date");
        assert_eq!(props["size"]["type"], "double");
        assert_eq!(props["extension"]["type"], "keyword");
        assert_eq!(props["text"]["type"], "search_as_you_type");
        assert_eq!(props["user_shares"]["type"], "keyword");
        assert_eq!(props["r_frame_rate"]["type"], "keyword");
    }
}
