//! Process-wide storage-client pool. One SDK client per
//! (flavor, region, endpoint, credential) tuple. Entries are created cold
//! under a write lock and live for the process lifetime; reads are a
//! shared-lock map hit once populated.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::ServiceError;
use crate::keys::client_cache_key;
use crate::models::StorageNode;
use crate::ports::{StsCredentials, StsProvider};

const CREDENTIALS_PROVIDER_NAME: &str = "workspace-broker";
/// Role arn sent to nodes without one configured; MinIO ignores the value.
const PLACEHOLDER_ROLE_ARN: &str = "arn:xxx:xxx:xxx:xxxx";

#[derive(Default)]
pub struct ClientCache {
    s3: RwLock<HashMap<String, aws_sdk_s3::Client>>,
    sts: RwLock<HashMap<String, aws_sdk_sts::Client>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// S3 client for a node, signing v4 with path-style addressing.
    pub fn s3(&self, node: &StorageNode) -> aws_sdk_s3::Client {
        let key = client_cache_key(
            "s3",
            &node.region,
            &node.api_url,
            &node.access_key_id,
            &node.secret_access_key,
        );
        if let Some(client) = self.s3.read().unwrap().get(&key) {
            return client.clone();
        }
        let mut cache = self.s3.write().unwrap();
        // Double-checked: another request may have populated the slot
        // while we waited for the write lock.
        if let Some(client) = cache.get(&key) {
            return client.clone();
        }
        debug!(node = %node.name, "creating s3 client");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(node.region.clone()))
            .endpoint_url(&node.api_url)
            .credentials_provider(Credentials::new(
                node.access_key_id.clone(),
                node.secret_access_key.clone(),
                None,
                None,
                CREDENTIALS_PROVIDER_NAME,
            ))
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(config);
        cache.insert(key, client.clone());
        client
    }

    /// STS client for a node. AWS nodes use the regional STS endpoint
    /// unless overridden; MinIO answers on the node URL itself.
    pub fn sts(&self, node: &StorageNode) -> aws_sdk_sts::Client {
        let endpoint = node.sts_endpoint();
        let key = client_cache_key(
            "sts",
            &node.region,
            &endpoint,
            &node.access_key_id,
            &node.secret_access_key,
        );
        if let Some(client) = self.sts.read().unwrap().get(&key) {
            return client.clone();
        }
        let mut cache = self.sts.write().unwrap();
        if let Some(client) = cache.get(&key) {
            return client.clone();
        }
        debug!(node = %node.name, endpoint = %endpoint, "creating sts client");
        let config = aws_sdk_sts::Config::builder()
            .behavior_version(aws_sdk_sts::config::BehaviorVersion::latest())
            .region(aws_sdk_sts::config::Region::new(node.region.clone()))
            .endpoint_url(&endpoint)
            .credentials_provider(aws_sdk_sts::config::Credentials::new(
                node.access_key_id.clone(),
                node.secret_access_key.clone(),
                None,
                None,
                CREDENTIALS_PROVIDER_NAME,
            ))
            .build();
        let client = aws_sdk_sts::Client::from_conf(config);
        cache.insert(key, client.clone());
        client
    }
}

/// A single page of an object listing.
#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub keys: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub next_start_after: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub size: i64,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One `list_objects_v2` page starting after the given key. Used by the
/// crawl client and by root imports.
pub async fn list_objects_page(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    prefix: &str,
    start_after: Option<&str>,
    delimiter: Option<&str>,
) -> Result<ObjectPage, ServiceError> {
    let mut request = client.list_objects_v2().bucket(bucket).prefix(prefix);
    if let Some(start) = start_after {
        request = request.start_after(start);
    }
    if let Some(delimiter) = delimiter {
        request = request.delimiter(delimiter);
    }
    let response = request
        .send()
        .await
        .map_err(|e| ServiceError::Upstream(format!("list_objects_v2 failed: {e}")))?;

    let keys: Vec<ObjectEntry> = response
        .contents()
        .iter()
        .filter_map(|obj| {
            obj.key().map(|key| ObjectEntry {
                key: key.to_string(),
                size: obj.size().unwrap_or(0),
                e_tag: obj.e_tag().map(|t| t.trim_matches('"').to_string()),
                last_modified: obj
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
            })
        })
        .collect();
    let common_prefixes = response
        .common_prefixes()
        .iter()
        .filter_map(|p| p.prefix().map(|s| s.to_string()))
        .collect();
    let next_start_after = if response.is_truncated().unwrap_or(false) {
        keys.last().map(|entry| entry.key.clone())
    } else {
        None
    };

    Ok(ObjectPage {
        keys,
        common_prefixes,
        next_start_after,
    })
}

/// Create the bucket if it does not exist yet. `BucketAlreadyOwnedByYou`
/// is logged and ignored.
pub async fn ensure_bucket(client: &aws_sdk_s3::Client, bucket: &str) -> Result<(), ServiceError> {
    match client.create_bucket().bucket(bucket).send().await {
        Ok(_) => Ok(()),
        Err(err) => {
            let service_error = err.as_service_error();
            if service_error
                .map(|e| e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists())
                .unwrap_or(false)
            {
                debug!(bucket, "bucket already exists");
                Ok(())
            } else {
                Err(ServiceError::Upstream(format!(
                    "create_bucket failed: {err}"
                )))
            }
        }
    }
}

/// Write the zero-byte prefix marker that makes a managed workspace appear
/// as a directory.
pub async fn put_prefix_marker(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
) -> Result<(), ServiceError> {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(aws_sdk_s3::primitives::ByteStream::from_static(b""))
        .send()
        .await
        .map_err(|e| ServiceError::Upstream(format!("put_object failed: {e}")))?;
    Ok(())
}

/// STS provider backed by the client cache.
pub struct AwsStsProvider {
    cache: std::sync::Arc<ClientCache>,
}

impl AwsStsProvider {
    pub fn new(cache: std::sync::Arc<ClientCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl StsProvider for AwsStsProvider {
    async fn assume_role(
        &self,
        node: &StorageNode,
        session_name: &str,
        policy_json: &str,
    ) -> Result<StsCredentials, ServiceError> {
        let client = self.cache.sts(node);
        let role_arn = node
            .assume_role_arn
            .clone()
            .unwrap_or_else(|| PLACEHOLDER_ROLE_ARN.to_string());

        let output = client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .policy(policy_json)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("assume_role failed: {e}")))?;

        let credentials = output.credentials().ok_or_else(|| {
            ServiceError::Upstream("assume_role returned no credentials".to_string())
        })?;
        let expiration = credentials.expiration();
        let expiration = DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| {
                ServiceError::Upstream("assume_role returned invalid expiration".to_string())
            })?;

        Ok(StsCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}
