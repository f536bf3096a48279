//! Deterministic naming: object-key prefixes for workspaces, content-derived
//! index document ids, and storage-client cache keys.

use sha2::{Digest, Sha256};

use crate::error::ServiceError;
use crate::models::{Workspace, WorkspaceRoot};

/// Validate a path segment used in workspace prefixes. Anything outside
/// `[A-Za-z0-9._-]` could leak into a policy resource pattern, so reject at
/// create time and again here.
pub fn sanitize(name: &str) -> Result<&str, ServiceError> {
    if name.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "name must not be empty".to_string(),
        ));
    }
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        Ok(name)
    } else {
        Err(ServiceError::InvalidArgument(format!(
            "invalid characters in name '{name}': allowed are [A-Za-z0-9._-]"
        )))
    }
}

/// Join path segments with `/`, skipping empty segments, and strip leading
/// and trailing slashes from the result.
pub fn join_prefix(segments: &[&str]) -> String {
    segments
        .iter()
        .flat_map(|s| s.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Full object prefix for a workspace inside its root.
///
/// Unmanaged workspaces carry their own `base_path`; managed ones derive
/// `{root.base_path}/{username}/{name}`.
pub fn workspace_key(
    workspace: &Workspace,
    owner_username: &str,
    root: &WorkspaceRoot,
) -> Result<String, ServiceError> {
    match &workspace.base_path {
        Some(base_path) => Ok(join_prefix(&[&root.base_path, base_path])),
        None => Ok(join_prefix(&[
            &root.base_path,
            sanitize(owner_username)?,
            sanitize(&workspace.name)?,
        ])),
    }
}

/// Index document id: SHA-256 over the exact concatenation
/// `api_url || bucket || workspace_prefix || inner_path`, last 16 hex
/// characters. The ordering is load-bearing for cross-broker compatibility.
pub fn object_primary_key(
    api_url: &str,
    bucket: &str,
    workspace_prefix: &str,
    inner_path: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_url.as_bytes());
    hasher.update(bucket.as_bytes());
    hasher.update(workspace_prefix.as_bytes());
    hasher.update(inner_path.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[digest.len() - 16..].to_string()
}

/// Cache key for the storage-client pool. Opaque identity only; hashing the
/// credentials does not make them secret.
pub fn client_cache_key(
    client_type: &str,
    region: &str,
    api_url: &str,
    access_key: &str,
    secret_key: &str,
) -> String {
    let raw = format!("{client_type}{region}{api_url}{access_key}{secret_key}").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn root(base_path: &str) -> WorkspaceRoot {
        WorkspaceRoot {
            id: Uuid::new_v4(),
            root_type: crate::models::RootType::Private,
            bucket: "b".to_string(),
            base_path: base_path.to_string(),
            node_id: Uuid::new_v4(),
            created: Utc::now(),
        }
    }

    fn workspace(name: &str, base_path: Option<&str>) -> Workspace {
        Workspace {
            id: Uuid::new_v4(),
            name: name.to_string(),
            base_path: base_path.map(|s| s.to_string()),
            owner_id: Uuid::new_v4(),
            root_id: Uuid::new_v4(),
            created: Utc::now(),
        }
    }

    #[test]
    fn managed_key_derives_from_owner_and_name() {
        let key = workspace_key(&workspace("photos", None), "alice", &root("")).unwrap();
        assert_eq!(key, "alice/photos");

        let key = workspace_key(&workspace("photos", None), "alice", &root("base/")).unwrap();
        assert_eq!(key, "base/alice/photos");
    }

    #[test]
    fn unmanaged_key_uses_workspace_base_path() {
        let key = workspace_key(&workspace("whatever", Some("data/set1")), "alice", &root("lake"))
            .unwrap();
        assert_eq!(key, "lake/data/set1");
    }

    #[test]
    fn keys_are_distinct_within_a_root() {
        let r = root("");
        let a = workspace_key(&workspace("photos", None), "alice", &r).unwrap();
        let b = workspace_key(&workspace("photos", None), "bob", &r).unwrap();
        let c = workspace_key(&workspace("scans", None), "alice", &r).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn sanitize_rejects_prefix_injection() {
        assert!(sanitize("photos").is_ok());
        assert!(sanitize("my.photos-2024_v1").is_ok());
        assert!(sanitize("").is_err());
        assert!(sanitize("a/b").is_err());
        assert!(sanitize("a*").is_err());
        assert!(sanitize("a b").is_err());
    }

    #[test]
    fn object_primary_key_is_stable_and_order_sensitive() {
        let a = object_primary_key("http://minio:9000", "b", "public/alice/photos", "README.md");
        let b = object_primary_key("http://minio:9000", "b", "public/alice/photos", "README.md");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        // Swapping segments must change the id even though the raw
        // concatenation has no delimiter.
        let c = object_primary_key("http://minio:9000", "bpublic", "/alice/photos", "README.md");
        assert_eq!(a, c); // same concatenation, same id
        let d = object_primary_key("http://minio:9000", "b", "README.md", "public/alice/photos");
        assert_ne!(a, d);
    }

    #[test]
    fn client_cache_key_is_case_insensitive() {
        let a = client_cache_key("s3", "US-EAST-1", "http://minio:9000", "AK", "SK");
        let b = client_cache_key("s3", "us-east-1", "http://minio:9000", "ak", "sk");
        assert_eq!(a, b);
        let c = client_cache_key("sts", "us-east-1", "http://minio:9000", "ak", "sk");
        assert_ne!(a, c);
    }
}
