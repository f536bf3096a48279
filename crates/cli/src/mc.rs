//! Credential-aware wrapper around the MinIO `mc` client: resolves
//! `owner/name/...` arguments through the broker, rewrites them to
//! `alias/bucket/prefix/...`, and execs `mc` with an `MC_HOST_<alias>`
//! environment pointing at the minted token.

use anyhow::{anyhow, Result};
use serde_json::Value;
use url::Url;

use crate::client::ApiClient;

pub const ALIAS: &str = "wio";

const SUPPORTED_COMMANDS: [&str; 16] = [
    "ls", "cp", "mirror", "cat", "head", "pipe", "share", "find", "sql", "stat", "mv", "tree",
    "du", "diff", "rm", "watch",
];

/// Arguments worth sending to token search: not flags, not local paths.
pub fn candidate_terms(args: &[String]) -> Vec<String> {
    if args.len() < 2 || !SUPPORTED_COMMANDS.contains(&args[0].as_str()) {
        return Vec::new();
    }
    args[1..]
        .iter()
        .filter(|arg| !arg.starts_with('-'))
        .filter(|arg| !std::path::Path::new(arg.as_str()).exists())
        .cloned()
        .collect()
}

/// Rewrite each matched term to `alias/bucket/workspace_prefix/inner`.
pub fn rewrite_args(args: &[String], matches: &Value) -> Vec<String> {
    args.iter()
        .map(|arg| {
            match matches.get(arg) {
                Some(matched) => {
                    let bucket = matched["workspace"]["root"]["bucket"]
                        .as_str()
                        .unwrap_or_default();
                    let key = workspace_prefix(matched);
                    let inner = matched["path"].as_str().unwrap_or_default();
                    let mut parts = vec![ALIAS.to_string(), bucket.to_string()];
                    parts.extend(key.split('/').map(|s| s.to_string()));
                    if !inner.is_empty() {
                        parts.push(inner.trim_start_matches('/').to_string());
                    }
                    parts.retain(|p| !p.is_empty());
                    parts.join("/")
                }
                None => arg.clone(),
            }
        })
        .collect()
}

fn workspace_prefix(matched: &Value) -> String {
    let workspace = &matched["workspace"];
    let root_base = workspace["root"]["base_path"].as_str().unwrap_or_default();
    let inner = match workspace["base_path"].as_str() {
        Some(base_path) => base_path.to_string(),
        None => format!(
            "{}/{}",
            workspace["owner"]["username"].as_str().unwrap_or_default(),
            workspace["name"].as_str().unwrap_or_default()
        ),
    };
    [root_base, &inner]
        .iter()
        .flat_map(|s| s.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// `MC_HOST_<alias>` value embedding the token credentials.
pub fn mc_host_env(token: &Value, node: &Value) -> Result<String> {
    let api_url = node["api_url"]
        .as_str()
        .ok_or_else(|| anyhow!("node has no api_url"))?;
    let url = Url::parse(api_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("node api_url has no host"))?;
    let netloc = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(format!(
        "{}://{}:{}:{}@{}",
        url.scheme(),
        token["access_key_id"].as_str().unwrap_or_default(),
        token["secret_access_key"].as_str().unwrap_or_default(),
        token["session_token"].as_str().unwrap_or_default(),
        netloc
    ))
}

pub async fn run(client: &ApiClient, args: Vec<String>) -> Result<i32> {
    let terms = candidate_terms(&args);
    let response: Value = client
        .post(
            "token/search",
            &serde_json::json!({ "search_terms": terms }),
        )
        .await?;

    let rewritten = rewrite_args(&args, &response["workspaces"]);

    let mut command = std::process::Command::new("mc");
    command.args(&rewritten);
    let tokens = response["tokens"].as_array().cloned().unwrap_or_default();
    if let Some(wrapper) = tokens.first() {
        let env = mc_host_env(&wrapper["token"], &wrapper["node"])?;
        command.env(format!("MC_HOST_{ALIAS}"), env);
    }

    let status = command.status().map_err(|e| anyhow!("failed to exec mc: {e}"))?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(bucket: &str, owner: &str, name: &str, path: &str) -> Value {
        serde_json::json!({
            "workspace": {
                "name": name,
                "base_path": null,
                "owner": {"username": owner},
                "root": {"bucket": bucket, "base_path": ""}
            },
            "path": path
        })
    }

    #[test]
    fn rewrites_matched_terms_only() {
        let args = vec![
            "cp".to_string(),
            "alice/photos/sep.jpg".to_string(),
            "/tmp/out.jpg".to_string(),
        ];
        let matches = serde_json::json!({
            "alice/photos/sep.jpg": matched("b", "alice", "photos", "sep.jpg")
        });
        let rewritten = rewrite_args(&args, &matches);
        assert_eq!(rewritten[0], "cp");
        assert_eq!(rewritten[1], "wio/b/alice/photos/sep.jpg");
        assert_eq!(rewritten[2], "/tmp/out.jpg");
    }

    #[test]
    fn unmanaged_workspaces_use_their_base_path() {
        let mut value = matched("lake", "op", "set1", "file.bin");
        value["workspace"]["base_path"] = serde_json::json!("data/set1");
        value["workspace"]["root"]["base_path"] = serde_json::json!("lake-base");
        let matches = serde_json::json!({"op/set1/file.bin": value});
        let args = vec!["cat".to_string(), "op/set1/file.bin".to_string()];
        let rewritten = rewrite_args(&args, &matches);
        assert_eq!(rewritten[1], "wio/lake/lake-base/data/set1/file.bin");
    }

    #[test]
    fn flags_and_unsupported_commands_produce_no_terms() {
        assert!(candidate_terms(&["watch".to_string()]).is_empty());
        let terms = candidate_terms(&[
            "ls".to_string(),
            "-r".to_string(),
            "alice/photos".to_string(),
        ]);
        assert_eq!(terms, vec!["alice/photos".to_string()]);
        assert!(candidate_terms(&["bogus".to_string(), "x".to_string()]).is_empty());
    }

    #[test]
    fn mc_host_embeds_credentials() {
        let token = serde_json::json!({
            "access_key_id": "AK",
            "secret_access_key": "SK",
            "session_token": "ST"
        });
        let node = serde_json::json!({"api_url": "http://minio:9000"});
        assert_eq!(
            mc_host_env(&token, &node).unwrap(),
            "http://AK:SK:ST@minio:9000"
        );
    }
}
