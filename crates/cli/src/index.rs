//! Client side of a workspace crawl: open or resume a round, page the
//! object listing with the operator's token, and post bulk batches until
//! the listing is exhausted.

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::client::ApiClient;

const BATCH_SIZE: usize = 500;

/// Build an S3 client from a minted token against the workspace's node.
fn s3_client(token: &Value, node: &Value) -> Result<aws_sdk_s3::Client> {
    let api_url = node["api_url"]
        .as_str()
        .ok_or_else(|| anyhow!("node has no api_url"))?;
    let region = node["region"].as_str().unwrap_or("us-east-1").to_string();
    let credentials = aws_sdk_s3::config::Credentials::new(
        token["access_key_id"].as_str().unwrap_or_default(),
        token["secret_access_key"].as_str().unwrap_or_default(),
        token["session_token"].as_str().map(|s| s.to_string()),
        None,
        "wio-cli",
    );
    let config = aws_sdk_s3::Config::builder()
        .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
        .region(aws_sdk_s3::config::Region::new(region))
        .endpoint_url(api_url)
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();
    Ok(aws_sdk_s3::Client::from_conf(config))
}

pub async fn crawl_workspace(client: &ApiClient, term: &str) -> Result<Value> {
    // Resolve the workspace and mint a token in one call.
    let search: Value = client
        .post(
            "token/search",
            &serde_json::json!({ "search_terms": [term] }),
        )
        .await?;
    let matched = search["workspaces"]
        .get(term)
        .ok_or_else(|| anyhow!("No matches found for {term}"))?;
    let workspace = &matched["workspace"];
    let workspace_id = workspace["id"]
        .as_str()
        .ok_or_else(|| anyhow!("workspace has no id"))?
        .to_string();
    let wrapper = search["tokens"]
        .as_array()
        .and_then(|tokens| tokens.first())
        .ok_or_else(|| anyhow!("no token issued for {term}"))?;

    let bucket = workspace["root"]["bucket"]
        .as_str()
        .ok_or_else(|| anyhow!("workspace has no bucket"))?
        .to_string();
    let prefix = workspace_prefix(workspace);

    // Open or resume the crawl round.
    let round: Value = client
        .post(&format!("workspace/{workspace_id}/crawl"), &serde_json::json!({}))
        .await?;
    let mut start_after = round["last_indexed_key"].as_str().map(|s| s.to_string());
    eprintln!(
        "crawl round {} (resume from {:?})",
        round["id"], start_after
    );

    let s3 = s3_client(&wrapper["token"], &wrapper["node"])?;
    let mut last_round = round;
    loop {
        let mut request = s3
            .list_objects_v2()
            .bucket(&bucket)
            .prefix(format!("{prefix}/"))
            .max_keys(BATCH_SIZE as i32);
        if let Some(ref key) = start_after {
            request = request.start_after(key);
        }
        let page = request.send().await?;

        let contents = page.contents();
        let truncated = page.is_truncated().unwrap_or(false);
        let documents: Vec<Value> = contents
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                let path = key.strip_prefix(&format!("{prefix}/"))?;
                if path.is_empty() {
                    return None;
                }
                let time = object
                    .last_modified()
                    .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_else(chrono::Utc::now);
                Some(serde_json::json!({
                    "time": time.to_rfc3339(),
                    "size": object.size().unwrap_or(0),
                    "eTag": object.e_tag().map(|t| t.trim_matches('"').to_string()),
                    "path": path,
                }))
            })
            .collect();
        let last_key = contents
            .iter()
            .filter_map(|object| object.key())
            .next_back()
            .map(|s| s.to_string());

        let batch = serde_json::json!({
            "documents": documents,
            "last_indexed_key": last_key,
            "succeeded": !truncated,
        });
        last_round = client
            .post(&format!("workspace/{workspace_id}/bulk_index"), &batch)
            .await?;

        if !truncated {
            break;
        }
        start_after = last_key;
    }
    Ok(last_round)
}

fn workspace_prefix(workspace: &Value) -> String {
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
