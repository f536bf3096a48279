//! Broker API client and on-disk CLI configuration.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    "http://localhost:8100/api".to_string()
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".config").join("wio.json")
}

pub fn load_config(path: &PathBuf) -> CliConfig {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| CliConfig {
            api_url: default_api_url(),
            ..Default::default()
        }),
        Err(_) => CliConfig {
            api_url: default_api_url(),
            ..Default::default()
        },
    }
}

pub fn save_config(path: &PathBuf, config: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    std::fs::write(path, serde_json::to_string_pretty(config)?)
        .context("Failed to write config file")?;
    Ok(())
}

pub struct ApiClient {
    http: reqwest::Client,
    config: CliConfig,
}

impl ApiClient {
    pub fn new(config: CliConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.api_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.api_url.trim_end_matches('/'), path);
        let mut builder = self
            .http
            .request(method, url)
            .header("User-Agent", "wio")
            .header("Accept", "application/json");
        if let (Some(key), Some(secret)) = (&self.config.access_key, &self.config.secret_key) {
            builder = builder.basic_auth(key, Some(secret));
        }
        builder
    }

    async fn run<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await.context("request failed")?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(anyhow!("You are not logged in."));
        }
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("{}: {}", status, body));
        }
        serde_json::from_str(&body).with_context(|| format!("undecodable response: {body}"))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.run(self.request(Method::GET, path)).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.run(self.request(Method::GET, path).query(query)).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        self.run(self.request(Method::POST, path).json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.run(self.request(Method::DELETE, path)).await
    }
}
