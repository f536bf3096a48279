use serde::{Deserialize, Serialize};
use std::env;

use crate::ConfigError;

const ENV_PREFIX: &str = "wio_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Address advertised to clients, e.g. in `GET /api/info`.
    pub public_name: String,
    /// Postgres connection URI.
    pub database_uri: String,
    /// Server secret used for session cookie signing.
    pub secret: String,
    /// Elasticsearch node URLs.
    pub es_nodes: Vec<String>,
    pub oidc: OidcConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub well_known_url: String,
    pub algos: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok().filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    var(name).ok_or_else(|| ConfigError::MissingVar(format!("{ENV_PREFIX}{name}")))
}

fn list(name: &str, default: &[&str]) -> Vec<String> {
    match var(name) {
        Some(v) => v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match var("port") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidVar(format!("{ENV_PREFIX}port"), e.to_string()))?,
            None => 8100,
        };

        Ok(Self {
            public_name: var("public_name").unwrap_or_else(|| "http://localhost:8100".to_string()),
            database_uri: var("database_uri").unwrap_or_else(|| "postgresql://localhost/wio".to_string()),
            secret: var("secret").unwrap_or_else(|| "secret".to_string()),
            es_nodes: list("es_nodes", &["http://localhost:9200"]),
            oidc: OidcConfig {
                name: var("oidc_name").unwrap_or_else(|| "auth0".to_string()),
                client_id: required("oidc_client_id")?,
                client_secret: required("oidc_client_secret")?,
                well_known_url: required("oidc_well_known_url")?,
                algos: list("oidc_algos", &["RS256"]),
            },
            server: ServerConfig {
                host: var("host").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
            },
            logging: LoggingConfig {
                level: var("log_level").unwrap_or_else(|| "info".to_string()),
                format: var("log_format").unwrap_or_else(|| "pretty".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for (key, _) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                env::remove_var(key);
            }
        }
    }

    // Environment mutation is process-global, so both cases live in one test.
    #[test]
    fn from_env_defaults_overrides_and_missing_vars() {
        clear_env();
        env::set_var("wio_oidc_client_secret", "cs");
        env::set_var("wio_oidc_well_known_url", "https://idp/.well-known");

        let err = Settings::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(v) if v == "wio_oidc_client_id"));

        env::set_var("wio_oidc_client_id", "cid");
        env::set_var("wio_es_nodes", "http://es1:9200, http://es2:9200");
        env::set_var("wio_port", "9000");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.public_name, "http://localhost:8100");
        assert_eq!(settings.es_nodes, vec!["http://es1:9200", "http://es2:9200"]);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.oidc.algos, vec!["RS256"]);
    }
}
