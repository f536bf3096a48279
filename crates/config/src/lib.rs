// Configuration Management
//
// This crate handles all configuration loading for the workspace broker.
// It provides:
// - Configuration structs
// - Environment variable loading (wio_-prefixed)
// - Default configuration values
//
// This keeps configuration concerns separate from domain logic. Storage
// node and root credentials live in the database, never in the environment.

use thiserror::Error;

pub mod types;

// Re-export all configuration types
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidVar(String, String),
}

/// Main configuration loading interface
impl Settings {
    /// Load configuration from environment variables
    ///
    /// This will attempt to load a .env file from the current directory first,
    /// then read all `wio_`-prefixed configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load .env file if it exists (don't error if it doesn't)
        let _ = dotenvy::dotenv();

        Settings::from_env()
    }
}
