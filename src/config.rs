use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use thiserror::Error;

use crate::core_types::Coins;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Replaces the built-in merch table when present
    #[serde(default)]
    pub catalog: Option<BTreeMap<String, Coins>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Upper bound on waiting for a locking balance read
    pub lock_timeout_ms: u64,
    /// Apply `CREATE TABLE IF NOT EXISTS` DDL at startup
    #[serde(default)]
    pub init_schema: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            acquire_timeout_ms: 5000,
            lock_timeout_ms: 3000,
            init_schema: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Coins granted to an account when it is opened
    pub starting_balance: Coins,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1000,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}
