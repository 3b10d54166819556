//! Configuration management for EduSync Server

use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// History entries kept per actor
    pub history_capacity: usize,
    /// Re-reads allowed after a lost compare-and-set before giving up on an item
    pub max_cas_retries: u32,
    /// Larger batches are rejected outright
    pub max_batch_items: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                database_url: "sqlite:./edusync.db".to_string(),
            },
            sync: SyncConfig {
                history_capacity: 100,
                max_cas_retries: 8,
                max_batch_items: 500,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: var_or("SERVER_HOST", defaults.server.host)?,
                port: parse_or("SERVER_PORT", defaults.server.port),
            },
            store: StoreConfig {
                backend: parse_backend(&var_or("SYNC_STORE", "sqlite".to_string())?),
                database_url: var_or("DATABASE_URL", defaults.store.database_url)?,
            },
            sync: SyncConfig {
                history_capacity: parse_or("SYNC_HISTORY_CAPACITY", defaults.sync.history_capacity),
                max_cas_retries: parse_or("SYNC_MAX_CAS_RETRIES", defaults.sync.max_cas_retries),
                max_batch_items: parse_or("SYNC_MAX_BATCH_ITEMS", defaults.sync.max_batch_items),
            },
        })
    }
}

/// Map a `SYNC_STORE` value to a backend, falling back to SQLite
fn parse_backend(value: &str) -> StoreBackend {
    match value.trim().to_ascii_lowercase().as_str() {
        "memory" => StoreBackend::Memory,
        "sqlite" => StoreBackend::Sqlite,
        other => {
            tracing::warn!("Unrecognised SYNC_STORE value {:?}, using sqlite", other);
            StoreBackend::Sqlite
        }
    }
}

/// Read a variable, treating an unset one as `default`
fn var_or(var: &str, default: String) -> Result<String, env::VarError> {
    match env::var(var) {
        Ok(value) => Ok(value),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e),
    }
}

fn parse_or<T: FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
