//! Configuration type definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dialect::Engine;
use crate::error::{Result, StoreError};
use crate::store::VersionUidFormat;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store connection configuration.
    pub store: StoreConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database engine: "sqlite" or "postgres".
    pub engine: String,

    /// Database file path (SQLite).
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Database host (PostgreSQL).
    #[serde(default)]
    pub host: Option<String>,

    /// Database port (PostgreSQL, default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name (PostgreSQL).
    #[serde(default)]
    pub database: Option<String>,

    /// Username (PostgreSQL).
    #[serde(default)]
    pub user: Option<String>,

    /// Password (PostgreSQL).
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl StoreConfig {
    /// Parse the configured engine identifier.
    pub fn engine(&self) -> Result<Engine> {
        Engine::from_name(&self.engine)
    }

    /// The SQLite database path.
    pub fn sqlite_path(&self) -> Result<&std::path::Path> {
        self.path
            .as_deref()
            .ok_or_else(|| StoreError::Config("store.path is required for sqlite".to_string()))
    }

    /// Build a connection string for the PostgreSQL driver.
    pub fn postgres_params(&self) -> Result<String> {
        let host = self
            .host
            .as_deref()
            .ok_or_else(|| StoreError::Config("store.host is required for postgres".to_string()))?;
        let database = self.database.as_deref().ok_or_else(|| {
            StoreError::Config("store.database is required for postgres".to_string())
        })?;
        let user = self
            .user
            .as_deref()
            .ok_or_else(|| StoreError::Config("store.user is required for postgres".to_string()))?;

        let mut params = format!(
            "host={} port={} dbname={} user={}",
            host, self.port, database, user
        );
        if let Some(password) = &self.password {
            params.push_str(&format!(" password={}", password));
        }
        Ok(params)
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Remap cache capacity.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Prefix letter of derived version identifiers.
    #[serde(default = "default_uid_prefix")]
    pub uid_prefix: char,

    /// Zero-padded digit width of derived version identifiers.
    #[serde(default = "default_uid_width")]
    pub uid_width: usize,
}

impl MigrationConfig {
    /// The identifier derivation this configuration describes.
    pub fn uid_format(&self) -> VersionUidFormat {
        VersionUidFormat {
            prefix: self.uid_prefix,
            width: self.uid_width,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            uid_prefix: default_uid_prefix(),
            uid_width: default_uid_width(),
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_cache_capacity() -> usize {
    crate::rekey::DEFAULT_CAPACITY
}

fn default_uid_prefix() -> char {
    'V'
}

fn default_uid_width() -> usize {
    10
}
