//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use crate::connection::StoreConnection;
use crate::error::Result;
use crate::migrations::VersionUidRekey;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Open a store connection described by this configuration.
    pub fn open(&self) -> Result<Box<dyn StoreConnection>> {
        crate::drivers::open_store(self)
    }

    /// Build the rekeying migration with this configuration's tuning.
    pub fn rekey_migration(&self) -> VersionUidRekey {
        VersionUidRekey::new()
            .with_uid_format(self.migration.uid_format())
            .with_cache_capacity(self.migration.cache_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_sqlite() {
        let config = Config::from_yaml(
            "store:\n  engine: sqlite\n  path: /tmp/meta.db\n",
        )
        .unwrap();
        assert_eq!(config.store.engine, "sqlite");
        assert_eq!(config.migration.cache_capacity, 8192);
        assert_eq!(config.migration.uid_format().format(3).unwrap(), "V0000000003");
    }

    #[test]
    fn test_from_yaml_postgres() {
        let config = Config::from_yaml(
            "store:\n  engine: postgres\n  host: db.example\n  database: vaultmeta\n  user: vault\n  password: secret\n",
        )
        .unwrap();
        let params = config.store.postgres_params().unwrap();
        assert!(params.contains("host=db.example"));
        assert!(params.contains("port=5432"));
        assert!(params.contains("password=secret"));
    }

    #[test]
    fn test_password_not_serialized() {
        let config = Config::from_yaml(
            "store:\n  engine: postgres\n  host: h\n  database: d\n  user: u\n  password: super_secret\n",
        )
        .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(
            !json.contains("super_secret"),
            "password was serialized: {}",
            json
        );
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let err = Config::from_yaml("store:\n  engine: oracle\n").unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_sqlite_requires_path() {
        assert!(Config::from_yaml("store:\n  engine: sqlite\n").is_err());
    }

    #[test]
    fn test_migration_tuning_overrides() {
        let config = Config::from_yaml(
            "store:\n  engine: sqlite\n  path: /tmp/meta.db\nmigration:\n  cache_capacity: 16\n  uid_prefix: B\n  uid_width: 4\n",
        )
        .unwrap();
        assert_eq!(config.migration.cache_capacity, 16);
        assert_eq!(config.migration.uid_format().format(7).unwrap(), "B0007");
    }

    #[test]
    fn test_zero_cache_capacity_rejected() {
        let err = Config::from_yaml(
            "store:\n  engine: sqlite\n  path: /tmp/meta.db\nmigration:\n  cache_capacity: 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cache_capacity"));
    }
}
