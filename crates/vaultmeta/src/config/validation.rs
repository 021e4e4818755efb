//! Configuration validation.

use crate::config::Config;
use crate::dialect::Engine;
use crate::error::{Result, StoreError};

/// Validate a configuration before it is used to open a store.
///
/// All failures here are fatal and happen before any database connection
/// is attempted.
pub fn validate(config: &Config) -> Result<()> {
    let engine = config.store.engine()?;

    match engine {
        Engine::Sqlite => {
            config.store.sqlite_path()?;
        }
        Engine::Postgres => {
            config.store.postgres_params()?;
        }
    }

    if config.migration.cache_capacity == 0 {
        return Err(StoreError::Config(
            "migration.cache_capacity must be at least 1".to_string(),
        ));
    }

    if config.migration.uid_width == 0 || config.migration.uid_width > 19 {
        return Err(StoreError::Config(
            "migration.uid_width must be between 1 and 19".to_string(),
        ));
    }

    if !config.migration.uid_prefix.is_ascii_alphabetic() {
        return Err(StoreError::Config(
            "migration.uid_prefix must be an ASCII letter".to_string(),
        ));
    }

    Ok(())
}
