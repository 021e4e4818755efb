//! Engine-specific implementations of [`StoreConnection`].
//!
//! Each driver generates its own dialect's DDL and DML; the migration engine
//! upstream never sees SQL.

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::config::Config;
use crate::connection::StoreConnection;
use crate::dialect::Engine;
use crate::error::Result;

/// Open a store connection from configuration.
pub fn open_store(config: &Config) -> Result<Box<dyn StoreConnection>> {
    match config.store.engine()? {
        Engine::Sqlite => {
            let store = SqliteStore::open(config.store.sqlite_path()?)?;
            Ok(Box::new(store))
        }
        Engine::Postgres => {
            let store = PostgresStore::connect(&config.store.postgres_params()?)?;
            Ok(Box::new(store))
        }
    }
}
