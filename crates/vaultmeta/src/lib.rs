//! # vaultmeta
//!
//! Metadata store for a versioned backup tool: a parent `versions` table
//! with dependent `blocks` and `labels` tables, across SQLite and
//! PostgreSQL, plus the forward-only **schema rekeying engine** that
//! migrated the store from natural-key to surrogate-key addressing.
//!
//! The rekeying engine performs build-copy-swap table rebuilds inside a
//! single transaction: create a shadow table with the new schema, copy
//! every row through a transform, swap the shadow into place, and
//! propagate the parent's new surrogate keys into every child's foreign
//! key via a bounded remap cache.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vaultmeta::{Config, Result};
//!
//! fn main() -> Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let store = config.open()?;
//!     let outcome = config.rekey_migration().upgrade(store.as_ref())?;
//!     println!("rekeyed {} tables", outcome.tables.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod migrations;
pub mod rekey;
pub mod store;
pub mod verify;

// Re-exports for convenient access
pub use crate::config::{Config, MigrationConfig, StoreConfig};
pub use crate::connection::{StoreConnection, TransactionGuard};
pub use crate::core::{ColumnDef, ColumnType, ResultSet, RowView, SqlValue, TableSchema};
pub use crate::dialect::{DialectCapabilities, Engine};
pub use crate::error::{Result, StoreError};
pub use crate::migrations::VersionUidRekey;
pub use crate::rekey::{
    MigrationStep, Orchestrator, RekeyOutcome, RekeyPlan, RemapCache, TableRebuilder,
};
pub use crate::store::VersionUidFormat;
