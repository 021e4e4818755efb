//! Core abstractions shared by the store and the rekeying engine.
//!
//! - [`schema`]: declarative table, column, and constraint descriptors
//! - [`value`]: SQL value representation and row access
//! - [`identifier`]: identifier validation and quoting
//!
//! The core module defines database-agnostic types that are implemented
//! against by driver modules (`drivers::sqlite`, `drivers::postgres`). Core
//! logic never generates SQL itself; it speaks through the
//! [`StoreConnection`](crate::connection::StoreConnection) trait.

pub mod identifier;
pub mod schema;
pub mod value;

pub use schema::{
    fk_name, ix_name, pk_name, uq_name, ColumnDef, ColumnType, ForeignKeyDef, IndexDef,
    PrimaryKeyDef, ReferentialAction, TableSchema, UniqueDef,
};
pub use value::{ResultSet, RowView, SqlValue};
