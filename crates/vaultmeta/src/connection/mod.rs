//! The connection abstraction the rekeying engine is written against.
//!
//! [`StoreConnection`] is the full set of operations the engine consumes:
//! DDL, schema reflection, constraint introspection, row iteration, and
//! inserts, plus explicit transaction control. Driver modules implement it
//! per engine; the engine itself never sees SQL.
//!
//! All operations are blocking and the trait is used from a single thread:
//! correctness of an in-place schema change depends on no other writer
//! observing an intermediate state, so there is nothing to parallelize.

use crate::core::schema::{ColumnDef, IndexDef, TableSchema};
use crate::core::value::{ResultSet, SqlValue};
use crate::dialect::{DialectCapabilities, Engine};
use crate::error::Result;

/// Operations the migration engine needs from a database connection.
pub trait StoreConnection {
    /// The engine behind this connection.
    fn engine(&self) -> Engine;

    /// Capability descriptor for this connection's engine.
    fn capabilities(&self) -> DialectCapabilities {
        self.engine().capabilities()
    }

    // ===== Transaction control =====

    /// Begin a transaction.
    fn begin(&self) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&self) -> Result<()>;

    // ===== Schema operations =====

    /// Create a table from a descriptor, including its primary key,
    /// foreign key, and unique constraints (but not its indexes).
    fn create_table(&self, schema: &TableSchema) -> Result<()>;

    /// Drop a table.
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Rename a table.
    fn rename_table(&self, from: &str, to: &str) -> Result<()>;

    /// Create an index on a table.
    fn create_index(&self, table: &str, index: &IndexDef) -> Result<()>;

    /// Drop an index by name.
    fn drop_index(&self, table: &str, index: &str) -> Result<()>;

    /// Drop a named constraint from a table.
    fn drop_constraint(&self, table: &str, constraint: &str) -> Result<()>;

    /// Rename a named constraint on a table.
    fn rename_constraint(&self, table: &str, from: &str, to: &str) -> Result<()>;

    /// Drop a column from a table.
    fn drop_column(&self, table: &str, column: &str) -> Result<()>;

    // ===== Reflection =====

    /// Check whether a table exists.
    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Column names of a table, in ordinal order. Drivers may cache this;
    /// the rebuild sequence invalidates the cache after swapping tables.
    fn column_names(&self, table: &str) -> Result<Vec<String>>;

    /// Names of the table's index-backed constraints (primary key and
    /// unique constraints). Engines without constraint introspection
    /// return an empty list.
    fn constraint_names(&self, table: &str) -> Result<Vec<String>>;

    /// Drop any cached schema reflection for a table so subsequent calls
    /// observe the live structure.
    fn invalidate_reflection(&self, table: &str);

    // ===== Data operations =====

    /// Select every row of a table, ordered by the given columns for a
    /// stable copy order.
    fn select_all(&self, table: &str, order_by: &[&str]) -> Result<ResultSet>;

    /// Look up a single integer `value_column` in the first row where
    /// `key_column` equals `key`. Returns `None` when no row matches.
    fn find_i64(
        &self,
        table: &str,
        key_column: &str,
        key: &SqlValue,
        value_column: &str,
    ) -> Result<Option<i64>>;

    /// Insert one row. Column definitions (not just names) are passed so
    /// strictly-typed wire protocols can bind parameters correctly.
    fn insert(&self, table: &str, columns: &[&ColumnDef], values: &[SqlValue]) -> Result<()>;

    /// Insert one row and return the engine-assigned integer value of
    /// `returning` (the autoincrement surrogate key).
    fn insert_returning(
        &self,
        table: &str,
        columns: &[&ColumnDef],
        values: &[SqlValue],
        returning: &str,
    ) -> Result<i64>;

    /// Exact row count of a table.
    fn row_count(&self, table: &str) -> Result<i64>;
}

/// Scoped transaction handle with guaranteed rollback on any exit path that
/// is not an explicit [`commit`](TransactionGuard::commit).
///
/// The orchestrator wraps the entire migration run in one guard; a failure
/// anywhere (including a panic unwinding through the guard) aborts every
/// prior step atomically.
pub struct TransactionGuard<'a> {
    conn: &'a dyn StoreConnection,
    committed: bool,
}

impl<'a> TransactionGuard<'a> {
    /// Begin a transaction on the connection.
    pub fn begin(conn: &'a dyn StoreConnection) -> Result<Self> {
        conn.begin()?;
        Ok(Self {
            conn,
            committed: false,
        })
    }

    /// Commit the transaction, consuming the guard.
    pub fn commit(mut self) -> Result<()> {
        self.conn.commit()?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(err) = self.conn.rollback() {
                tracing::warn!("transaction rollback failed: {}", err);
            }
        }
    }
}
