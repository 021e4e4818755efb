//! SQLite driver.
//!
//! SQLite cannot rename or drop constraints in place; they live and die with
//! the table definition, which is exactly what the build-copy-swap rebuild
//! exploits. Foreign key checks are deferred to commit for the duration of a
//! transaction (`PRAGMA defer_foreign_keys`), so dropping a referenced table
//! mid-rebuild does not trip enforcement before the rebuilt children land.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::debug;

use crate::connection::StoreConnection;
use crate::core::identifier::quote_ident;
use crate::core::schema::{ColumnDef, ColumnType, IndexDef, TableSchema};
use crate::core::value::{ResultSet, SqlValue};
use crate::dialect::Engine;
use crate::error::{Result, StoreError};

/// Timestamp text format, compatible with what SQLAlchemy-era stores wrote.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// SQLite-backed store connection.
pub struct SqliteStore {
    conn: Connection,
    /// Cached `PRAGMA table_info` reflection, invalidated on table swap.
    reflection: RefCell<HashMap<String, Vec<String>>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store. Used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self {
            conn,
            reflection: RefCell::new(HashMap::new()),
        })
    }

    fn exec(&self, sql: &str) -> Result<()> {
        debug!(sql = %sql, "sqlite execute");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Render a column type.
    fn render_type(col_type: ColumnType) -> String {
        match col_type {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::String(len) => format!("VARCHAR({})", len),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Binary(_) => "BLOB".to_string(),
        }
    }

    fn generate_ddl(schema: &TableSchema) -> Result<String> {
        let mut lines = Vec::new();

        for col in &schema.columns {
            let nullable = if col.nullable { "" } else { " NOT NULL" };
            lines.push(format!(
                "    {} {}{}",
                quote_ident(&col.name)?,
                Self::render_type(col.col_type),
                nullable
            ));
        }

        // AUTOINCREMENT is only valid on a single-column INTEGER primary key.
        let pk = &schema.primary_key;
        let autoincrement_pk = pk.columns.len() == 1
            && schema
                .columns
                .iter()
                .any(|c| c.name == pk.columns[0] && c.autoincrement);
        let pk_cols = pk
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        lines.push(format!(
            "    CONSTRAINT {} PRIMARY KEY ({}{})",
            quote_ident(&pk.name)?,
            pk_cols,
            if autoincrement_pk { " AUTOINCREMENT" } else { "" }
        ));

        for uq in &schema.uniques {
            let cols = uq
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            lines.push(format!(
                "    CONSTRAINT {} UNIQUE ({})",
                quote_ident(&uq.name)?,
                cols
            ));
        }

        for fk in &schema.foreign_keys {
            let cols = fk
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            let ref_cols = fk
                .ref_columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            let on_delete = match fk.on_delete {
                Some(action) => format!(" ON DELETE {}", action.as_sql()),
                None => String::new(),
            };
            lines.push(format!(
                "    CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}){}",
                quote_ident(&fk.name)?,
                cols,
                quote_ident(&fk.ref_table)?,
                ref_cols,
                on_delete
            ));
        }

        Ok(format!(
            "CREATE TABLE {} (\n{}\n)",
            quote_ident(&schema.name)?,
            lines.join(",\n")
        ))
    }

    fn bind_value(value: &SqlValue) -> rusqlite::types::Value {
        match value {
            SqlValue::Null => rusqlite::types::Value::Null,
            SqlValue::Bool(v) => rusqlite::types::Value::Integer(i64::from(*v)),
            SqlValue::Int(v) => rusqlite::types::Value::Integer(*v),
            SqlValue::Float(v) => rusqlite::types::Value::Real(*v),
            SqlValue::Text(v) => rusqlite::types::Value::Text(v.clone()),
            SqlValue::Bytes(v) => rusqlite::types::Value::Blob(v.clone()),
            SqlValue::DateTime(v) => {
                rusqlite::types::Value::Text(v.format(DATETIME_FORMAT).to_string())
            }
        }
    }

    fn read_value(value: ValueRef<'_>) -> SqlValue {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Int(v),
            ValueRef::Real(v) => SqlValue::Float(v),
            ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => SqlValue::Bytes(v.to_vec()),
        }
    }

    fn build_insert(table: &str, columns: &[&ColumnDef]) -> Result<String> {
        let col_list = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table)?,
            col_list,
            placeholders
        ))
    }
}

impl StoreConnection for SqliteStore {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn begin(&self) -> Result<()> {
        // defer_foreign_keys resets itself at commit/rollback.
        self.exec("PRAGMA defer_foreign_keys = ON")?;
        self.exec("BEGIN")
    }

    fn commit(&self) -> Result<()> {
        self.exec("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.exec("ROLLBACK")
    }

    fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let ddl = Self::generate_ddl(schema)?;
        self.exec(&ddl)?;
        debug!("created table {}", schema.name);
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.exec(&format!("DROP TABLE {}", quote_ident(table)?))
    }

    fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        self.exec(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(from)?,
            quote_ident(to)?
        ))
    }

    fn create_index(&self, table: &str, index: &IndexDef) -> Result<()> {
        let cols = index
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let unique = if index.unique { "UNIQUE " } else { "" };
        self.exec(&format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            quote_ident(&index.name)?,
            quote_ident(table)?,
            cols
        ))
    }

    fn drop_index(&self, _table: &str, index: &str) -> Result<()> {
        // Index names are database-global in SQLite.
        self.exec(&format!("DROP INDEX {}", quote_ident(index)?))
    }

    fn drop_constraint(&self, _table: &str, constraint: &str) -> Result<()> {
        Err(StoreError::unsupported(
            "sqlite",
            format!("drop constraint '{}' (requires table rebuild)", constraint),
        ))
    }

    fn rename_constraint(&self, _table: &str, from: &str, _to: &str) -> Result<()> {
        Err(StoreError::unsupported(
            "sqlite",
            format!("rename constraint '{}' (requires table rebuild)", from),
        ))
    }

    fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        self.exec(&format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table)?,
            quote_ident(column)?
        ))
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.reflection.borrow().get(table) {
            return Ok(cached.clone());
        }

        let sql = format!("PRAGMA table_info({})", quote_ident(table)?);
        let mut stmt = self.conn.prepare(&sql)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.reflection
            .borrow_mut()
            .insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    fn constraint_names(&self, _table: &str) -> Result<Vec<String>> {
        // SQLite offers no constraint-name introspection, and none is
        // needed: its constraint names are not globally scoped.
        Ok(Vec::new())
    }

    fn invalidate_reflection(&self, table: &str) {
        self.reflection.borrow_mut().remove(table);
    }

    fn select_all(&self, table: &str, order_by: &[&str]) -> Result<ResultSet> {
        let mut sql = format!("SELECT * FROM {}", quote_ident(table)?);
        if !order_by.is_empty() {
            let cols = order_by
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", cols));
        }
        debug!(sql = %sql, "sqlite select");

        let mut stmt = self.conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = columns.len();

        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(Self::read_value(row.get_ref(i)?));
                }
                Ok(values)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ResultSet::new(columns, rows))
    }

    fn find_i64(
        &self,
        table: &str,
        key_column: &str,
        key: &SqlValue,
        value_column: &str,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
            quote_ident(value_column)?,
            quote_ident(table)?,
            quote_ident(key_column)?
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([Self::bind_value(key)])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn insert(&self, table: &str, columns: &[&ColumnDef], values: &[SqlValue]) -> Result<()> {
        let sql = Self::build_insert(table, columns)?;
        let params: Vec<rusqlite::types::Value> = values.iter().map(Self::bind_value).collect();
        self.conn
            .execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(())
    }

    fn insert_returning(
        &self,
        table: &str,
        columns: &[&ColumnDef],
        values: &[SqlValue],
        _returning: &str,
    ) -> Result<i64> {
        // The surrogate key column aliases the rowid, so last_insert_rowid
        // is exactly the value the insert assigned.
        self.insert(table, columns, values)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Test-only escape hatch for manipulating state behind the trait's back.
    pub(crate) fn execute_raw(&self, sql: &str) {
        self.conn.execute_batch(sql).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{pk_name, PrimaryKeyDef};

    fn small_table() -> TableSchema {
        TableSchema {
            name: "items".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer).autoincrement(),
                ColumnDef::new("label", ColumnType::String(64)),
            ],
            primary_key: PrimaryKeyDef {
                name: pk_name("items"),
                columns: vec!["id".to_string()],
            },
            foreign_keys: vec![],
            uniques: vec![],
            indexes: vec![],
        }
    }

    #[test]
    fn test_ddl_renders_autoincrement_pk() {
        let ddl = SqliteStore::generate_ddl(&small_table()).unwrap();
        assert!(ddl.contains("\"id\" INTEGER NOT NULL"));
        assert!(ddl.contains("CONSTRAINT \"pk_items\" PRIMARY KEY (\"id\" AUTOINCREMENT)"));
    }

    #[test]
    fn test_create_insert_select_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let table = small_table();
        store.create_table(&table).unwrap();

        let cols = table.insert_columns();
        store
            .insert("items", &cols, &[SqlValue::Text("a".into())])
            .unwrap();
        let id = store
            .insert_returning("items", &cols, &[SqlValue::Text("b".into())], "id")
            .unwrap();
        assert_eq!(id, 2);

        let rs = store.select_all("items", &["id"]).unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(store.row_count("items").unwrap(), 2);
    }

    #[test]
    fn test_reflection_cache_invalidation() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(&small_table()).unwrap();

        assert_eq!(store.column_names("items").unwrap(), vec!["id", "label"]);

        // Swap the table out from under the cache.
        store.drop_table("items").unwrap();
        let mut other = small_table();
        other.columns.push(ColumnDef::new("extra", ColumnType::Integer).nullable());
        store.create_table(&other).unwrap();

        // Stale until invalidated.
        assert_eq!(store.column_names("items").unwrap(), vec!["id", "label"]);
        store.invalidate_reflection("items");
        assert_eq!(
            store.column_names("items").unwrap(),
            vec!["id", "label", "extra"]
        );
    }

    #[test]
    fn test_find_i64() {
        let store = SqliteStore::open_in_memory().unwrap();
        let table = small_table();
        store.create_table(&table).unwrap();
        let cols = table.insert_columns();
        store
            .insert("items", &cols, &[SqlValue::Text("needle".into())])
            .unwrap();

        let found = store
            .find_i64("items", "label", &SqlValue::Text("needle".into()), "id")
            .unwrap();
        assert_eq!(found, Some(1));

        let missing = store
            .find_i64("items", "label", &SqlValue::Text("nope".into()), "id")
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_constraint_ops_unsupported() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.drop_constraint("items", "pk_items").is_err());
        assert!(store
            .rename_constraint("items", "pk_items", "pk_items_old")
            .is_err());
    }

    #[test]
    fn test_rollback_restores_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        let table = small_table();
        store.create_table(&table).unwrap();

        store.begin().unwrap();
        store
            .insert("items", &table.insert_columns(), &[SqlValue::Text("x".into())])
            .unwrap();
        store.rollback().unwrap();

        assert_eq!(store.row_count("items").unwrap(), 0);
    }
}
