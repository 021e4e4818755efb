//! PostgreSQL driver.
//!
//! PostgreSQL can rename and drop constraints in place, but the names of
//! index-backed constraints (PRIMARY KEY, UNIQUE) share the global relation
//! namespace with tables and indexes. The rekeying orchestrator therefore
//! renames the old constraints out of the way before rebuilt tables claim
//! the same names; this driver supplies the introspection and the renames.

use std::cell::RefCell;

use postgres::types::ToSql;
use postgres::{Client, NoTls};
use tracing::debug;

use crate::connection::StoreConnection;
use crate::core::identifier::quote_ident;
use crate::core::schema::{ColumnDef, ColumnType, IndexDef, TableSchema};
use crate::core::value::{ResultSet, SqlValue};
use crate::dialect::Engine;
use crate::error::{Result, StoreError};

/// PostgreSQL-backed store connection.
pub struct PostgresStore {
    client: RefCell<Client>,
}

impl PostgresStore {
    /// Connect using a libpq-style connection string
    /// (`host=... port=... dbname=... user=... password=...`).
    pub fn connect(params: &str) -> Result<Self> {
        let client = Client::connect(params, NoTls)?;
        Ok(Self {
            client: RefCell::new(client),
        })
    }

    fn exec(&self, sql: &str) -> Result<()> {
        debug!(sql = %sql, "postgres execute");
        self.client.borrow_mut().batch_execute(sql)?;
        Ok(())
    }

    /// Render a column type, honoring engine-assigned identity columns.
    fn render_type(col: &ColumnDef) -> String {
        let base = match col.col_type {
            ColumnType::Integer => "integer".to_string(),
            ColumnType::BigInt => "bigint".to_string(),
            ColumnType::String(len) => format!("varchar({})", len),
            ColumnType::DateTime => "timestamp without time zone".to_string(),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Binary(_) => "bytea".to_string(),
        };
        if col.autoincrement {
            format!("{} GENERATED BY DEFAULT AS IDENTITY", base)
        } else {
            base
        }
    }

    fn generate_ddl(schema: &TableSchema) -> Result<String> {
        let mut lines = Vec::new();

        for col in &schema.columns {
            let nullable = if col.nullable { "" } else { " NOT NULL" };
            lines.push(format!(
                "    {} {}{}",
                quote_ident(&col.name)?,
                Self::render_type(col),
                nullable
            ));
        }

        let pk_cols = schema
            .primary_key
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        lines.push(format!(
            "    CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&schema.primary_key.name)?,
            pk_cols
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

    /// Bind one value as a typed parameter matching the target column type.
    fn bind_value(col: &ColumnDef, value: &SqlValue) -> Result<Box<dyn ToSql + Sync>> {
        let param: Box<dyn ToSql + Sync> = match (col.col_type, value) {
            (ColumnType::Integer, SqlValue::Int(v)) => {
                let narrowed = i32::try_from(*v).map_err(|_| {
                    StoreError::Integrity(format!(
                        "value {} overflows integer column '{}'",
                        v, col.name
                    ))
                })?;
                Box::new(narrowed)
            }
            (ColumnType::Integer, SqlValue::Null) => Box::new(Option::<i32>::None),
            (ColumnType::BigInt, SqlValue::Int(v)) => Box::new(*v),
            (ColumnType::BigInt, SqlValue::Null) => Box::new(Option::<i64>::None),
            (ColumnType::String(_), SqlValue::Text(v)) => Box::new(v.clone()),
            (ColumnType::String(_), SqlValue::Null) => Box::new(Option::<String>::None),
            (ColumnType::DateTime, SqlValue::DateTime(v)) => Box::new(*v),
            (ColumnType::DateTime, SqlValue::Text(v)) => {
                // Datetimes read from SQLite-era stores arrive as text.
                let parsed = chrono::NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S%.f")
                    .map_err(|e| {
                        StoreError::Integrity(format!(
                            "column '{}': cannot parse datetime {:?}: {}",
                            col.name, v, e
                        ))
                    })?;
                Box::new(parsed)
            }
            (ColumnType::DateTime, SqlValue::Null) => {
                Box::new(Option::<chrono::NaiveDateTime>::None)
            }
            (ColumnType::Boolean, SqlValue::Bool(v)) => Box::new(*v),
            (ColumnType::Boolean, SqlValue::Int(v)) => Box::new(*v != 0),
            (ColumnType::Boolean, SqlValue::Null) => Box::new(Option::<bool>::None),
            (ColumnType::Binary(_), SqlValue::Bytes(v)) => Box::new(v.clone()),
            (ColumnType::Binary(_), SqlValue::Null) => Box::new(Option::<Vec<u8>>::None),
            (col_type, value) => {
                return Err(StoreError::Integrity(format!(
                    "column '{}' ({:?}) cannot accept value {:?}",
                    col.name, col_type, value
                )))
            }
        };
        Ok(param)
    }

    fn read_value(row: &postgres::Row, index: usize) -> Result<SqlValue> {
        use postgres::types::Type;

        let ty = row.columns()[index].type_();
        let value = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(index)?
                .map_or(SqlValue::Null, |v| SqlValue::Int(v as i64))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(index)?
                .map_or(SqlValue::Null, |v| SqlValue::Int(v as i64))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(index)?
                .map_or(SqlValue::Null, SqlValue::Int)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(index)?
                .map_or(SqlValue::Null, |v| SqlValue::Float(v as f64))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(index)?
                .map_or(SqlValue::Null, SqlValue::Float)
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(index)?
                .map_or(SqlValue::Null, SqlValue::Bool)
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR {
            row.try_get::<_, Option<String>>(index)?
                .map_or(SqlValue::Null, SqlValue::Text)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(index)?
                .map_or(SqlValue::Null, SqlValue::Bytes)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<chrono::NaiveDateTime>>(index)?
                .map_or(SqlValue::Null, SqlValue::DateTime)
        } else {
            return Err(StoreError::Integrity(format!(
                "unsupported column type {} in result row",
                ty
            )));
        };
        Ok(value)
    }

    fn build_insert(table: &str, columns: &[&ColumnDef]) -> Result<String> {
        let col_list = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("${}", i))
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

impl StoreConnection for PostgresStore {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn begin(&self) -> Result<()> {
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
        self.exec(&format!("DROP INDEX {}", quote_ident(index)?))
    }

    fn drop_constraint(&self, table: &str, constraint: &str) -> Result<()> {
        self.exec(&format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            quote_ident(table)?,
            quote_ident(constraint)?
        ))
    }

    fn rename_constraint(&self, table: &str, from: &str, to: &str) -> Result<()> {
        self.exec(&format!(
            "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
            quote_ident(table)?,
            quote_ident(from)?,
            quote_ident(to)?
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
        let row = self.client.borrow_mut().query_one(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )",
            &[&table],
        )?;
        Ok(row.get(0))
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let rows = self.client.borrow_mut().query(
            "SELECT column_name FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
            &[&table],
        )?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn constraint_names(&self, table: &str) -> Result<Vec<String>> {
        let rows = self.client.borrow_mut().query(
            "SELECT c.conname FROM pg_constraint c
             JOIN pg_class r ON r.oid = c.conrelid
             JOIN pg_namespace n ON n.oid = r.relnamespace
             WHERE r.relname = $1
               AND n.nspname = current_schema()
               AND c.contype IN ('p', 'u')
             ORDER BY c.conname",
            &[&table],
        )?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn invalidate_reflection(&self, _table: &str) {
        // Reflection queries are live; nothing is cached.
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
        debug!(sql = %sql, "postgres select");

        let rows = self.client.borrow_mut().query(&sql, &[])?;
        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };

        let mut result_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                values.push(Self::read_value(row, i)?);
            }
            result_rows.push(values);
        }

        Ok(ResultSet::new(columns, result_rows))
    }

    fn find_i64(
        &self,
        table: &str,
        key_column: &str,
        key: &SqlValue,
        value_column: &str,
    ) -> Result<Option<i64>> {
        // The key column is cast so the parameter's wire type is stable
        // regardless of the column's declared width.
        let (key_expr, param): (String, Box<dyn ToSql + Sync>) = match key {
            SqlValue::Int(v) => (
                format!("{}::bigint", quote_ident(key_column)?),
                Box::new(*v),
            ),
            SqlValue::Text(v) => (
                format!("{}::text", quote_ident(key_column)?),
                Box::new(v.clone()),
            ),
            other => {
                return Err(StoreError::Integrity(format!(
                    "unsupported lookup key {:?}",
                    other
                )))
            }
        };
        let sql = format!(
            "SELECT {}::bigint FROM {} WHERE {} = $1 LIMIT 1",
            quote_ident(value_column)?,
            quote_ident(table)?,
            key_expr
        );

        let rows = self.client.borrow_mut().query(&sql, &[param.as_ref()])?;
        Ok(rows.first().map(|row| row.get(0)))
    }

    fn insert(&self, table: &str, columns: &[&ColumnDef], values: &[SqlValue]) -> Result<()> {
        let sql = Self::build_insert(table, columns)?;
        let params: Vec<Box<dyn ToSql + Sync>> = columns
            .iter()
            .zip(values)
            .map(|(col, value)| Self::bind_value(col, value))
            .collect::<Result<Vec<_>>>()?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p.as_ref()).collect();
        self.client.borrow_mut().execute(&sql, &param_refs)?;
        Ok(())
    }

    fn insert_returning(
        &self,
        table: &str,
        columns: &[&ColumnDef],
        values: &[SqlValue],
        returning: &str,
    ) -> Result<i64> {
        let sql = format!(
            "{} RETURNING {}::bigint",
            Self::build_insert(table, columns)?,
            quote_ident(returning)?
        );
        let params: Vec<Box<dyn ToSql + Sync>> = columns
            .iter()
            .zip(values)
            .map(|(col, value)| Self::bind_value(col, value))
            .collect::<Result<Vec<_>>>()?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p.as_ref()).collect();
        let row = self.client.borrow_mut().query_one(&sql, &param_refs)?;
        Ok(row.get(0))
    }

    fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let row = self.client.borrow_mut().query_one(&sql, &[])?;
        Ok(row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{fk_name, pk_name, uq_name, PrimaryKeyDef, ReferentialAction};
    use crate::core::schema::{ForeignKeyDef, UniqueDef};

    fn parent_table() -> TableSchema {
        TableSchema {
            name: "versions_new".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer).autoincrement(),
                ColumnDef::new("uid", ColumnType::String(255)),
                ColumnDef::new("storage_id", ColumnType::Integer),
            ],
            primary_key: PrimaryKeyDef {
                name: pk_name("versions"),
                columns: vec!["id".to_string()],
            },
            foreign_keys: vec![ForeignKeyDef {
                name: fk_name("versions", "storage_id", "storages"),
                columns: vec!["storage_id".to_string()],
                ref_table: "storages".to_string(),
                ref_columns: vec!["id".to_string()],
                on_delete: Some(ReferentialAction::Cascade),
            }],
            uniques: vec![UniqueDef {
                name: uq_name("versions", "uid"),
                columns: vec!["uid".to_string()],
            }],
            indexes: vec![],
        }
    }

    #[test]
    fn test_ddl_names_final_constraints_on_shadow_table() {
        let ddl = PostgresStore::generate_ddl(&parent_table()).unwrap();
        assert!(ddl.starts_with("CREATE TABLE \"versions_new\""));
        assert!(ddl.contains("\"id\" integer GENERATED BY DEFAULT AS IDENTITY NOT NULL"));
        assert!(ddl.contains("CONSTRAINT \"pk_versions\" PRIMARY KEY (\"id\")"));
        assert!(ddl.contains("CONSTRAINT \"uq_versions_uid\" UNIQUE (\"uid\")"));
        assert!(ddl.contains(
            "CONSTRAINT \"fk_versions_storage_id_storages\" FOREIGN KEY (\"storage_id\") \
             REFERENCES \"storages\" (\"id\") ON DELETE CASCADE"
        ));
    }

    #[test]
    fn test_bind_value_narrows_integer() {
        let col = ColumnDef::new("storage_id", ColumnType::Integer);
        assert!(PostgresStore::bind_value(&col, &SqlValue::Int(7)).is_ok());
        assert!(PostgresStore::bind_value(&col, &SqlValue::Int(i64::MAX)).is_err());
    }

    #[test]
    fn test_bind_value_rejects_type_mismatch() {
        let col = ColumnDef::new("uid", ColumnType::String(255));
        assert!(PostgresStore::bind_value(&col, &SqlValue::Int(1)).is_err());
    }

    #[test]
    fn test_build_insert_placeholders() {
        let table = parent_table();
        let cols = table.insert_columns();
        let sql = PostgresStore::build_insert("versions_new", &cols).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"versions_new\" (\"uid\", \"storage_id\") VALUES ($1, $2)"
        );
    }
}
