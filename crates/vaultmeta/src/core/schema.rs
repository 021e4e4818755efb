//! Declarative schema descriptors for tables, columns, indexes, and constraints.
//!
//! These types are the engine's single source of schema truth: a table's
//! desired end-state is declared statically and validated before execution,
//! instead of being reflected from the live database mid-migration.
//!
//! Constraint names are explicit everywhere. A rebuilt table is created under
//! a shadow name but declares the constraint names of its *final* name, which
//! is what forces the orchestrator's rename pre-pass on engines with a global
//! namespace for index-backed constraint names.

use serde::{Deserialize, Serialize};

use crate::core::identifier::validate_identifier;
use crate::error::{Result, StoreError};

/// Column data type. A small fixed set - the metadata store needs no more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Variable-length string with a maximum length.
    String(u32),
    /// Timestamp without timezone.
    DateTime,
    /// Boolean.
    Boolean,
    /// Variable-length binary with a maximum length.
    Binary(u32),
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,

    /// Data type.
    pub col_type: ColumnType,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Whether the column is an engine-assigned autoincrement key.
    pub autoincrement: bool,
}

impl ColumnDef {
    /// Create a NOT NULL, non-autoincrement column.
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable: false,
            autoincrement: false,
        }
    }

    /// Mark the column as nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark the column as an autoincrement surrogate key.
    #[must_use]
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }
}

/// Named primary key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyDef {
    /// Constraint name.
    pub name: String,

    /// Key column names, in order.
    pub columns: Vec<String>,
}

/// Referential action for foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    Restrict,
}

impl ReferentialAction {
    /// SQL keyword form.
    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::Restrict => "RESTRICT",
        }
    }
}

/// Named foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Constraint name.
    pub name: String,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: Option<ReferentialAction>,
}

/// Named unique constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueDef {
    /// Constraint name.
    pub name: String,

    /// Constrained column names.
    pub columns: Vec<String>,
}

/// Named index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,

    /// Indexed column names.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub unique: bool,
}

/// Declarative definition of a table's desired end-state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,

    /// Column definitions, in order.
    pub columns: Vec<ColumnDef>,

    /// Primary key constraint.
    pub primary_key: PrimaryKeyDef,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKeyDef>,

    /// Unique constraints.
    pub uniques: Vec<UniqueDef>,

    /// Secondary indexes.
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    /// All column names, in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns that receive explicit values on insert (everything that is
    /// not an engine-assigned autoincrement key).
    pub fn insert_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| !c.autoincrement).collect()
    }

    /// Check whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Clone this schema under a different table name, keeping every
    /// constraint and index name unchanged. Used for shadow-table creation.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let mut schema = self.clone();
        schema.name = name.into();
        schema
    }

    /// Constraint names that are backed by an index (primary key and unique
    /// constraints). On PostgreSQL these occupy the global relation
    /// namespace and may need renaming out of the way before a rebuild.
    pub fn index_backed_constraint_names(&self) -> Vec<&str> {
        std::iter::once(self.primary_key.name.as_str())
            .chain(self.uniques.iter().map(|u| u.name.as_str()))
            .collect()
    }

    /// Validate the descriptor: identifiers well-formed, column names
    /// unique, and every constraint/index column present.
    ///
    /// Runs before any database mutation; a malformed descriptor is a fatal
    /// configuration error.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;

        let mut seen = std::collections::HashSet::new();
        for col in &self.columns {
            validate_identifier(&col.name)?;
            if !seen.insert(col.name.as_str()) {
                return Err(StoreError::schema(
                    &self.name,
                    format!("duplicate column '{}'", col.name),
                ));
            }
        }

        if self.primary_key.columns.is_empty() {
            return Err(StoreError::schema(&self.name, "primary key has no columns"));
        }
        self.check_columns_exist("primary key", &self.primary_key.columns)?;

        for fk in &self.foreign_keys {
            validate_identifier(&fk.name)?;
            validate_identifier(&fk.ref_table)?;
            self.check_columns_exist(&fk.name, &fk.columns)?;
            if fk.columns.len() != fk.ref_columns.len() {
                return Err(StoreError::schema(
                    &self.name,
                    format!(
                        "foreign key '{}' has {} columns but references {}",
                        fk.name,
                        fk.columns.len(),
                        fk.ref_columns.len()
                    ),
                ));
            }
        }

        for uq in &self.uniques {
            validate_identifier(&uq.name)?;
            self.check_columns_exist(&uq.name, &uq.columns)?;
        }

        for idx in &self.indexes {
            validate_identifier(&idx.name)?;
            self.check_columns_exist(&idx.name, &idx.columns)?;
        }

        Ok(())
    }

    fn check_columns_exist(&self, owner: &str, columns: &[String]) -> Result<()> {
        for col in columns {
            if !self.has_column(col) {
                return Err(StoreError::schema(
                    &self.name,
                    format!("{} references unknown column '{}'", owner, col),
                ));
            }
        }
        Ok(())
    }
}

// Constraint naming convention, matching the store's historical names:
// pk_<table>, fk_<table>_<col>_<ref>, uq_<table>_<col>, ix_<table>_<col>.
// Multi-column constraints are named after their first column.

/// Primary key constraint name for a table.
pub fn pk_name(table: &str) -> String {
    format!("pk_{}", table)
}

/// Foreign key constraint name.
pub fn fk_name(table: &str, column: &str, ref_table: &str) -> String {
    format!("fk_{}_{}_{}", table, column, ref_table)
}

/// Unique constraint name.
pub fn uq_name(table: &str, column: &str) -> String {
    format!("uq_{}_{}", table, column)
}

/// Index name.
pub fn ix_name(table: &str, column: &str) -> String {
    format!("ix_{}_{}", table, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableSchema {
        TableSchema {
            name: "versions".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer).autoincrement(),
                ColumnDef::new("uid", ColumnType::String(255)),
            ],
            primary_key: PrimaryKeyDef {
                name: pk_name("versions"),
                columns: vec!["id".to_string()],
            },
            foreign_keys: vec![],
            uniques: vec![UniqueDef {
                name: uq_name("versions", "uid"),
                columns: vec!["uid".to_string()],
            }],
            indexes: vec![],
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample_table().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_column() {
        let mut table = sample_table();
        table
            .columns
            .push(ColumnDef::new("uid", ColumnType::Integer));
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate column"));
    }

    #[test]
    fn test_validate_rejects_unknown_pk_column() {
        let mut table = sample_table();
        table.primary_key.columns = vec!["missing".to_string()];
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("unknown column"));
    }

    #[test]
    fn test_validate_rejects_fk_arity_mismatch() {
        let mut table = sample_table();
        table.foreign_keys.push(ForeignKeyDef {
            name: fk_name("versions", "uid", "storages"),
            columns: vec!["uid".to_string()],
            ref_table: "storages".to_string(),
            ref_columns: vec!["id".to_string(), "name".to_string()],
            on_delete: None,
        });
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_insert_columns_skip_autoincrement() {
        let table = sample_table();
        let cols: Vec<&str> = table.insert_columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(cols, vec!["uid"]);
    }

    #[test]
    fn test_with_name_keeps_constraint_names() {
        let shadow = sample_table().with_name("versions_new");
        assert_eq!(shadow.name, "versions_new");
        assert_eq!(shadow.primary_key.name, "pk_versions");
    }

    #[test]
    fn test_index_backed_constraint_names() {
        let table = sample_table();
        assert_eq!(
            table.index_backed_constraint_names(),
            vec!["pk_versions", "uq_versions_uid"]
        );
    }

    #[test]
    fn test_naming_convention() {
        assert_eq!(pk_name("blocks"), "pk_blocks");
        assert_eq!(
            fk_name("blocks", "version_id", "versions"),
            "fk_blocks_version_id_versions"
        );
        assert_eq!(uq_name("versions", "uid"), "uq_versions_uid");
        assert_eq!(ix_name("labels", "value"), "ix_labels_value");
    }
}
