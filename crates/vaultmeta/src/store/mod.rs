//! The backup metadata store: schema definitions and initialization.
//!
//! Four related tables: a `storages` lookup table, the parent `versions`
//! table (one row per backup version), and the dependent `blocks` and
//! `labels` tables referencing it.
//!
//! Two shapes of the schema are described here:
//!
//! - the **legacy** shape, where `versions` is keyed directly by its natural
//!   integer identifier and children reference that identifier;
//! - the **current** shape, where `versions` has a surrogate integer primary
//!   key plus a distinct externally-facing string identifier, and children
//!   reference the surrogate key with cascading deletes.
//!
//! The rekeying migration in [`crate::migrations`] carries a store from the
//! first shape to the second.

use serde::{Deserialize, Serialize};

use crate::connection::StoreConnection;
use crate::core::schema::{
    fk_name, ix_name, pk_name, uq_name, ColumnDef, ColumnType, ForeignKeyDef, IndexDef,
    PrimaryKeyDef, ReferentialAction, TableSchema, UniqueDef,
};
use crate::error::{Result, StoreError};

/// Derivation of the externally-facing version identifier from the old
/// natural integer key.
///
/// The identifier is the zero-padded integer behind a prefix letter, e.g.
/// `V0000000001`. The derivation is injected rather than hard-coded so
/// callers with wider key spaces can substitute their own; this default
/// fails loudly when a key would not fit the width instead of truncating
/// or colliding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionUidFormat {
    /// Prefix letter.
    pub prefix: char,

    /// Zero-padded digit width.
    pub width: usize,
}

impl VersionUidFormat {
    /// Derive the string identifier for an old integer key.
    pub fn format(&self, old_key: i64) -> Result<String> {
        if old_key < 0 {
            return Err(StoreError::Integrity(format!(
                "version identifier {} is negative",
                old_key
            )));
        }
        let digits = format!("{}", old_key);
        if digits.len() > self.width {
            return Err(StoreError::Integrity(format!(
                "version identifier {} does not fit {} digits; configure a wider format",
                old_key, self.width
            )));
        }
        Ok(format!(
            "{}{:0width$}",
            self.prefix,
            old_key,
            width = self.width
        ))
    }
}

impl Default for VersionUidFormat {
    fn default() -> Self {
        Self {
            prefix: 'V',
            width: 10,
        }
    }
}

/// The `storages` lookup table. Identical in both schema shapes.
pub fn storages_table() -> TableSchema {
    TableSchema {
        name: "storages".to_string(),
        columns: vec![
            ColumnDef::new("id", ColumnType::Integer).autoincrement(),
            ColumnDef::new("name", ColumnType::String(255)),
        ],
        primary_key: PrimaryKeyDef {
            name: pk_name("storages"),
            columns: vec!["id".to_string()],
        },
        foreign_keys: vec![],
        uniques: vec![UniqueDef {
            name: uq_name("storages", "name"),
            columns: vec!["name".to_string()],
        }],
        indexes: vec![],
    }
}

/// Legacy `versions`: keyed directly by the natural integer identifier.
pub fn legacy_versions_table() -> TableSchema {
    TableSchema {
        name: "versions".to_string(),
        columns: vec![
            ColumnDef::new("uid", ColumnType::Integer),
            ColumnDef::new("date", ColumnType::DateTime),
            ColumnDef::new("name", ColumnType::String(255)),
            ColumnDef::new("snapshot", ColumnType::String(255)),
            ColumnDef::new("size", ColumnType::BigInt),
            ColumnDef::new("block_size", ColumnType::Integer),
            ColumnDef::new("storage_id", ColumnType::Integer),
            ColumnDef::new("status", ColumnType::Integer),
            ColumnDef::new("protected", ColumnType::Boolean),
            ColumnDef::new("bytes_read", ColumnType::BigInt).nullable(),
            ColumnDef::new("bytes_written", ColumnType::BigInt).nullable(),
            ColumnDef::new("bytes_dedup", ColumnType::BigInt).nullable(),
            ColumnDef::new("bytes_sparse", ColumnType::BigInt).nullable(),
            ColumnDef::new("duration", ColumnType::BigInt).nullable(),
        ],
        primary_key: PrimaryKeyDef {
            name: pk_name("versions"),
            columns: vec!["uid".to_string()],
        },
        foreign_keys: vec![ForeignKeyDef {
            name: fk_name("versions", "storage_id", "storages"),
            columns: vec!["storage_id".to_string()],
            ref_table: "storages".to_string(),
            ref_columns: vec!["id".to_string()],
            on_delete: None,
        }],
        uniques: vec![],
        indexes: vec![IndexDef {
            name: ix_name("versions", "name"),
            columns: vec!["name".to_string()],
            unique: false,
        }],
    }
}

/// Legacy `blocks`: references `versions` by the natural identifier.
pub fn legacy_blocks_table() -> TableSchema {
    TableSchema {
        name: "blocks".to_string(),
        columns: vec![
            ColumnDef::new("idx", ColumnType::Integer),
            ColumnDef::new("uid_right", ColumnType::Integer).nullable(),
            ColumnDef::new("uid_left", ColumnType::Integer).nullable(),
            ColumnDef::new("size", ColumnType::Integer).nullable(),
            ColumnDef::new("version_uid", ColumnType::Integer),
            ColumnDef::new("valid", ColumnType::Boolean),
            ColumnDef::new("checksum", ColumnType::Binary(64)).nullable(),
        ],
        primary_key: PrimaryKeyDef {
            name: pk_name("blocks"),
            columns: vec!["version_uid".to_string(), "idx".to_string()],
        },
        foreign_keys: vec![ForeignKeyDef {
            name: fk_name("blocks", "version_uid", "versions"),
            columns: vec!["version_uid".to_string()],
            ref_table: "versions".to_string(),
            ref_columns: vec!["uid".to_string()],
            on_delete: None,
        }],
        uniques: vec![],
        indexes: vec![
            IndexDef {
                name: ix_name("blocks", "checksum"),
                columns: vec!["checksum".to_string()],
                unique: false,
            },
            IndexDef {
                name: ix_name("blocks", "uid_left"),
                columns: vec!["uid_left".to_string(), "uid_right".to_string()],
                unique: false,
            },
        ],
    }
}

/// Legacy `labels`: references `versions` by the natural identifier.
pub fn legacy_labels_table() -> TableSchema {
    TableSchema {
        name: "labels".to_string(),
        columns: vec![
            ColumnDef::new("version_uid", ColumnType::Integer),
            ColumnDef::new("name", ColumnType::String(255)),
            ColumnDef::new("value", ColumnType::String(255)),
        ],
        primary_key: PrimaryKeyDef {
            name: pk_name("labels"),
            columns: vec!["version_uid".to_string(), "name".to_string()],
        },
        foreign_keys: vec![ForeignKeyDef {
            name: fk_name("labels", "version_uid", "versions"),
            columns: vec!["version_uid".to_string()],
            ref_table: "versions".to_string(),
            ref_columns: vec!["uid".to_string()],
            on_delete: None,
        }],
        uniques: vec![],
        indexes: vec![IndexDef {
            name: ix_name("labels", "value"),
            columns: vec!["value".to_string()],
            unique: false,
        }],
    }
}

/// Current `versions`: surrogate integer primary key plus a unique,
/// externally-facing string identifier.
pub fn versions_table() -> TableSchema {
    TableSchema {
        name: "versions".to_string(),
        columns: vec![
            ColumnDef::new("id", ColumnType::Integer).autoincrement(),
            ColumnDef::new("uid", ColumnType::String(255)),
            ColumnDef::new("date", ColumnType::DateTime),
            ColumnDef::new("volume", ColumnType::String(255)),
            ColumnDef::new("snapshot", ColumnType::String(255)),
            ColumnDef::new("size", ColumnType::BigInt),
            ColumnDef::new("block_size", ColumnType::Integer),
            ColumnDef::new("storage_id", ColumnType::Integer),
            ColumnDef::new("status", ColumnType::Integer),
            ColumnDef::new("protected", ColumnType::Boolean),
            ColumnDef::new("bytes_read", ColumnType::BigInt).nullable(),
            ColumnDef::new("bytes_written", ColumnType::BigInt).nullable(),
            ColumnDef::new("bytes_dedup", ColumnType::BigInt).nullable(),
            ColumnDef::new("bytes_sparse", ColumnType::BigInt).nullable(),
            ColumnDef::new("duration", ColumnType::BigInt).nullable(),
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
            on_delete: None,
        }],
        uniques: vec![UniqueDef {
            name: uq_name("versions", "uid"),
            columns: vec!["uid".to_string()],
        }],
        indexes: vec![IndexDef {
            name: ix_name("versions", "volume"),
            columns: vec!["volume".to_string()],
            unique: false,
        }],
    }
}

/// Current `blocks`: references `versions` by surrogate key, cascading.
pub fn blocks_table() -> TableSchema {
    TableSchema {
        name: "blocks".to_string(),
        columns: vec![
            ColumnDef::new("idx", ColumnType::Integer),
            ColumnDef::new("uid_right", ColumnType::Integer).nullable(),
            ColumnDef::new("uid_left", ColumnType::Integer).nullable(),
            ColumnDef::new("size", ColumnType::Integer).nullable(),
            ColumnDef::new("version_id", ColumnType::Integer),
            ColumnDef::new("valid", ColumnType::Boolean),
            ColumnDef::new("checksum", ColumnType::Binary(64)).nullable(),
        ],
        primary_key: PrimaryKeyDef {
            name: pk_name("blocks"),
            columns: vec!["version_id".to_string(), "idx".to_string()],
        },
        foreign_keys: vec![ForeignKeyDef {
            name: fk_name("blocks", "version_id", "versions"),
            columns: vec!["version_id".to_string()],
            ref_table: "versions".to_string(),
            ref_columns: vec!["id".to_string()],
            on_delete: Some(ReferentialAction::Cascade),
        }],
        uniques: vec![],
        indexes: vec![
            IndexDef {
                name: ix_name("blocks", "checksum"),
                columns: vec!["checksum".to_string()],
                unique: false,
            },
            IndexDef {
                name: ix_name("blocks", "uid_left"),
                columns: vec!["uid_left".to_string(), "uid_right".to_string()],
                unique: false,
            },
        ],
    }
}

/// Current `labels`: references `versions` by surrogate key, cascading.
pub fn labels_table() -> TableSchema {
    TableSchema {
        name: "labels".to_string(),
        columns: vec![
            ColumnDef::new("version_id", ColumnType::Integer),
            ColumnDef::new("name", ColumnType::String(255)),
            ColumnDef::new("value", ColumnType::String(255)),
        ],
        primary_key: PrimaryKeyDef {
            name: pk_name("labels"),
            columns: vec!["version_id".to_string(), "name".to_string()],
        },
        foreign_keys: vec![ForeignKeyDef {
            name: fk_name("labels", "version_id", "versions"),
            columns: vec!["version_id".to_string()],
            ref_table: "versions".to_string(),
            ref_columns: vec!["id".to_string()],
            on_delete: Some(ReferentialAction::Cascade),
        }],
        uniques: vec![],
        indexes: vec![
            IndexDef {
                name: ix_name("labels", "name"),
                columns: vec!["name".to_string()],
                unique: false,
            },
            IndexDef {
                name: ix_name("labels", "value"),
                columns: vec!["value".to_string()],
                unique: false,
            },
        ],
    }
}

/// All tables of the current schema, in dependency order.
pub fn current_tables() -> Vec<TableSchema> {
    vec![
        storages_table(),
        versions_table(),
        blocks_table(),
        labels_table(),
    ]
}

/// All tables of the legacy schema, in dependency order.
pub fn legacy_tables() -> Vec<TableSchema> {
    vec![
        storages_table(),
        legacy_versions_table(),
        legacy_blocks_table(),
        legacy_labels_table(),
    ]
}

/// Initialize a fresh store with the current schema.
pub fn init(conn: &dyn StoreConnection) -> Result<()> {
    create_all(conn, &current_tables())
}

/// Create a set of tables (and their indexes) in order.
pub fn create_all(conn: &dyn StoreConnection, tables: &[TableSchema]) -> Result<()> {
    for table in tables {
        table.validate()?;
        if conn.table_exists(&table.name)? {
            return Err(StoreError::Precondition(format!(
                "table '{}' already exists",
                table.name
            )));
        }
    }
    for table in tables {
        conn.create_table(table)?;
        for index in &table.indexes {
            conn.create_index(&table.name, index)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SqliteStore;

    #[test]
    fn test_uid_format_default() {
        let format = VersionUidFormat::default();
        assert_eq!(format.format(1).unwrap(), "V0000000001");
        assert_eq!(format.format(42).unwrap(), "V0000000042");
        assert_eq!(format.format(9_999_999_999).unwrap(), "V9999999999");
    }

    #[test]
    fn test_uid_format_overflow_fails_loudly() {
        let format = VersionUidFormat::default();
        let err = format.format(10_000_000_000).unwrap_err();
        assert!(err.to_string().contains("does not fit"));
    }

    #[test]
    fn test_uid_format_rejects_negative() {
        assert!(VersionUidFormat::default().format(-1).is_err());
    }

    #[test]
    fn test_uid_format_custom_width() {
        let format = VersionUidFormat {
            prefix: 'B',
            width: 4,
        };
        assert_eq!(format.format(17).unwrap(), "B0017");
        assert!(format.format(12345).is_err());
    }

    #[test]
    fn test_all_descriptors_validate() {
        for table in current_tables().iter().chain(legacy_tables().iter()) {
            table.validate().unwrap();
        }
    }

    #[test]
    fn test_init_creates_current_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        init(&store).unwrap();
        for name in ["storages", "versions", "blocks", "labels"] {
            assert!(store.table_exists(name).unwrap(), "missing table {}", name);
        }
        let columns = store.column_names("versions").unwrap();
        assert!(columns.contains(&"id".to_string()));
        assert!(columns.contains(&"uid".to_string()));
    }

    #[test]
    fn test_init_refuses_to_clobber() {
        let store = SqliteStore::open_in_memory().unwrap();
        init(&store).unwrap();
        assert!(init(&store).is_err());
    }
}
