//! Rekeying of `versions` from natural integer keys to surrogate keys.
//!
//! Before: `versions` is keyed by its natural integer identifier `uid`, and
//! `blocks`/`labels` reference that identifier directly. After: `versions`
//! has an autoincrement surrogate primary key `id` plus a unique string
//! identifier `uid` derived from the old integer, and the children reference
//! `id` with cascading deletes.
//!
//! The rebuilt parent temporarily retains the old integer in a `uid_old`
//! column so child rebuilds can resolve remap-cache misses against it; the
//! column is dropped once every child has been rebuilt.
//!
//! This migration is irreversible: the old surrogate-free addressing scheme
//! cannot be mechanically reconstructed. Recovery is only possible from an
//! external backup taken before the run.

use tracing::{info, warn};

use crate::connection::StoreConnection;
use crate::core::schema::{fk_name, ix_name, ColumnDef, ColumnType, TableSchema};
use crate::core::value::SqlValue;
use crate::error::{Result, StoreError};
use crate::rekey::{
    FallbackLookup, KeyCapture, MigrationStep, Orchestrator, RekeyOutcome, RekeyPlan,
    DEFAULT_CAPACITY,
};
use crate::store::{self, VersionUidFormat};

/// The `versions` rekeying migration.
pub struct VersionUidRekey {
    uid_format: VersionUidFormat,
    cache_capacity: usize,
}

impl VersionUidRekey {
    /// Create the migration with default identifier derivation and cache
    /// capacity.
    pub fn new() -> Self {
        Self {
            uid_format: VersionUidFormat::default(),
            cache_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Substitute the identifier derivation. Callers must verify the width
    /// is sufficient for their key space before running.
    #[must_use]
    pub fn with_uid_format(mut self, format: VersionUidFormat) -> Self {
        self.uid_format = format;
        self
    }

    /// Override the remap cache capacity.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Perform the full rekeying sequence.
    ///
    /// Runs as one transaction: on any failure the store is left exactly as
    /// it was. Running against an already-rekeyed store fails the
    /// precondition check cleanly, before any mutation.
    pub fn upgrade(&self, conn: &dyn StoreConnection) -> Result<RekeyOutcome> {
        self.check_precondition(conn)?;

        info!("rekeying versions to surrogate identifiers");
        let plan = self.plan();
        let outcome = Orchestrator::new(conn)
            .with_cache_capacity(self.cache_capacity)
            .run(&plan)?;

        info!(
            cache_hits = outcome.cache.hits,
            cache_misses = outcome.cache.misses,
            "rekeying complete"
        );
        Ok(outcome)
    }

    /// Documented no-op: this migration cannot be reversed.
    pub fn downgrade(&self) -> Result<()> {
        warn!("the versions rekeying migration is irreversible; downgrade does nothing");
        Ok(())
    }

    /// The schema-shape precondition: the store must still be in the legacy
    /// shape (integer `uid`, no surrogate `id`).
    fn check_precondition(&self, conn: &dyn StoreConnection) -> Result<()> {
        if !conn.table_exists("versions")? {
            return Err(StoreError::Precondition(
                "versions table does not exist".to_string(),
            ));
        }

        let columns = conn.column_names("versions")?;
        if columns.iter().any(|c| c == "id") {
            return Err(StoreError::Precondition(
                "versions already has a surrogate 'id' column; the store is already rekeyed"
                    .to_string(),
            ));
        }
        if !columns.iter().any(|c| c == "uid") {
            return Err(StoreError::Precondition(
                "versions has no 'uid' column; unrecognized schema shape".to_string(),
            ));
        }

        Ok(())
    }

    /// The three-step plan: rebuild `versions` first (populating the remap
    /// cache), then `blocks` and `labels` (consuming it), then drop the
    /// transitional `uid_old` column.
    fn plan(&self) -> RekeyPlan {
        RekeyPlan {
            steps: vec![
                self.versions_step(),
                self.blocks_step(),
                self.labels_step(),
            ],
            prune_columns: vec![("versions".to_string(), "uid_old".to_string())],
        }
    }

    /// Target shape of `versions` during the run: the current schema plus
    /// the transitional `uid_old` column.
    fn transitional_versions_table(&self) -> TableSchema {
        let mut table = store::versions_table();
        table.columns.insert(
            2,
            ColumnDef::new("uid_old", ColumnType::Integer),
        );
        table
    }

    fn versions_step(&self) -> MigrationStep {
        let uid_format = self.uid_format.clone();
        MigrationStep {
            source_table: "versions".to_string(),
            target: self.transitional_versions_table(),
            copy_order: vec!["uid".to_string()],
            drop_old_indexes: vec![],
            // The children's foreign keys must go before the old parent
            // table can; they are recreated when the children are rebuilt.
            drop_referencing_fks: vec![
                (
                    "blocks".to_string(),
                    fk_name("blocks", "version_uid", "versions"),
                ),
                (
                    "labels".to_string(),
                    fk_name("labels", "version_uid", "versions"),
                ),
            ],
            capture: Some(KeyCapture {
                old_key_column: "uid".to_string(),
                surrogate_column: "id".to_string(),
            }),
            resolve_via: None,
            depends_on: vec![],
            transform: Box::new(move |row, _ctx| {
                let old_uid = row.require_int("uid")?;
                Ok(vec![
                    SqlValue::Text(uid_format.format(old_uid)?),
                    SqlValue::Int(old_uid),
                    row.require("date")?,
                    row.require("name")?,
                    row.require("snapshot")?,
                    row.require("size")?,
                    row.require("block_size")?,
                    row.require("storage_id")?,
                    row.require("status")?,
                    row.require("protected")?,
                    row.require("bytes_read")?,
                    row.require("bytes_written")?,
                    row.require("bytes_dedup")?,
                    row.require("bytes_sparse")?,
                    row.require("duration")?,
                ])
            }),
        }
    }

    fn blocks_step(&self) -> MigrationStep {
        MigrationStep {
            source_table: "blocks".to_string(),
            target: store::blocks_table(),
            copy_order: vec!["version_uid".to_string(), "idx".to_string()],
            // Same names are claimed by the rebuilt table's indexes.
            drop_old_indexes: vec![ix_name("blocks", "checksum"), ix_name("blocks", "uid_left")],
            drop_referencing_fks: vec![],
            capture: None,
            resolve_via: Some(FallbackLookup {
                table: "versions".to_string(),
                key_column: "uid_old".to_string(),
                surrogate_column: "id".to_string(),
            }),
            depends_on: vec!["versions".to_string()],
            transform: Box::new(|row, ctx| {
                let version_id = ctx.resolve(row.require_int("version_uid")?)?;
                Ok(vec![
                    row.require("idx")?,
                    row.require("uid_right")?,
                    row.require("uid_left")?,
                    row.require("size")?,
                    SqlValue::Int(version_id),
                    row.require("valid")?,
                    row.require("checksum")?,
                ])
            }),
        }
    }

    fn labels_step(&self) -> MigrationStep {
        MigrationStep {
            source_table: "labels".to_string(),
            target: store::labels_table(),
            copy_order: vec!["version_uid".to_string(), "name".to_string()],
            drop_old_indexes: vec![ix_name("labels", "value")],
            drop_referencing_fks: vec![],
            capture: None,
            resolve_via: Some(FallbackLookup {
                table: "versions".to_string(),
                key_column: "uid_old".to_string(),
                surrogate_column: "id".to_string(),
            }),
            depends_on: vec!["versions".to_string()],
            transform: Box::new(|row, ctx| {
                let version_id = ctx.resolve(row.require_int("version_uid")?)?;
                Ok(vec![
                    SqlValue::Int(version_id),
                    row.require("name")?,
                    row.require("value")?,
                ])
            }),
        }
    }
}

impl Default for VersionUidRekey {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SqliteStore;
    use crate::store::legacy_tables;
    use chrono::NaiveDate;

    fn legacy_store_with_one_version() -> SqliteStore {
        let conn = SqliteStore::open_in_memory().unwrap();
        store::create_all(&conn, &legacy_tables()).unwrap();

        let storages = store::storages_table();
        conn.insert(
            "storages",
            &storages.insert_columns(),
            &[SqlValue::Text("default".to_string())],
        )
        .unwrap();

        let versions = store::legacy_versions_table();
        conn.insert(
            "versions",
            &versions.insert_columns(),
            &[
                SqlValue::Int(1),
                SqlValue::DateTime(
                    NaiveDate::from_ymd_opt(2024, 5, 1)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                ),
                SqlValue::Text("vm-alpha".to_string()),
                SqlValue::Text("snap".to_string()),
                SqlValue::Int(4096),
                SqlValue::Int(512),
                SqlValue::Int(1),
                SqlValue::Int(1),
                SqlValue::Bool(false),
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Null,
            ],
        )
        .unwrap();

        let blocks = store::legacy_blocks_table();
        conn.insert(
            "blocks",
            &blocks.insert_columns(),
            &[
                SqlValue::Int(0),
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Int(512),
                SqlValue::Int(1),
                SqlValue::Bool(true),
                SqlValue::Null,
            ],
        )
        .unwrap();

        conn
    }

    #[test]
    fn test_orphaned_child_aborts_and_rolls_back() {
        let conn = legacy_store_with_one_version();

        // Plant a block whose parent does not exist, behind the foreign
        // key's back.
        conn.execute_raw(
            "PRAGMA foreign_keys = OFF;\n\
             INSERT INTO blocks (idx, uid_right, uid_left, size, version_uid, valid, checksum)\n\
             VALUES (0, NULL, NULL, 512, 99, 1, NULL);\n\
             PRAGMA foreign_keys = ON",
        );

        let err = VersionUidRekey::new().upgrade(&conn).unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
        assert!(err.to_string().contains("orphaned"));

        // The parent rebuild had already happened inside the transaction;
        // everything rolled back, including it.
        let columns = conn.column_names("versions").unwrap();
        assert!(columns.contains(&"uid".to_string()));
        assert!(!columns.contains(&"id".to_string()));
        assert_eq!(conn.row_count("versions").unwrap(), 1);
        assert_eq!(conn.row_count("blocks").unwrap(), 2);
    }

    #[test]
    fn test_plan_shape() {
        let migration = VersionUidRekey::new();
        let plan = migration.plan();

        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].target.name, "versions");
        assert!(plan.steps[0].capture.is_some());
        assert!(plan.steps[0].depends_on.is_empty());

        for child in &plan.steps[1..] {
            assert!(child.capture.is_none());
            assert_eq!(child.depends_on, vec!["versions".to_string()]);
            let fallback = child.resolve_via.as_ref().unwrap();
            assert_eq!(fallback.table, "versions");
            assert_eq!(fallback.key_column, "uid_old");
        }

        assert_eq!(
            plan.prune_columns,
            vec![("versions".to_string(), "uid_old".to_string())]
        );
    }

    #[test]
    fn test_transitional_schema_keeps_old_key() {
        let migration = VersionUidRekey::new();
        let table = migration.transitional_versions_table();
        assert!(table.has_column("uid_old"));
        assert!(table.has_column("id"));
        assert!(table.has_column("uid"));
        table.validate().unwrap();
    }

    #[test]
    fn test_plan_claims_old_pk_names() {
        // On a global-namespace engine the orchestrator must find these
        // claimed by the new schemas, forcing the rename pre-pass.
        let migration = VersionUidRekey::new();
        let plan = migration.plan();
        let claimed: Vec<&str> = plan
            .steps
            .iter()
            .flat_map(|s| s.target.index_backed_constraint_names())
            .collect();
        assert!(claimed.contains(&"pk_versions"));
        assert!(claimed.contains(&"pk_blocks"));
        assert!(claimed.contains(&"pk_labels"));
        assert!(claimed.contains(&"uq_versions_uid"));
    }
}
