//! Migration step descriptions and the remap context handed to row transforms.

use tracing::trace;

use crate::connection::StoreConnection;
use crate::core::schema::TableSchema;
use crate::core::value::{RowView, SqlValue};
use crate::error::{Result, StoreError};
use crate::rekey::cache::RemapCache;

/// Row transform: old row in, new row out (values in the target schema's
/// insert-column order). May resolve foreign keys through the remap context.
pub type RowTransform =
    Box<dyn Fn(&RowView<'_>, &mut RemapContext<'_>) -> Result<Vec<SqlValue>>>;

/// Capture of the engine-assigned surrogate key during a parent rebuild.
///
/// For each copied row, the value of `old_key_column` (from the source row)
/// is mapped to the surrogate key the insert assigned, and the mapping is
/// recorded in the remap cache.
#[derive(Debug, Clone)]
pub struct KeyCapture {
    /// Column in the source row holding the old natural key.
    pub old_key_column: String,

    /// Autoincrement column in the target schema whose assigned value is
    /// captured.
    pub surrogate_column: String,
}

/// Where to resolve a cache miss: the rebuilt parent table retains the old
/// natural key in a transitional column for exactly this purpose.
#[derive(Debug, Clone)]
pub struct FallbackLookup {
    /// Rebuilt parent table name.
    pub table: String,

    /// Transitional column holding the old natural key.
    pub key_column: String,

    /// Surrogate key column.
    pub surrogate_column: String,
}

/// One table rebuild within a rekeying plan.
pub struct MigrationStep {
    /// Table to copy rows from (and drop).
    pub source_table: String,

    /// Desired end-state under its final name; the shadow table is derived
    /// from it.
    pub target: TableSchema,

    /// Columns ordering the copy for determinism (primary-key order
    /// recommended).
    pub copy_order: Vec<String>,

    /// Old indexes to drop before the shadow's indexes are created (those
    /// being replaced under the same name).
    pub drop_old_indexes: Vec<String>,

    /// Foreign key constraints on *other* tables that reference the source
    /// table and must be dropped before it can be: `(table, constraint)`.
    /// Only executed on engines that can drop constraints in place.
    pub drop_referencing_fks: Vec<(String, String)>,

    /// Present on the parent step: populate the remap cache with
    /// old-key → assigned-surrogate mappings.
    pub capture: Option<KeyCapture>,

    /// Present on child steps: where cache misses are resolved.
    pub resolve_via: Option<FallbackLookup>,

    /// Names of tables whose remap entries this step consumes. A step may
    /// only run after all steps it depends on.
    pub depends_on: Vec<String>,

    /// Row transform applied to every copied row.
    pub transform: RowTransform,
}

impl MigrationStep {
    /// Shadow table name used while rebuilding.
    pub fn shadow_name(&self) -> String {
        format!("{}_new", self.target.name)
    }
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("source_table", &self.source_table)
            .field("target", &self.target.name)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// A full rekeying plan: ordered steps plus the transitional columns to
/// prune once every step has succeeded.
pub struct RekeyPlan {
    /// Steps in dependency order (parent before children).
    pub steps: Vec<MigrationStep>,

    /// `(table, column)` pairs dropped after all rebuilds succeed - the
    /// columns that only existed to support cache-miss fallback lookups.
    pub prune_columns: Vec<(String, String)>,
}

/// Remap state shared across the steps of one run, handed to row transforms.
///
/// Owned by the orchestrator; transforms see it only through
/// [`resolve`](RemapContext::resolve).
pub struct RemapContext<'a> {
    cache: &'a mut RemapCache,
    conn: &'a dyn StoreConnection,
    fallback: Option<&'a FallbackLookup>,
}

impl<'a> RemapContext<'a> {
    /// Create a context for one step.
    pub fn new(
        cache: &'a mut RemapCache,
        conn: &'a dyn StoreConnection,
        fallback: Option<&'a FallbackLookup>,
    ) -> Self {
        Self {
            cache,
            conn,
            fallback,
        }
    }

    /// Record a freshly assigned mapping (parent rebuild).
    pub fn record(&mut self, old_key: i64, new_key: i64) {
        trace!(old_key, new_key, "remap recorded");
        self.cache.put(old_key, new_key);
    }

    /// Resolve an old natural key to its surrogate key.
    ///
    /// Checks the cache first; on a miss, falls back to a direct lookup
    /// against the rebuilt parent table and re-populates the cache. A key
    /// with no corresponding parent row is a fatal data-integrity error
    /// (an orphaned child row), never a silently skipped one.
    pub fn resolve(&mut self, old_key: i64) -> Result<i64> {
        if let Some(new_key) = self.cache.get(old_key) {
            return Ok(new_key);
        }

        let fallback = self.fallback.ok_or_else(|| {
            StoreError::Integrity(format!(
                "no remap entry for key {} and no fallback lookup configured",
                old_key
            ))
        })?;

        let found = self.conn.find_i64(
            &fallback.table,
            &fallback.key_column,
            &SqlValue::Int(old_key),
            &fallback.surrogate_column,
        )?;

        match found {
            Some(new_key) => {
                self.cache.put(old_key, new_key);
                Ok(new_key)
            }
            None => Err(StoreError::Integrity(format!(
                "orphaned row: no {} row with {} = {}",
                fallback.table, fallback.key_column, old_key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{pk_name, ColumnDef, ColumnType, PrimaryKeyDef};

    fn step_for(name: &str, depends_on: Vec<String>) -> MigrationStep {
        MigrationStep {
            source_table: name.to_string(),
            target: TableSchema {
                name: name.to_string(),
                columns: vec![ColumnDef::new("id", ColumnType::Integer).autoincrement()],
                primary_key: PrimaryKeyDef {
                    name: pk_name(name),
                    columns: vec!["id".to_string()],
                },
                foreign_keys: vec![],
                uniques: vec![],
                indexes: vec![],
            },
            copy_order: vec!["id".to_string()],
            drop_old_indexes: vec![],
            drop_referencing_fks: vec![],
            capture: None,
            resolve_via: None,
            depends_on,
            transform: Box::new(|_, _| Ok(vec![])),
        }
    }

    #[test]
    fn test_shadow_name() {
        let step = step_for("versions", vec![]);
        assert_eq!(step.shadow_name(), "versions_new");
    }

    #[test]
    fn test_debug_omits_transform() {
        let step = step_for("blocks", vec!["versions".to_string()]);
        let rendered = format!("{:?}", step);
        assert!(rendered.contains("blocks"));
        assert!(rendered.contains("versions"));
    }
}
