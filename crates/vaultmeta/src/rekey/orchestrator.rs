//! Migration orchestrator - sequences table rebuilds into one atomic run.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::connection::{StoreConnection, TransactionGuard};
use crate::error::{Result, StoreError};
use crate::rekey::cache::{CacheStats, RemapCache, DEFAULT_CAPACITY};
use crate::rekey::rebuild::TableRebuilder;
use crate::rekey::step::{RekeyPlan, RemapContext};
use crate::verify;

/// Outcome of one rebuilt table.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    /// Final table name.
    pub table: String,

    /// Rows carried across the rebuild.
    pub rows: u64,
}

/// Result of a completed rekeying run.
#[derive(Debug, Clone, Serialize)]
pub struct RekeyOutcome {
    /// Unique run identifier.
    pub run_id: String,

    /// Engine the run executed against.
    pub engine: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run committed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Per-table outcomes, in execution order.
    pub tables: Vec<TableOutcome>,

    /// Remap cache statistics for the run.
    pub cache: CacheStats,
}

/// Sequences per-table rebuilds in dependency order, wires the remap cache
/// between them, and wraps the whole operation in a single transaction.
///
/// The orchestrator exclusively owns the remap cache and the transaction
/// boundary. It assumes exclusive access to the store for the duration of
/// the run; ensuring no concurrent writers are active is the caller's
/// responsibility.
pub struct Orchestrator<'a> {
    conn: &'a dyn StoreConnection,
    cache_capacity: usize,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator over a connection.
    pub fn new(conn: &'a dyn StoreConnection) -> Self {
        Self {
            conn,
            cache_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Override the remap cache capacity.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Run a rekeying plan to completion.
    ///
    /// Either every step commits, with per-table row counts verified
    /// invariant, or the transaction rolls back and the store is left
    /// exactly as it was.
    pub fn run(&self, plan: &RekeyPlan) -> Result<RekeyOutcome> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let caps = self.conn.capabilities();

        info!(run_id = %run_id, engine = %caps.engine, "starting rekeying run");

        // Phase 1: validate the plan. Nothing has been mutated yet, so a
        // malformed plan aborts with the store untouched.
        self.validate(plan)?;

        let tx = TransactionGuard::begin(self.conn)?;

        // Phase 2: snapshot pre-run row counts inside the transaction.
        let before = verify::snapshot_counts(
            self.conn,
            plan.steps.iter().map(|s| s.source_table.clone()),
        )?;

        // Phase 3: on engines where index-backed constraint names are
        // globally scoped, rename every old constraint the rebuilt tables
        // will claim out of the way.
        if caps.global_constraint_namespace {
            if !caps.rename_constraint_in_place {
                return Err(StoreError::Config(format!(
                    "engine {} scopes constraint names globally but cannot rename \
                     constraints in place; this plan cannot run against it",
                    caps.engine
                )));
            }
            self.rename_claimed_constraints(plan)?;
        }

        // Phase 4: rebuild each table, parent first, sharing one cache.
        let mut cache = RemapCache::new(self.cache_capacity);
        let rebuilder = TableRebuilder::new(self.conn);
        let mut tables = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let mut ctx = RemapContext::new(&mut cache, self.conn, step.resolve_via.as_ref());
            let result = rebuilder.rebuild(step, &mut ctx)?;
            tables.push(TableOutcome {
                table: result.table,
                rows: result.rows_copied,
            });
        }

        // Phase 5: drop transitional columns that only existed to support
        // cache-miss fallback lookups during this run.
        for (table, column) in &plan.prune_columns {
            debug!(table = %table, column = %column, "pruning transitional column");
            self.conn.drop_column(table, column)?;
            self.conn.invalidate_reflection(table);
        }

        // Phase 6: verify row counts are invariant, then commit.
        let expected_after: verify::CountSnapshot = plan
            .steps
            .iter()
            .map(|s| (s.target.name.clone(), before[&s.source_table]))
            .collect();
        verify::assert_counts(self.conn, &expected_after)?;

        tx.commit()?;

        let completed_at = Utc::now();
        let outcome = RekeyOutcome {
            run_id,
            engine: caps.engine.name().to_string(),
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            tables,
            cache: cache.stats(),
        };

        info!(
            run_id = %outcome.run_id,
            tables = outcome.tables.len(),
            duration = outcome.duration_seconds,
            "rekeying run committed"
        );

        Ok(outcome)
    }

    /// Validate descriptors and step ordering before any mutation.
    fn validate(&self, plan: &RekeyPlan) -> Result<()> {
        if plan.steps.is_empty() {
            return Err(StoreError::Config("rekeying plan has no steps".to_string()));
        }

        let target_names: BTreeSet<&str> =
            plan.steps.iter().map(|s| s.target.name.as_str()).collect();

        let mut completed: BTreeSet<&str> = BTreeSet::new();
        for step in &plan.steps {
            step.target.validate()?;

            if !self.conn.table_exists(&step.source_table)? {
                return Err(StoreError::Precondition(format!(
                    "source table '{}' does not exist",
                    step.source_table
                )));
            }

            // A step may only run after every step it depends on has
            // populated its remap entries.
            for dep in &step.depends_on {
                if !completed.contains(dep.as_str()) {
                    return Err(StoreError::Config(format!(
                        "step for '{}' depends on '{}', which has not run yet",
                        step.target.name, dep
                    )));
                }
            }

            // Referenced tables must already exist or be rebuilt by this plan.
            for fk in &step.target.foreign_keys {
                let known = target_names.contains(fk.ref_table.as_str())
                    || self.conn.table_exists(&fk.ref_table)?;
                if !known {
                    return Err(StoreError::schema(
                        &step.target.name,
                        format!(
                            "foreign key '{}' references unknown table '{}'",
                            fk.name, fk.ref_table
                        ),
                    ));
                }
            }

            completed.insert(step.target.name.as_str());
        }

        Ok(())
    }

    /// Rename old index-backed constraints whose names the rebuilt tables
    /// will claim, so shadow-table creation cannot collide.
    ///
    /// Per-table-scoped constraint names (plain foreign keys and checks)
    /// are left alone; they cannot collide across tables.
    fn rename_claimed_constraints(&self, plan: &RekeyPlan) -> Result<()> {
        let claimed: BTreeSet<&str> = plan
            .steps
            .iter()
            .flat_map(|s| s.target.index_backed_constraint_names())
            .collect();

        for step in &plan.steps {
            for name in self.conn.constraint_names(&step.source_table)? {
                if claimed.contains(name.as_str()) {
                    let temporary = format!("{}_old", name);
                    debug!(
                        table = %step.source_table,
                        from = %name,
                        to = %temporary,
                        "renaming constraint out of the way"
                    );
                    self.conn
                        .rename_constraint(&step.source_table, &name, &temporary)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::StoreConnection;
    use crate::core::schema::{pk_name, ColumnDef, ColumnType, PrimaryKeyDef, TableSchema};
    use crate::core::value::SqlValue;
    use crate::drivers::SqliteStore;
    use crate::rekey::step::{KeyCapture, MigrationStep};

    fn legacy_items() -> TableSchema {
        TableSchema {
            name: "items".to_string(),
            columns: vec![
                ColumnDef::new("code", ColumnType::Integer),
                ColumnDef::new("label", ColumnType::String(32)),
            ],
            primary_key: PrimaryKeyDef {
                name: pk_name("items"),
                columns: vec!["code".to_string()],
            },
            foreign_keys: vec![],
            uniques: vec![],
            indexes: vec![],
        }
    }

    fn rekeyed_items() -> TableSchema {
        TableSchema {
            name: "items".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer).autoincrement(),
                ColumnDef::new("code", ColumnType::Integer),
                ColumnDef::new("label", ColumnType::String(32)),
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

    fn items_step() -> MigrationStep {
        MigrationStep {
            source_table: "items".to_string(),
            target: rekeyed_items(),
            copy_order: vec!["code".to_string()],
            drop_old_indexes: vec![],
            drop_referencing_fks: vec![],
            capture: Some(KeyCapture {
                old_key_column: "code".to_string(),
                surrogate_column: "id".to_string(),
            }),
            resolve_via: None,
            depends_on: vec![],
            transform: Box::new(|row, _ctx| {
                Ok(vec![row.require("code")?, row.require("label")?])
            }),
        }
    }

    fn items_fixture() -> SqliteStore {
        let conn = SqliteStore::open_in_memory().unwrap();
        let table = legacy_items();
        conn.create_table(&table).unwrap();
        let cols = table.insert_columns();
        conn.insert("items", &cols, &[SqlValue::Int(7), SqlValue::Text("a".into())])
            .unwrap();
        conn.insert("items", &cols, &[SqlValue::Int(9), SqlValue::Text("b".into())])
            .unwrap();
        conn
    }

    #[test]
    fn test_empty_plan_rejected() {
        let conn = SqliteStore::open_in_memory().unwrap();
        let plan = RekeyPlan {
            steps: vec![],
            prune_columns: vec![],
        };
        let err = Orchestrator::new(&conn).run(&plan).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_missing_source_table_rejected() {
        let conn = SqliteStore::open_in_memory().unwrap();
        let plan = RekeyPlan {
            steps: vec![items_step()],
            prune_columns: vec![],
        };
        let err = Orchestrator::new(&conn).run(&plan).unwrap_err();
        assert!(matches!(err, StoreError::Precondition(_)));
    }

    #[test]
    fn test_out_of_order_dependency_rejected() {
        let conn = items_fixture();
        let mut step = items_step();
        step.depends_on = vec!["parents".to_string()];
        let plan = RekeyPlan {
            steps: vec![step],
            prune_columns: vec![],
        };
        let err = Orchestrator::new(&conn).run(&plan).unwrap_err();
        assert!(err.to_string().contains("has not run yet"));
    }

    #[test]
    fn test_single_table_plan_assigns_surrogates() {
        let conn = items_fixture();
        let plan = RekeyPlan {
            steps: vec![items_step()],
            prune_columns: vec![],
        };

        let outcome = Orchestrator::new(&conn).run(&plan).unwrap();
        assert_eq!(outcome.tables.len(), 1);
        assert_eq!(outcome.tables[0].rows, 2);

        let rs = conn.select_all("items", &["id"]).unwrap();
        let pairs: Vec<(i64, i64)> = rs
            .iter()
            .map(|r| {
                (
                    r.require_int("id").unwrap(),
                    r.require_int("code").unwrap(),
                )
            })
            .collect();
        assert_eq!(pairs, vec![(1, 7), (2, 9)]);
    }
}
