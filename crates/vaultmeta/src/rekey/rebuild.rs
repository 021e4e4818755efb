//! Build-copy-swap execution for a single table.

use tracing::{debug, info};

use crate::connection::StoreConnection;
use crate::error::Result;
use crate::rekey::step::{MigrationStep, RemapContext};

/// Result of one table rebuild.
#[derive(Debug, Clone)]
pub struct RebuildResult {
    /// Final table name.
    pub table: String,

    /// Rows copied into the rebuilt table.
    pub rows_copied: u64,
}

/// Executes the build-copy-swap sequence for one table.
///
/// The rebuilder owns no state across invocations; it is a pure step
/// executor parameterized by a [`MigrationStep`]. It must run inside the
/// orchestrator's transaction so that a failure at any point aborts all
/// prior steps atomically.
pub struct TableRebuilder<'a> {
    conn: &'a dyn StoreConnection,
}

impl<'a> TableRebuilder<'a> {
    /// Create a rebuilder over a connection.
    pub fn new(conn: &'a dyn StoreConnection) -> Self {
        Self { conn }
    }

    /// Rebuild one table:
    ///
    /// 1. create the shadow table with the target schema (final-name
    ///    constraint names);
    /// 2. drop the old indexes being replaced - before the shadow's indexes
    ///    are created, since index names are database-global in both
    ///    supported engines;
    /// 3. create the shadow's indexes;
    /// 4. copy every source row in stable order through the step's
    ///    transform, capturing assigned surrogate keys into the remap cache
    ///    when the step declares a capture;
    /// 5. drop foreign key constraints on tables referencing the source
    ///    table (engines that can; on the rest they vanish with the table);
    /// 6. drop the old table;
    /// 7. rename the shadow into place;
    /// 8. invalidate cached schema reflection so later steps observe the
    ///    new structure.
    pub fn rebuild(
        &self,
        step: &MigrationStep,
        ctx: &mut RemapContext<'_>,
    ) -> Result<RebuildResult> {
        let shadow_name = step.shadow_name();
        let final_name = step.target.name.clone();

        debug!(source = %step.source_table, shadow = %shadow_name, "rebuilding table");

        let shadow = step.target.with_name(&shadow_name);
        self.conn.create_table(&shadow)?;

        for index in &step.drop_old_indexes {
            self.conn.drop_index(&step.source_table, index)?;
        }
        for index in &step.target.indexes {
            self.conn.create_index(&shadow_name, index)?;
        }

        let insert_cols = step.target.insert_columns();
        let order_by: Vec<&str> = step.copy_order.iter().map(String::as_str).collect();
        let rows = self.conn.select_all(&step.source_table, &order_by)?;

        let mut rows_copied = 0u64;
        for row in rows.iter() {
            let values = (step.transform)(&row, ctx)?;
            match &step.capture {
                Some(capture) => {
                    let old_key = row.require_int(&capture.old_key_column)?;
                    let new_key = self.conn.insert_returning(
                        &shadow_name,
                        &insert_cols,
                        &values,
                        &capture.surrogate_column,
                    )?;
                    ctx.record(old_key, new_key);
                }
                None => {
                    self.conn.insert(&shadow_name, &insert_cols, &values)?;
                }
            }
            rows_copied += 1;
        }

        if self.conn.capabilities().drop_constraint_in_place {
            for (table, constraint) in &step.drop_referencing_fks {
                self.conn.drop_constraint(table, constraint)?;
            }
        }

        self.conn.drop_table(&step.source_table)?;
        self.conn.rename_table(&shadow_name, &final_name)?;

        self.conn.invalidate_reflection(&step.source_table);
        self.conn.invalidate_reflection(&final_name);

        info!(table = %final_name, rows = rows_copied, "table rebuilt");

        Ok(RebuildResult {
            table: final_name,
            rows_copied,
        })
    }
}
