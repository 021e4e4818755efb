//! Row-count verification.
//!
//! A rekeying run must preserve every row exactly once; the cheapest
//! system-wide check is that per-table row counts are invariant across the
//! migration. The orchestrator snapshots counts before touching anything and
//! asserts them again before commit.

use std::collections::BTreeMap;

use tracing::debug;

use crate::connection::StoreConnection;
use crate::error::{Result, StoreError};

/// Per-table row counts, keyed by table name.
pub type CountSnapshot = BTreeMap<String, i64>;

/// Snapshot the row counts of the given tables.
pub fn snapshot_counts(
    conn: &dyn StoreConnection,
    tables: impl IntoIterator<Item = String>,
) -> Result<CountSnapshot> {
    let mut counts = CountSnapshot::new();
    for table in tables {
        let count = conn.row_count(&table)?;
        debug!(table = %table, count, "row count snapshot");
        counts.insert(table, count);
    }
    Ok(counts)
}

/// Assert that every table still holds exactly the snapshotted number of
/// rows. Any mismatch is a data-integrity error and aborts the run.
pub fn assert_counts(conn: &dyn StoreConnection, expected: &CountSnapshot) -> Result<()> {
    for (table, expected_count) in expected {
        let actual = conn.row_count(table)?;
        if actual != *expected_count {
            return Err(StoreError::Integrity(format!(
                "row count changed for table {}: {} before migration, {} after",
                table, expected_count, actual
            )));
        }
    }
    Ok(())
}
