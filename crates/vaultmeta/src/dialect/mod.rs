//! Engine identification and capability description.
//!
//! Instead of branching on engine-name strings throughout the migration
//! code, the orchestrator queries a [`DialectCapabilities`] value object once
//! per run and lets the flags drive behavior.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Sqlite,
    Postgres,
}

impl Engine {
    /// Parse an engine identifier.
    ///
    /// An unknown identifier is a fatal configuration error: no migration
    /// may start against an engine whose capabilities are unknown.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sqlite" => Ok(Engine::Sqlite),
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            other => Err(StoreError::Config(format!(
                "unknown database engine '{}' (expected 'sqlite' or 'postgres')",
                other
            ))),
        }
    }

    /// Engine identifier string.
    pub fn name(&self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::Postgres => "postgres",
        }
    }

    /// What this engine supports natively during a schema rebuild.
    pub fn capabilities(&self) -> DialectCapabilities {
        match self {
            Engine::Sqlite => DialectCapabilities {
                engine: *self,
                // SQLite cannot touch constraints in place at all; they are
                // part of the table definition and change only through a
                // full rebuild.
                rename_constraint_in_place: false,
                drop_constraint_in_place: false,
                global_constraint_namespace: false,
            },
            Engine::Postgres => DialectCapabilities {
                engine: *self,
                rename_constraint_in_place: true,
                drop_constraint_in_place: true,
                // Index-backed constraint names (PRIMARY KEY, UNIQUE) live
                // in the relation namespace shared with tables and indexes.
                global_constraint_namespace: true,
            },
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the target engine supports natively.
///
/// Queried once at the start of a migration run to decide whether a pre-pass
/// of constraint renames is required before any table rebuild, and whether
/// constraint drops are real statements or implicit in the rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectCapabilities {
    /// The engine these capabilities describe.
    pub engine: Engine,

    /// Constraints can be renamed without recreating the owning table
    /// (`ALTER TABLE .. RENAME CONSTRAINT`).
    pub rename_constraint_in_place: bool,

    /// Constraints can be dropped without recreating the owning table
    /// (`ALTER TABLE .. DROP CONSTRAINT`).
    pub drop_constraint_in_place: bool,

    /// Index-backed constraint names are globally unique across the
    /// database rather than scoped per table. Engines with this property
    /// must rename old constraints out of the way before rebuilt tables
    /// can claim the same names.
    pub global_constraint_namespace: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_known_engines() {
        assert_eq!(Engine::from_name("sqlite").unwrap(), Engine::Sqlite);
        assert_eq!(Engine::from_name("postgres").unwrap(), Engine::Postgres);
        assert_eq!(Engine::from_name("postgresql").unwrap(), Engine::Postgres);
    }

    #[test]
    fn test_from_name_unknown_engine_is_fatal() {
        let err = Engine::from_name("oracle").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_sqlite_capabilities() {
        let caps = Engine::Sqlite.capabilities();
        assert!(!caps.rename_constraint_in_place);
        assert!(!caps.drop_constraint_in_place);
        assert!(!caps.global_constraint_namespace);
    }

    #[test]
    fn test_postgres_capabilities() {
        let caps = Engine::Postgres.capabilities();
        assert!(caps.rename_constraint_in_place);
        assert!(caps.drop_constraint_in_place);
        assert!(caps.global_constraint_namespace);
    }
}
