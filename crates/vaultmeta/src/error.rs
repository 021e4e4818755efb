//! Error types for the metadata store and the rekeying engine.

use thiserror::Error;

/// Main error type for store and migration operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Configuration error (invalid YAML, missing fields, unknown engine, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A schema descriptor failed validation before execution.
    #[error("Schema error in table {table}: {message}")]
    Schema { table: String, message: String },

    /// A migration precondition was not met (e.g. the schema is already
    /// in the target shape).
    #[error("Migration precondition failed: {0}")]
    Precondition(String),

    /// Data-integrity violation discovered during migration. Always aborts
    /// the whole transaction; rows are never silently dropped.
    #[error("Data integrity error: {0}")]
    Integrity(String),

    /// SQLite driver error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] postgres::Error),

    /// An operation the current dialect cannot perform.
    #[error("Operation not supported by {engine}: {operation}")]
    Unsupported { engine: String, operation: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a Schema error for a named table.
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an Unsupported error for a named engine.
    pub fn unsupported(engine: impl Into<String>, operation: impl Into<String>) -> Self {
        StoreError::Unsupported {
            engine: engine.into(),
            operation: operation.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for store and migration operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = StoreError::schema("versions", "duplicate column 'uid'");
        assert_eq!(
            err.to_string(),
            "Schema error in table versions: duplicate column 'uid'"
        );
    }

    #[test]
    fn test_unsupported_error_display() {
        let err = StoreError::unsupported("sqlite", "rename_constraint");
        assert!(err.to_string().contains("sqlite"));
        assert!(err.to_string().contains("rename_constraint"));
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = StoreError::Io(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error"));
    }
}
