//! The schema rekeying engine.
//!
//! Rekeying replaces a parent table's natural-key identifier scheme with a
//! surrogate integer primary key and propagates the change through every
//! dependent table's foreign key, preserving each row and relationship
//! exactly once. The engine performs this as a sequence of build-copy-swap
//! table rebuilds inside a single transaction:
//!
//! - [`cache`]: bounded LRU cache of old-key → surrogate-key mappings
//! - [`step`]: declarative per-table rebuild descriptions and the remap
//!   context handed to row transforms
//! - [`rebuild`]: the build-copy-swap executor for one table
//! - [`orchestrator`]: plan validation, constraint-rename pre-pass, step
//!   sequencing, count verification, and the transaction boundary
//!
//! The migration is forward-only: the old surrogate-free addressing scheme
//! cannot be mechanically reconstructed, so there is no reverse operation.

pub mod cache;
pub mod orchestrator;
pub mod rebuild;
pub mod step;

pub use cache::{CacheStats, RemapCache, DEFAULT_CAPACITY};
pub use orchestrator::{Orchestrator, RekeyOutcome, TableOutcome};
pub use rebuild::{RebuildResult, TableRebuilder};
pub use step::{FallbackLookup, KeyCapture, MigrationStep, RekeyPlan, RemapContext, RowTransform};
