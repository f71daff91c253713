//! # strata-migrate
//!
//! Dependency-ordered, idempotent migration of hierarchical JSON data into a
//! path-addressed document store.
//!
//! This crate implements the migration domain, providing:
//!
//! - **Configuration Resolver**: Validates a declarative mapping and orders
//!   entity types so every parent migrates before its children
//! - **Migration Orchestrator**: Projects, validates, and writes records in
//!   bounded concurrent batches, each document paired with a marker
//! - **Backup Manager**: Takes a full managed export before any write
//! - **Verification Engine**: Compares destination counts, required fields,
//!   and parent references against the source
//! - **Rollback Tool**: Deletes a run's documents children-first, keyed off
//!   its markers
//!
//! ## Guarantees
//!
//! - **Exactly once**: A marker, written atomically with its document, is the
//!   only record of "already migrated"; re-runs skip marked records
//! - **Ordered**: All records of an entity type are processed before any
//!   record of a dependent type
//! - **Accountable**: Every run yields a summary, including aborted and
//!   cancelled runs
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use strata_core::MemoryStore;
//! use strata_migrate::prelude::*;
//!
//! # async fn demo() -> strata_migrate::Result<()> {
//! let plan = MappingDefinition::from_json(
//!     r#"{"entities": [{"name": "department", "path": "departments/{id}"}]}"#,
//! )?
//! .resolve()?;
//!
//! let source = SourceDataset::from_value(
//!     serde_json::json!({"department": [{"id": "CS", "name": "Computer Science"}]}),
//!     &plan,
//! )?;
//!
//! let migrator = Migrator::new(Arc::new(MemoryStore::new()), plan, RunOptions::default())?;
//! let summary = migrator.run(&source).await?;
//! assert_eq!(summary.written(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

// Internal modules - not exposed in public API.
pub(crate) mod dag;

pub mod backup;
pub mod error;
pub mod mapping;
pub mod marker;
pub mod metrics;
pub mod options;
pub mod orchestrator;
pub mod pipeline;
pub mod projection;
pub mod retry;
pub mod rollback;
pub mod source;
pub mod summary;
pub mod template;
pub mod verify;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backup::{BackupConfig, BackupSnapshot, GcloudExporter, SnapshotExporter};
    pub use crate::error::{BackupError, ConfigError, Error, RecordError, Result, RollbackError};
    pub use crate::mapping::{EntityDescriptor, MappingDefinition, MigrationPlan};
    pub use crate::marker::{MigrationMarker, RunRecord, list_runs};
    pub use crate::options::RunOptions;
    pub use crate::orchestrator::{AbortHandle, Migrator};
    pub use crate::pipeline::{PipelineReport, migrate_with_backup};
    pub use crate::rollback::{Rollback, RollbackScope, RollbackTally};
    pub use crate::source::SourceDataset;
    pub use crate::summary::{PhaseState, PhaseSummary, RecordIssue, RunSummary};
    pub use crate::verify::{VerificationReport, Verifier};
}

pub use error::{Error, Result};
