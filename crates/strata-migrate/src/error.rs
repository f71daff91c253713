//! Error types for the migration domain.
//!
//! Errors fall into three tiers:
//!
//! - **Fatal before any write**: [`ConfigError`], [`BackupError`], source load
//!   failures. The run never starts.
//! - **Fatal to the run**: [`Error::PhaseAborted`] and [`Error::Cancelled`].
//!   Both carry the partial [`RunSummary`] so nothing goes unreported.
//! - **Per item, recoverable**: [`RecordError`] (validation, conflict, write
//!   failure) and [`RollbackError`]. These are collected into summaries and
//!   tallies; they never abort a phase on their own.

use std::path::PathBuf;

use serde::Serialize;

use strata_core::RunId;

use crate::summary::RunSummary;

/// The result type used throughout strata-migrate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a migration, verification, or rollback invocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The mapping or run options are invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pre-migration backup could not be taken.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// The source data set could not be loaded.
    #[error("source error: {message}")]
    Source {
        /// Description of the failure.
        message: String,
    },

    /// A phase's failure rate exceeded the configured threshold.
    ///
    /// No dependent phase was started.
    #[error(
        "phase '{entity_type}' aborted: {failed} of {total} records failed (threshold {threshold})"
    )]
    PhaseAborted {
        /// Entity type of the aborted phase.
        entity_type: String,
        /// Records that failed to write.
        failed: usize,
        /// Records in the phase.
        total: usize,
        /// Configured abort fraction.
        threshold: f64,
        /// Summary of everything processed up to the abort.
        summary: Box<RunSummary>,
    },

    /// The run was cancelled by the operator.
    #[error("run {run_id} cancelled during phase '{entity_type}'")]
    Cancelled {
        /// The cancelled run.
        run_id: RunId,
        /// Entity type being processed when cancellation was observed.
        entity_type: String,
        /// Summary of everything processed up to the cancellation.
        summary: Box<RunSummary>,
    },

    /// A store operation failed outside per-record processing.
    #[error("store error: {0}")]
    Store(#[from] strata_core::Error),

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Returns the partial run summary carried by run-fatal errors.
    #[must_use]
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::PhaseAborted { summary, .. } | Self::Cancelled { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

/// Invalid mapping definition or run options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The mapping file could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error message.
        message: String,
    },

    /// The mapping could not be parsed.
    #[error("invalid mapping: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },

    /// The mapping declares no entity types.
    #[error("mapping declares no entity types")]
    Empty,

    /// Two entity declarations share a name.
    #[error("entity type '{entity}' is declared more than once")]
    DuplicateEntity {
        /// The repeated entity type.
        entity: String,
    },

    /// A parent relationship names an entity type that is not declared.
    #[error("entity type '{entity}' declares unknown parent '{parent}'")]
    UnknownParent {
        /// The child entity type.
        entity: String,
        /// The undeclared parent.
        parent: String,
    },

    /// The declared parent relationships contain a cycle.
    #[error("cycle detected in parent relationships: {cycle:?}")]
    CycleDetected {
        /// Entity types participating in the cycle.
        cycle: Vec<String>,
    },

    /// A path template is malformed.
    #[error("invalid path template '{template}' for '{entity}': {reason}")]
    InvalidTemplate {
        /// Entity type owning the template.
        entity: String,
        /// The template text.
        template: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A path template references a placeholder that is not an ancestor.
    #[error("path template for '{entity}' references undeclared placeholder '{placeholder}'")]
    UndeclaredPlaceholder {
        /// Entity type owning the template.
        entity: String,
        /// The unknown placeholder name.
        placeholder: String,
    },

    /// Two entity types write into the same destination collection.
    #[error("entity types '{first}' and '{second}' share destination prefix '{pattern}'")]
    DuplicatePathPrefix {
        /// First entity type.
        first: String,
        /// Second entity type (or the tracking collection).
        second: String,
        /// The shared collection pattern.
        pattern: String,
    },

    /// The explicit dependency order is inconsistent with the declarations.
    #[error("invalid dependency order: {message}")]
    InvalidOrder {
        /// Why the order was rejected.
        message: String,
    },

    /// A run option is out of range or unparsable.
    #[error("invalid option {name}: {message}")]
    InvalidOption {
        /// Option name (environment variable or field).
        name: String,
        /// Why it was rejected.
        message: String,
    },
}

/// Failure to take the pre-migration backup.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// The export tool is not installed in any known location.
    #[error("export tool '{tool}' not found (searched {} locations)", searched.len())]
    ToolNotFound {
        /// Tool binary name.
        tool: String,
        /// Every candidate path that was checked.
        searched: Vec<PathBuf>,
    },

    /// The export tool could not be started.
    #[error("failed to launch {}: {source}", path.display())]
    Launch {
        /// Resolved tool path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The export request was rejected.
    #[error("export rejected ({status}): {stderr}")]
    Rejected {
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The snapshot could not be written.
    #[error("failed to write snapshot {}: {source}", path.display())]
    Io {
        /// Snapshot destination.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backup configuration is unusable.
    #[error("invalid backup configuration: {message}")]
    InvalidConfig {
        /// Why it was rejected.
        message: String,
    },
}

/// Per-record outcome that prevented a write.
///
/// Recorded in the [`RunSummary`]; never aborts a phase by itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordError {
    /// The source record is malformed after projection.
    #[error("validation failed: {reason}")]
    Validation {
        /// What is missing or invalid.
        reason: String,
    },

    /// A marker exists for the destination with a different content hash.
    ///
    /// Signals mapping drift between runs; the stored document is untouched.
    #[error("conflict: marker hash {stored_hash} (run {stored_run_id}) != computed {computed_hash}")]
    Conflict {
        /// Hash recorded in the existing marker.
        stored_hash: String,
        /// Hash of the newly projected payload.
        computed_hash: String,
        /// Run that wrote the existing marker.
        stored_run_id: String,
    },

    /// The write failed permanently or exhausted its retries.
    #[error("write failed after {attempts} attempt(s): {reason}")]
    WriteFailed {
        /// Attempts made.
        attempts: u32,
        /// Last error message.
        reason: String,
    },

    /// The record was never attempted because the run stopped first.
    #[error("not attempted: {reason}")]
    NotAttempted {
        /// Why processing stopped.
        reason: String,
    },
}

impl RecordError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

/// Failure to remove one migrated document during rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("failed to delete {path}: {reason}")]
#[serde(rename_all = "camelCase")]
pub struct RollbackError {
    /// Destination document path.
    pub path: String,
    /// Marker path left in place so the rollback can be resumed.
    pub marker_path: String,
    /// Last error message.
    pub reason: String,
}
