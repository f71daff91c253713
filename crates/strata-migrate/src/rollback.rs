//! Rollback of migrated documents, keyed off migration markers.
//!
//! A rollback selects markers by run id or by destination path prefix,
//! deletes each marker's document, then deletes the marker. Documents are
//! removed children first: markers are ordered by phase index descending so
//! every child collection is emptied before its parent.
//!
//! A marker is only deleted after its document is gone. A rollback that stops
//! part-way (or hits undeletable documents) can therefore be re-run until the
//! tally reports no failures.

use std::cmp::Reverse;
use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use strata_core::observability::{destination_span, migration_span};
use strata_core::{DocumentStore, RunId};

use crate::error::{ConfigError, Result, RollbackError};
use crate::mapping::MigrationPlan;
use crate::marker::{StoredMarker, list_markers};
use crate::metrics::{record_rollback_deletion, record_rollback_failure};
use crate::retry::RetryPolicy;

/// Which markers a rollback targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackScope {
    /// Every marker written by one run.
    Run(RunId),
    /// Every marker whose destination path is at or below a prefix.
    ///
    /// For runs that cannot be identified by id.
    Prefix(String),
}

impl RollbackScope {
    /// Rejects a prefix that would select every marker.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOption` if the prefix is empty once
    /// trailing `/` are removed.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match self {
            Self::Prefix(prefix) if prefix.trim_end_matches('/').is_empty() => {
                Err(ConfigError::InvalidOption {
                    name: "prefix".into(),
                    message: format!("'{prefix}' would select every migrated document"),
                })
            }
            _ => Ok(()),
        }
    }

    fn span(&self) -> tracing::Span {
        match self {
            Self::Run(run_id) => migration_span("rollback", &run_id.to_string()),
            Self::Prefix(_) => destination_span("rollback"),
        }
    }

    fn matches(&self, stored: &StoredMarker) -> bool {
        match self {
            Self::Run(run_id) => stored.marker.run_id == *run_id,
            Self::Prefix(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                let path = stored.marker.destination_path.as_str();
                !prefix.is_empty()
                    && (path == prefix
                        || path
                            .strip_prefix(prefix)
                            .is_some_and(|rest| rest.starts_with('/')))
            }
        }
    }
}

impl std::fmt::Display for RollbackScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run(run_id) => write!(f, "run {run_id}"),
            Self::Prefix(prefix) => write!(f, "prefix '{prefix}'"),
        }
    }
}

/// Final accounting of a rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackTally {
    /// Whether anything was deleted.
    pub dry_run: bool,
    /// Markers selected by the scope.
    pub matched: usize,
    /// Documents deleted.
    pub documents_deleted: usize,
    /// Markers deleted.
    pub markers_deleted: usize,
    /// Destination paths in deletion order (dry runs only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<String>,
    /// Documents or markers that could not be deleted.
    pub failures: Vec<RollbackError>,
}

impl RollbackTally {
    /// Returns true if every matched marker and document was removed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.dry_run && self.failures.is_empty() && self.markers_deleted == self.matched
    }
}

/// Deletes documents previously written by a migration.
pub struct Rollback {
    store: Arc<dyn DocumentStore>,
    plan: MigrationPlan,
    retry: RetryPolicy,
    dry_run: bool,
}

impl std::fmt::Debug for Rollback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rollback")
            .field("retry", &self.retry)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Rollback {
    /// Creates a rollback against the plan's tracking collection.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, plan: MigrationPlan) -> Self {
        Self {
            store,
            plan,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }

    /// Sets the retry policy for deletes.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reports what would be deleted without deleting.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Rolls back every marker in `scope`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the scope is an empty prefix and
    /// `Error::Store` if the tracking collection cannot be listed.
    /// Individual delete failures are collected in the tally.
    pub async fn execute(&self, scope: &RollbackScope) -> Result<RollbackTally> {
        scope.validate()?;
        let span = scope.span();
        async {
            let tracking = self.plan.tracking_collection();
            let mut markers: Vec<StoredMarker> = list_markers(self.store.as_ref(), tracking)
                .await?
                .into_iter()
                .filter(|m| scope.matches(m))
                .collect();
            self.sort_children_first(&mut markers);

            let mut tally = RollbackTally {
                dry_run: self.dry_run,
                matched: markers.len(),
                ..RollbackTally::default()
            };
            tracing::info!(%scope, matched = tally.matched, dry_run = self.dry_run, "rollback started");

            for stored in markers {
                let path = stored.marker.destination_path;
                if self.dry_run {
                    tally.planned.push(path);
                    continue;
                }

                if let Err(exhausted) = self
                    .retry
                    .run("delete_document", || self.store.delete(&path))
                    .await
                {
                    tracing::warn!(%path, error = %exhausted.error, "document delete failed");
                    record_rollback_failure();
                    tally.failures.push(RollbackError {
                        path,
                        marker_path: stored.path,
                        reason: exhausted.error.to_string(),
                    });
                    continue;
                }
                tally.documents_deleted += 1;
                record_rollback_deletion("document");

                match self
                    .retry
                    .run("delete_marker", || self.store.delete(&stored.path))
                    .await
                {
                    Ok(()) => {
                        tally.markers_deleted += 1;
                        record_rollback_deletion("marker");
                    }
                    Err(exhausted) => {
                        tracing::warn!(marker = %stored.path, error = %exhausted.error, "marker delete failed");
                        record_rollback_failure();
                        tally.failures.push(RollbackError {
                            path,
                            marker_path: stored.path,
                            reason: format!("document deleted, marker kept: {}", exhausted.error),
                        });
                    }
                }
            }

            tracing::info!(
                documents_deleted = tally.documents_deleted,
                markers_deleted = tally.markers_deleted,
                failures = tally.failures.len(),
                "rollback finished"
            );
            Ok(tally)
        }
        .instrument(span)
        .await
    }

    /// Orders markers for deletion: latest phase first; entity types unknown
    /// to the plan after known ones, deepest paths first; then by path.
    fn sort_children_first(&self, markers: &mut [StoredMarker]) {
        markers.sort_by_cached_key(|m| {
            let phase = self.plan.phase_index(&m.marker.entity_type);
            let depth = m.marker.destination_path.split('/').count();
            (
                phase.is_none(),
                Reverse(phase),
                Reverse(depth),
                m.marker.destination_path.clone(),
            )
        });
    }
}
