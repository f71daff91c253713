//! Guarded migration pipeline: backup, migrate, then optionally verify.
//!
//! The migrator is only invoked after the exporter returns a snapshot. A
//! backup failure ends the pipeline before any write.

use serde::Serialize;

use strata_core::RunId;

use crate::backup::{BackupSnapshot, SnapshotExporter};
use crate::error::Result;
use crate::orchestrator::Migrator;
use crate::source::SourceDataset;
use crate::summary::RunSummary;
use crate::verify::{VerificationReport, Verifier};

/// Everything a guarded run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    /// Snapshot taken before the first write.
    pub backup: BackupSnapshot,
    /// Migration outcome.
    pub summary: RunSummary,
    /// Verification outcome, when requested.
    pub verification: Option<VerificationReport>,
}

/// Takes a backup, then migrates `source`, then verifies if a verifier is
/// given.
///
/// # Errors
///
/// Returns `Error::Backup` without touching the store if the export fails.
/// Migration and verification errors are returned as-is.
pub async fn migrate_with_backup(
    exporter: &dyn SnapshotExporter,
    migrator: &Migrator,
    source: &SourceDataset,
    run_id: Option<RunId>,
    verifier: Option<&Verifier>,
) -> Result<PipelineReport> {
    let backup = match exporter.export().await {
        Ok(backup) => backup,
        Err(e) => {
            tracing::error!(error = %e, "backup failed, migration not started");
            return Err(e.into());
        }
    };
    tracing::info!(location = %backup.location, "backup taken");

    let summary = migrator
        .run_with_id(run_id.unwrap_or_else(RunId::generate), source)
        .await?;

    let verification = match verifier {
        Some(verifier) => Some(verifier.verify(source).await?),
        None => None,
    };

    Ok(PipelineReport {
        backup,
        summary,
        verification,
    })
}
