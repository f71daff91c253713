//! A migration only starts after the backup succeeds.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::Utc;

use strata_core::DocumentStore;
use strata_migrate::backup::{BackupSnapshot, SnapshotExporter};
use strata_migrate::error::{BackupError, Error};
use strata_migrate::pipeline::migrate_with_backup;
use strata_migrate::verify::Verifier;
use strata_test_utils::{FaultyStore, assert_all_written, migrator, scenario_plan, scenario_source};

struct StubExporter {
    result: fn() -> Result<BackupSnapshot, BackupError>,
}

#[async_trait]
impl SnapshotExporter for StubExporter {
    async fn export(&self) -> Result<BackupSnapshot, BackupError> {
        (self.result)()
    }
}

fn tool_missing() -> Result<BackupSnapshot, BackupError> {
    Err(BackupError::ToolNotFound {
        tool: "gcloud".into(),
        searched: Vec::new(),
    })
}

fn exported() -> Result<BackupSnapshot, BackupError> {
    Ok(BackupSnapshot {
        location: "gs://backups/strata/20240101T000000Z".into(),
        operation: Some("operations/export-1".into()),
        created_at: Utc::now(),
    })
}

#[tokio::test]
async fn failed_backup_blocks_every_write() {
    let store = FaultyStore::new();
    let exporter = StubExporter {
        result: tool_missing,
    };

    let err = migrate_with_backup(
        &exporter,
        &migrator(&store, scenario_plan()),
        &scenario_source(),
        None,
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Backup(BackupError::ToolNotFound { .. })));
    assert!(store.operations().is_empty(), "no store access before backup");
    assert_eq!(store.inner().count("").await.unwrap(), 0);
}

#[tokio::test]
async fn successful_backup_precedes_migration() {
    let store = FaultyStore::new();
    let exporter = StubExporter { result: exported };
    let verifier = Verifier::new(store.shared(), scenario_plan());

    let report = migrate_with_backup(
        &exporter,
        &migrator(&store, scenario_plan()),
        &scenario_source(),
        None,
        Some(&verifier),
    )
    .await
    .unwrap();

    assert_eq!(report.backup.location, "gs://backups/strata/20240101T000000Z");
    assert_all_written(&report.summary, 2);
    assert!(report.verification.unwrap().is_clean());
}
