//! Backup command - export the destination store.
//!
//! A `gs://` prefix is exported through `gcloud firestore export`; any other
//! prefix is a local directory that receives a timestamped copy of the store
//! file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::Args;

use strata_migrate::backup::{BackupConfig, BackupSnapshot, GcloudExporter, SnapshotExporter};
use strata_migrate::error::BackupError;

use crate::output::print_json;
use crate::{Config, OutputFormat};

/// Arguments for the backup command (also used by `migrate`).
#[derive(Debug, Clone, Args)]
pub struct BackupArgs {
    /// Export destination: a `gs://` URI prefix or a local directory.
    #[arg(long = "backup-prefix", env = "STRATA_BACKUP_PREFIX")]
    pub prefix: Option<String>,

    /// Project to export (managed exports only).
    #[arg(long, env = "STRATA_PROJECT")]
    pub project: Option<String>,

    /// Explicit path to the `gcloud` binary.
    #[arg(long = "gcloud", env = "STRATA_GCLOUD")]
    pub gcloud: Option<PathBuf>,
}

impl BackupArgs {
    /// Builds the exporter for the configured prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if no prefix is configured.
    pub fn exporter(&self, store: &Path) -> Result<Box<dyn SnapshotExporter>> {
        let prefix = self
            .prefix
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .context("Backup prefix is required. Set STRATA_BACKUP_PREFIX or use --backup-prefix")?;

        if prefix.starts_with("gs://") {
            let exporter = GcloudExporter::new(BackupConfig {
                output_uri_prefix: prefix.to_string(),
                project: self.project.clone(),
                tool_path: self.gcloud.clone(),
            })?;
            Ok(Box::new(exporter))
        } else {
            Ok(Box::new(FileCopyExporter {
                store: store.to_path_buf(),
                dir: PathBuf::from(prefix),
            }))
        }
    }
}

/// Copies a JSON store file into a backup directory.
#[derive(Debug, Clone)]
pub struct FileCopyExporter {
    store: PathBuf,
    dir: PathBuf,
}

#[async_trait]
impl SnapshotExporter for FileCopyExporter {
    async fn export(&self) -> Result<BackupSnapshot, BackupError> {
        let created_at = Utc::now();
        let stem = self
            .store
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("store");
        let target = self
            .dir
            .join(format!("{stem}-{}.json", created_at.format("%Y%m%dT%H%M%S%3fZ")));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| BackupError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let operation = match tokio::fs::copy(&self.store, &target).await {
            Ok(bytes) => format!("copied {bytes} bytes"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(store = %self.store.display(), "store file does not exist yet, nothing to copy");
                "empty destination".to_string()
            }
            Err(source) => return Err(BackupError::Io { path: target, source }),
        };

        Ok(BackupSnapshot {
            location: target.display().to_string(),
            operation: Some(operation),
            created_at,
        })
    }
}

/// Execute the backup command.
///
/// # Errors
///
/// Returns an error if the store or prefix is missing or the export fails.
pub async fn execute(args: BackupArgs, config: &Config) -> Result<()> {
    let store = config.store_path()?;
    let snapshot = args
        .exporter(store)?
        .export()
        .await
        .context("Backup failed")?;

    match config.format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Text | OutputFormat::Table => {
            println!("Backup written to {}", snapshot.location);
            if let Some(operation) = &snapshot.operation {
                println!("  Operation: {operation}");
            }
            println!("  Created:   {}", snapshot.created_at);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(prefix: Option<&str>) -> BackupArgs {
        BackupArgs {
            prefix: prefix.map(str::to_string),
            project: None,
            gcloud: None,
        }
    }

    #[test]
    fn test_backup_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: BackupArgs,
        }

        let cli = TestCli::parse_from([
            "test",
            "--backup-prefix",
            "gs://bucket/backups",
            "--project",
            "demo",
        ]);
        assert_eq!(cli.args.prefix.as_deref(), Some("gs://bucket/backups"));
        assert_eq!(cli.args.project.as_deref(), Some("demo"));
    }

    #[test]
    fn test_missing_prefix_is_rejected() {
        assert!(args(None).exporter(Path::new("dest.json")).is_err());
        assert!(args(Some(" ")).exporter(Path::new("dest.json")).is_err());
    }

    #[tokio::test]
    async fn test_file_copy_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("dest.json");
        tokio::fs::write(&store, "{}").await.unwrap();
        let backups = dir.path().join("backups");

        let snapshot = args(Some(backups.to_str().unwrap()))
            .exporter(&store)
            .unwrap()
            .export()
            .await
            .unwrap();

        assert!(snapshot.location.starts_with(backups.to_str().unwrap()));
        assert_eq!(tokio::fs::read_to_string(&snapshot.location).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_missing_store_file_is_an_empty_backup() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = FileCopyExporter {
            store: dir.path().join("absent.json"),
            dir: dir.path().join("backups"),
        }
        .export()
        .await
        .unwrap();
        assert_eq!(snapshot.operation.as_deref(), Some("empty destination"));
    }
}
