//! Pre-migration backup.
//!
//! Before any write the destination is exported in full through the store's
//! managed export. The bundled [`GcloudExporter`] shells out to
//! `gcloud firestore export`; the tool is located dynamically, falling back
//! across well-known install locations when it is not on `PATH`.
//!
//! Exporters sit behind [`SnapshotExporter`] so the guarded pipeline can be
//! driven by fakes in tests.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::BackupError;

/// Export tool binary name.
pub const EXPORT_TOOL: &str = "gcloud";

/// Install directories searched after `PATH`. `~` is the home directory.
const FALLBACK_DIRS: &[&str] = &[
    "~/google-cloud-sdk/bin",
    "/usr/lib/google-cloud-sdk/bin",
    "/usr/local/google-cloud-sdk/bin",
    "/opt/google-cloud-sdk/bin",
    "/snap/bin",
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
];

/// Where and how to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupConfig {
    /// Destination prefix for exports, e.g. `gs://bucket/backups`.
    pub output_uri_prefix: String,
    /// Project to export (tool default when unset).
    pub project: Option<String>,
    /// Explicit tool location, tried before any search.
    pub tool_path: Option<PathBuf>,
}

/// A completed export. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    /// Where the export was written.
    pub location: String,
    /// Export operation name, when the tool reports one.
    pub operation: Option<String>,
    /// When the export was requested.
    pub created_at: DateTime<Utc>,
}

/// Triggers one full export of the destination store.
#[async_trait]
pub trait SnapshotExporter: Send + Sync {
    /// Exports the destination store's current state.
    ///
    /// # Errors
    ///
    /// Returns a [`BackupError`] if the export cannot be started or is
    /// rejected.
    async fn export(&self) -> Result<BackupSnapshot, BackupError>;
}

/// Lists the locations checked for `tool`, in resolution order.
#[must_use]
pub fn candidate_paths(
    tool: &str,
    explicit: Option<&Path>,
    path_var: Option<&OsString>,
    home: Option<&Path>,
) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(explicit) = explicit {
        candidates.push(explicit.to_path_buf());
    }
    if let Some(path_var) = path_var {
        candidates.extend(std::env::split_paths(path_var).map(|dir| dir.join(tool)));
    }
    for dir in FALLBACK_DIRS {
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = home {
                candidates.push(home.join(rest).join(tool));
            }
        } else {
            candidates.push(Path::new(dir).join(tool));
        }
    }
    candidates
}

/// Returns the first candidate location that holds a file.
///
/// # Errors
///
/// Returns `BackupError::ToolNotFound` listing every location searched.
pub fn resolve_export_tool(
    tool: &str,
    explicit: Option<&Path>,
    path_var: Option<&OsString>,
    home: Option<&Path>,
) -> Result<PathBuf, BackupError> {
    let searched = candidate_paths(tool, explicit, path_var, home);
    match searched.iter().find(|candidate| candidate.is_file()) {
        Some(found) => Ok(found.clone()),
        None => Err(BackupError::ToolNotFound {
            tool: tool.to_string(),
            searched,
        }),
    }
}

/// Exports through `gcloud firestore export`.
#[derive(Debug, Clone)]
pub struct GcloudExporter {
    config: BackupConfig,
}

impl GcloudExporter {
    /// Creates an exporter.
    ///
    /// # Errors
    ///
    /// Returns `BackupError::InvalidConfig` if the output prefix is empty.
    pub fn new(config: BackupConfig) -> Result<Self, BackupError> {
        if config.output_uri_prefix.trim().is_empty() {
            return Err(BackupError::InvalidConfig {
                message: "output URI prefix is required".into(),
            });
        }
        Ok(Self { config })
    }

    fn resolve_tool(&self) -> Result<PathBuf, BackupError> {
        let path_var = std::env::var_os("PATH");
        let home = std::env::var_os("HOME").map(PathBuf::from);
        resolve_export_tool(
            EXPORT_TOOL,
            self.config.tool_path.as_deref(),
            path_var.as_ref(),
            home.as_deref(),
        )
    }

    fn export_args(&self, destination: &str) -> Vec<String> {
        let mut args = vec![
            "firestore".to_string(),
            "export".to_string(),
            destination.to_string(),
        ];
        if let Some(project) = &self.config.project {
            args.push(format!("--project={project}"));
        }
        args.push("--format=json".to_string());
        args
    }
}

#[async_trait]
impl SnapshotExporter for GcloudExporter {
    async fn export(&self) -> Result<BackupSnapshot, BackupError> {
        let tool = self.resolve_tool()?;
        let created_at = Utc::now();
        let destination = format!(
            "{}/{}",
            self.config.output_uri_prefix.trim_end_matches('/'),
            created_at.format("%Y%m%dT%H%M%SZ")
        );

        tracing::info!(tool = %tool.display(), %destination, "starting export");
        let output = tokio::process::Command::new(&tool)
            .args(self.export_args(&destination))
            .output()
            .await
            .map_err(|source| BackupError::Launch {
                path: tool.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(status = %output.status, %stderr, "export rejected");
            return Err(BackupError::Rejected {
                status: output.status.to_string(),
                stderr,
            });
        }

        let snapshot = parse_export_output(&output.stdout, destination, created_at);
        tracing::info!(
            location = %snapshot.location,
            operation = snapshot.operation.as_deref().unwrap_or("-"),
            "export finished"
        );
        Ok(snapshot)
    }
}

fn parse_export_output(stdout: &[u8], requested: String, created_at: DateTime<Utc>) -> BackupSnapshot {
    let parsed: Option<Value> = serde_json::from_slice(stdout).ok();
    if parsed.is_none() && !stdout.is_empty() {
        tracing::warn!("export output is not JSON; recording the requested location");
    }
    let field = |pointer: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.pointer(pointer))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    BackupSnapshot {
        location: field("/metadata/outputUriPrefix").unwrap_or(requested),
        operation: field("/name"),
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_follow_resolution_order() {
        let path_var = std::env::join_paths(["/a", "/b"]).unwrap();
        let candidates = candidate_paths(
            "gcloud",
            Some(Path::new("/custom/gcloud")),
            Some(&path_var),
            Some(Path::new("/home/op")),
        );
        assert_eq!(candidates[0], PathBuf::from("/custom/gcloud"));
        assert_eq!(candidates[1], PathBuf::from("/a/gcloud"));
        assert_eq!(candidates[2], PathBuf::from("/b/gcloud"));
        assert_eq!(candidates[3], PathBuf::from("/home/op/google-cloud-sdk/bin/gcloud"));
        assert_eq!(candidates.last().unwrap(), &PathBuf::from("/usr/bin/gcloud"));
    }

    #[test]
    fn home_fallback_is_skipped_without_home() {
        let candidates = candidate_paths("gcloud", None, None, None);
        assert_eq!(candidates.len(), FALLBACK_DIRS.len() - 1);
    }

    #[test]
    fn resolves_first_existing_file() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("strata-fake-tool"), "").unwrap();
        let path_var = std::env::join_paths([first.path(), second.path()]).unwrap();

        let found = resolve_export_tool("strata-fake-tool", None, Some(&path_var), None).unwrap();
        assert_eq!(found, second.path().join("strata-fake-tool"));
    }

    #[test]
    fn missing_tool_lists_search() {
        let empty = tempfile::tempdir().unwrap();
        let path_var = std::env::join_paths([empty.path()]).unwrap();
        let err = resolve_export_tool("strata-no-such-tool", None, Some(&path_var), None).unwrap_err();
        match err {
            BackupError::ToolNotFound { tool, searched } => {
                assert_eq!(tool, "strata-no-such-tool");
                assert_eq!(searched[0], empty.path().join("strata-no-such-tool"));
            }
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }

    #[test]
    fn parses_export_operation() {
        let created_at = Utc::now();
        let snapshot = parse_export_output(
            br#"{"name": "projects/p/databases/(default)/operations/op1",
                 "metadata": {"outputUriPrefix": "gs://bucket/backups/20240101T000000Z"}}"#,
            "gs://bucket/backups/requested".into(),
            created_at,
        );
        assert_eq!(snapshot.location, "gs://bucket/backups/20240101T000000Z");
        assert_eq!(
            snapshot.operation.as_deref(),
            Some("projects/p/databases/(default)/operations/op1")
        );

        let plain = parse_export_output(b"done", "gs://bucket/x".into(), created_at);
        assert_eq!(plain.location, "gs://bucket/x");
        assert!(plain.operation.is_none());
    }

    #[test]
    fn export_args_include_project() {
        let exporter = GcloudExporter::new(BackupConfig {
            output_uri_prefix: "gs://bucket".into(),
            project: Some("demo".into()),
            tool_path: None,
        })
        .unwrap();
        assert_eq!(
            exporter.export_args("gs://bucket/t"),
            vec!["firestore", "export", "gs://bucket/t", "--project=demo", "--format=json"]
        );
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(matches!(
            GcloudExporter::new(BackupConfig::default()),
            Err(BackupError::InvalidConfig { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_rejected() {
        let exporter = GcloudExporter::new(BackupConfig {
            output_uri_prefix: "gs://bucket".into(),
            project: None,
            tool_path: Some(PathBuf::from("/bin/sh")),
        })
        .unwrap();
        // `sh firestore ...` fails because no script named `firestore` exists.
        let err = exporter.export().await.unwrap_err();
        assert!(matches!(err, BackupError::Rejected { .. }), "{err:?}");
    }
}
