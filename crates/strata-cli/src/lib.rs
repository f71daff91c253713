//! # strata-cli
//!
//! Command-line interface for Strata migrations.
//!
//! ## Commands
//!
//! - `strata plan` - Validate the mapping and print the phase order
//! - `strata backup` - Export the destination store
//! - `strata migrate` - Back up, then migrate a source data set
//! - `strata verify` - Compare the destination against the source
//! - `strata rollback` - Delete one run's documents, children first
//! - `strata runs` - List runs recorded in the tracking collection
//!
//! ## Configuration
//!
//! The CLI uses environment variables or command-line flags for settings:
//!
//! - `STRATA_STORE` - Destination JSON store file
//! - `STRATA_MAPPING` - Mapping definition file
//! - `STRATA_BATCH_SIZE`, `STRATA_MAX_CONCURRENCY`, `STRATA_RETRY_*`,
//!   `STRATA_ABORT_FRACTION`, `STRATA_VERIFY_SAMPLE` - Run options
//! - `RUST_LOG` - Log filter

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;
pub mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use strata_core::{DocumentStore, JsonFileStore, LogFormat};
use strata_migrate::mapping::{MappingDefinition, MigrationPlan};

/// Strata CLI - hierarchical data migration.
#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Destination store file.
    #[arg(long, env = "STRATA_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Mapping definition file.
    #[arg(long, env = "STRATA_MAPPING", global = true)]
    pub mapping: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Log format.
    #[arg(long, env = "STRATA_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: LogFormatArg,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            store: self.store.clone(),
            mapping: self.mapping.clone(),
            format: self.format.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate the mapping and print the phase order.
    Plan(commands::plan::PlanArgs),
    /// Export the destination store.
    Backup(commands::backup::BackupArgs),
    /// Back up the destination, then migrate a source data set.
    Migrate(commands::migrate::MigrateArgs),
    /// Compare the destination against a source data set.
    Verify(commands::verify::VerifyArgs),
    /// Delete the documents written by a run.
    Rollback(commands::rollback::RollbackArgs),
    /// List runs recorded in the tracking collection.
    Runs(commands::runs::RunsArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Pretty-printed logs.
    #[default]
    Pretty,
    /// JSON structured logs.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Destination store file.
    pub store: Option<PathBuf>,
    /// Mapping definition file.
    pub mapping: Option<PathBuf>,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Loads and resolves the mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if no mapping is configured or it is invalid.
    pub async fn plan(&self) -> Result<MigrationPlan> {
        let path = self
            .mapping
            .as_ref()
            .context("Mapping file is required. Set STRATA_MAPPING or use --mapping")?;
        let definition = MappingDefinition::from_file(path).await?;
        definition
            .resolve()
            .with_context(|| format!("Invalid mapping {}", path.display()))
    }

    /// Returns the configured store path.
    ///
    /// # Errors
    ///
    /// Returns an error if no store is configured.
    pub fn store_path(&self) -> Result<&PathBuf> {
        self.store
            .as_ref()
            .context("Store file is required. Set STRATA_STORE or use --store")
    }

    /// Opens the destination store.
    ///
    /// # Errors
    ///
    /// Returns an error if no store is configured or it cannot be opened.
    pub async fn open_store(&self) -> Result<Arc<dyn DocumentStore>> {
        let path = self.store_path()?;
        let store = JsonFileStore::open(path)
            .await
            .with_context(|| format!("Failed to open store {}", path.display()))?;
        Ok(Arc::new(store))
    }
}
