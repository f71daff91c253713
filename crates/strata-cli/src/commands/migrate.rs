//! Migrate command - back up the destination, then migrate a source data set.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use strata_core::RunId;
use strata_migrate::options::RunOptions;
use strata_migrate::orchestrator::{AbortHandle, Migrator};
use strata_migrate::pipeline::migrate_with_backup;
use strata_migrate::source::SourceDataset;
use strata_migrate::verify::Verifier;

use crate::commands::backup::BackupArgs;
use crate::output::{print_json, print_summary, print_verification};
use crate::{Config, OutputFormat};

/// Run option overrides, applied over the environment.
#[derive(Debug, Clone, Default, Args)]
pub struct RunOptionArgs {
    /// Records per atomic batch (1-250).
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Batches in flight within a phase.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Attempts per store operation, including the first.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Base retry delay in milliseconds.
    #[arg(long)]
    pub base_delay_ms: Option<u64>,

    /// Fraction of a phase's records that may fail before the run aborts.
    #[arg(long)]
    pub abort_fraction: Option<f64>,

    /// Documents checked per collection during verification.
    #[arg(long)]
    pub verify_sample: Option<usize>,
}

impl RunOptionArgs {
    /// Resolves defaults, then environment, then these flags.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment value or the merged result is
    /// invalid.
    pub fn resolve(&self) -> Result<RunOptions> {
        self.apply(RunOptions::from_env()?)
    }

    fn apply(&self, mut options: RunOptions) -> Result<RunOptions> {
        if let Some(v) = self.batch_size {
            options.batch_size = v;
        }
        if let Some(v) = self.max_concurrency {
            options.max_concurrency = v;
        }
        if let Some(v) = self.max_attempts {
            options.retry.max_attempts = v;
        }
        if let Some(v) = self.base_delay_ms {
            options.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.abort_fraction {
            options.abort_fraction = v;
        }
        if self.verify_sample.is_some() {
            options.verify_sample = self.verify_sample;
        }
        options.validate()?;
        Ok(options)
    }
}

/// Arguments for the migrate command.
#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Source data set: a JSON file or a directory of per-entity files.
    #[arg(long, env = "STRATA_SOURCE")]
    pub source: PathBuf,

    /// Run ID to use instead of a generated one.
    #[arg(long)]
    pub run_id: Option<String>,

    /// Verify the destination after migrating.
    #[arg(long)]
    pub verify: bool,

    #[allow(missing_docs)]
    #[command(flatten)]
    pub options: RunOptionArgs,

    #[allow(missing_docs)]
    #[command(flatten)]
    pub backup: BackupArgs,
}

/// Execute the migrate command.
///
/// Prints the (partial) summary even when the run aborts or is cancelled.
///
/// # Errors
///
/// Returns an error if configuration, backup, or the run fails, or if
/// verification finds discrepancies.
pub async fn execute(args: MigrateArgs, config: &Config, abort: AbortHandle) -> Result<()> {
    let plan = config.plan().await?;
    let options = args.options.resolve()?;
    let run_id = args
        .run_id
        .as_deref()
        .map(str::parse::<RunId>)
        .transpose()?;
    let source = SourceDataset::load(&args.source, &plan)
        .await
        .with_context(|| format!("Failed to load source {}", args.source.display()))?;
    let exporter = args.backup.exporter(config.store_path()?)?;
    let store = config.open_store().await?;

    let verifier = args
        .verify
        .then(|| Verifier::new(store.clone(), plan.clone()).with_sample(options.verify_sample));
    let migrator = Migrator::new(store, plan, options)?.with_abort_handle(abort);

    let report = match migrate_with_backup(
        exporter.as_ref(),
        &migrator,
        &source,
        run_id,
        verifier.as_ref(),
    )
    .await
    {
        Ok(report) => report,
        Err(e) => {
            if let Some(summary) = e.summary() {
                print_summary(summary, &config.format)?;
            }
            return Err(e.into());
        }
    };

    match config.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text | OutputFormat::Table => {
            println!("Backup: {}", report.backup.location);
            print_summary(&report.summary, &config.format)?;
            if let Some(verification) = &report.verification {
                println!();
                println!("Verification:");
                print_verification(verification, &config.format)?;
            }
        }
    }

    if report.verification.as_ref().is_some_and(|v| !v.is_clean()) {
        anyhow::bail!("Verification found discrepancies");
    }
    Ok(())
}
