//! Rollback command - delete the documents written by a run.

use anyhow::Result;
use clap::{ArgGroup, Args};

use strata_core::RunId;
use strata_migrate::options::RunOptions;
use strata_migrate::rollback::{Rollback, RollbackScope};

use crate::Config;
use crate::output::print_tally;

/// Arguments for the rollback command.
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("scope").required(true).args(["run", "prefix"])))]
pub struct RollbackArgs {
    /// Run ID whose documents are deleted (see `strata runs`).
    #[arg(long)]
    pub run: Option<String>,

    /// Delete every migrated document at or below this path instead.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Report what would be deleted without deleting.
    #[arg(long)]
    pub dry_run: bool,
}

impl RollbackArgs {
    /// Returns the selected scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the run ID is malformed, the prefix is empty, or no
    /// scope is given.
    pub fn scope(&self) -> Result<RollbackScope> {
        match (&self.run, &self.prefix) {
            (Some(run), _) => Ok(RollbackScope::Run(run.parse::<RunId>()?)),
            (None, Some(prefix)) => {
                let scope = RollbackScope::Prefix(prefix.clone());
                scope.validate()?;
                Ok(scope)
            }
            (None, None) => anyhow::bail!("Either --run or --prefix is required"),
        }
    }
}

/// Execute the rollback command.
///
/// # Errors
///
/// Returns an error if the markers cannot be listed or any deletion failed.
pub async fn execute(args: RollbackArgs, config: &Config) -> Result<()> {
    let scope = args.scope()?;
    let plan = config.plan().await?;
    let retry = RunOptions::from_env()?.retry;
    let store = config.open_store().await?;

    let tally = Rollback::new(store, plan)
        .with_retry(retry)
        .dry_run(args.dry_run)
        .execute(&scope)
        .await?;
    print_tally(&tally, &config.format)?;

    if !tally.failures.is_empty() {
        anyhow::bail!(
            "{} deletions failed; re-run the rollback to finish",
            tally.failures.len()
        );
    }
    Ok(())
}
