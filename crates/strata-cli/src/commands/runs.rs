//! Runs command - list runs recorded in the tracking collection.

use anyhow::Result;
use clap::Args;

use strata_migrate::marker::list_runs;

use crate::Config;
use crate::output::print_runs;

/// Arguments for the runs command.
#[derive(Debug, Args)]
pub struct RunsArgs {
    /// Show only the most recent N runs.
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Execute the runs command.
///
/// # Errors
///
/// Returns an error if the mapping or store cannot be loaded.
pub async fn execute(args: RunsArgs, config: &Config) -> Result<()> {
    let plan = config.plan().await?;
    let store = config.open_store().await?;

    let mut runs = list_runs(store.as_ref(), plan.tracking_collection()).await?;
    if let Some(limit) = args.limit {
        let skip = runs.len().saturating_sub(limit);
        runs.drain(..skip);
    }
    print_runs(&runs, &config.format)
}
