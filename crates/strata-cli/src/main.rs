//! Strata CLI - Command-line interface for hierarchical migrations.
//!
//! The main entry point for the `strata` CLI binary.

use anyhow::Result;
use clap::Parser;

use strata_cli::{Cli, Commands};
use strata_core::init_logging;
use strata_migrate::metrics::register_metrics;
use strata_migrate::orchestrator::AbortHandle;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    init_logging(cli.log_format.into(), "info");
    register_metrics();
    let config = cli.config();

    // Create runtime and execute
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let abort = AbortHandle::new();
        let on_interrupt = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after in-flight batches");
                on_interrupt.abort();
            }
        });

        match cli.command {
            Commands::Plan(args) => strata_cli::commands::plan::execute(args, &config).await,
            Commands::Backup(args) => strata_cli::commands::backup::execute(args, &config).await,
            Commands::Migrate(args) => {
                strata_cli::commands::migrate::execute(args, &config, abort).await
            }
            Commands::Verify(args) => strata_cli::commands::verify::execute(args, &config).await,
            Commands::Rollback(args) => {
                strata_cli::commands::rollback::execute(args, &config).await
            }
            Commands::Runs(args) => strata_cli::commands::runs::execute(args, &config).await,
        }
    })
}
