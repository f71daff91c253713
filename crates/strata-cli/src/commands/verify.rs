//! Verify command - compare the destination against a source data set.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use strata_migrate::options::RunOptions;
use strata_migrate::source::SourceDataset;
use strata_migrate::verify::Verifier;

use crate::Config;
use crate::output::print_verification;

/// Arguments for the verify command.
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Source data set: a JSON file or a directory of per-entity files.
    #[arg(long, env = "STRATA_SOURCE")]
    pub source: PathBuf,

    /// Documents checked per collection (default: all, or `STRATA_VERIFY_SAMPLE`).
    #[arg(long)]
    pub sample: Option<usize>,
}

/// Execute the verify command.
///
/// # Errors
///
/// Returns an error if loading fails or the report has discrepancies.
pub async fn execute(args: VerifyArgs, config: &Config) -> Result<()> {
    let plan = config.plan().await?;
    let sample = match args.sample {
        Some(0) => anyhow::bail!("--sample must be at least 1"),
        Some(n) => Some(n),
        None => RunOptions::from_env()?.verify_sample,
    };
    let source = SourceDataset::load(&args.source, &plan)
        .await
        .with_context(|| format!("Failed to load source {}", args.source.display()))?;
    let store = config.open_store().await?;

    let report = Verifier::new(store, plan)
        .with_sample(sample)
        .verify(&source)
        .await?;
    print_verification(&report, &config.format)?;

    if !report.is_clean() {
        anyhow::bail!("Verification found discrepancies");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: VerifyArgs,
        }

        let cli = TestCli::parse_from(["test", "--source", "data", "--sample", "20"]);
        assert_eq!(cli.args.source, PathBuf::from("data"));
        assert_eq!(cli.args.sample, Some(20));
    }
}
