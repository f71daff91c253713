//! Rendering of run summaries, verification reports, rollback tallies, and
//! run listings in the configured output format.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled};

use strata_migrate::marker::RunRecord;
use strata_migrate::rollback::RollbackTally;
use strata_migrate::summary::{PhaseState, RunSummary};
use strata_migrate::verify::VerificationReport;

use crate::OutputFormat;

/// Prints `value` as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Colors a phase state for terminal output.
#[must_use]
pub fn state_colored(state: PhaseState) -> String {
    let label = state.to_string();
    match state {
        PhaseState::Complete => label.green().to_string(),
        PhaseState::Degraded => label.yellow().to_string(),
        PhaseState::Aborted => label.red().to_string(),
        PhaseState::Running => label.blue().to_string(),
    }
}

#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Total")]
    total: usize,
    #[tabled(rename = "Written")]
    written: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
    #[tabled(rename = "Invalid")]
    invalid: usize,
    #[tabled(rename = "Conflicts")]
    conflicts: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Not attempted")]
    not_attempted: usize,
}

/// Prints a run summary.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_summary(summary: &RunSummary, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let rows: Vec<_> = summary
                .phases
                .iter()
                .map(|p| PhaseRow {
                    entity: p.entity_type.clone(),
                    state: p.state.to_string(),
                    total: p.total,
                    written: p.written,
                    skipped: p.skipped_idempotent,
                    invalid: p.skipped_validation,
                    conflicts: p.conflicts,
                    failed: p.failed,
                    not_attempted: p.not_attempted,
                })
                .collect();
            println!("Run: {}", summary.run_id);
            println!("{}", Table::new(rows));
            print_issues(summary);
            Ok(())
        }
        OutputFormat::Text => {
            println!("Run: {}", summary.run_id);
            println!("Started: {}", summary.started_at);
            if let Some(finished) = summary.finished_at {
                println!("Finished: {finished}");
            }
            println!();
            for p in &summary.phases {
                println!(
                    "  {:<16} {:<10} written {}, skipped {}, invalid {}, conflicts {}, failed {}, not attempted {}",
                    p.entity_type,
                    state_colored(p.state),
                    p.written,
                    p.skipped_idempotent,
                    p.skipped_validation,
                    p.conflicts,
                    p.failed,
                    p.not_attempted
                );
            }
            print_issues(summary);
            Ok(())
        }
    }
}

fn print_issues(summary: &RunSummary) {
    let issues: Vec<_> = summary.issues().collect();
    if issues.is_empty() {
        return;
    }
    println!();
    println!("Issues ({}):", issues.len());
    for issue in issues {
        println!(
            "  {} {} [{}] {}",
            issue.entity_type,
            issue.source_id,
            issue.destination_path.as_deref().unwrap_or("-"),
            issue.error.to_string().dimmed()
        );
    }
}

/// Prints a verification report.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_verification(report: &VerificationReport, format: &OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Json) {
        return print_json(report);
    }

    for c in &report.collections {
        let status = if c.is_clean() {
            "OK".green().to_string()
        } else {
            "MISMATCH".red().to_string()
        };
        println!(
            "  {:<16} {status} expected {}, found {}, checked {}",
            c.entity_type, c.expected, c.actual, c.checked
        );
        for missing in &c.missing_required {
            println!("    {} missing {}", missing.path, missing.fields.join(", "));
        }
        for orphan in &c.orphaned {
            println!(
                "    {} orphaned {}={} (expected {})",
                orphan.path,
                orphan.field,
                orphan.value.as_deref().unwrap_or("null"),
                orphan.expected_parent_path.as_deref().unwrap_or("any parent")
            );
        }
    }
    Ok(())
}

/// Prints a rollback tally.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_tally(tally: &RollbackTally, format: &OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Json) {
        return print_json(tally);
    }

    if tally.dry_run {
        println!("Dry run: {} documents would be deleted", tally.matched);
        for path in &tally.planned {
            println!("  {path}");
        }
        return Ok(());
    }

    println!(
        "Matched {} markers; deleted {} documents and {} markers",
        tally.matched, tally.documents_deleted, tally.markers_deleted
    );
    for failure in &tally.failures {
        println!("  {} {}", "FAILED".red(), failure);
    }
    Ok(())
}

#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Run ID")]
    run_id: String,
    #[tabled(rename = "Markers")]
    markers: usize,
    #[tabled(rename = "Entity types")]
    entity_types: String,
    #[tabled(rename = "First write")]
    first: String,
    #[tabled(rename = "Last write")]
    last: String,
}

/// Prints the runs recorded in the tracking collection.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_runs(runs: &[RunRecord], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&runs),
        _ if runs.is_empty() => {
            println!("No runs found");
            Ok(())
        }
        OutputFormat::Table => {
            let rows: Vec<_> = runs
                .iter()
                .map(|r| RunRow {
                    run_id: r.run_id.to_string(),
                    markers: r.markers,
                    entity_types: entity_counts(r),
                    first: r.first_written.format("%Y-%m-%d %H:%M:%S").to_string(),
                    last: r.last_written.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();
            println!("{}", Table::new(rows));
            Ok(())
        }
        OutputFormat::Text => {
            for r in runs {
                println!(
                    "  {} {} markers ({}) {}",
                    r.run_id,
                    r.markers,
                    entity_counts(r),
                    r.last_written.format("%Y-%m-%d %H:%M:%S").dimmed()
                );
            }
            Ok(())
        }
    }
}

fn entity_counts(run: &RunRecord) -> String {
    run.entity_types
        .iter()
        .map(|(entity, count)| format!("{entity}: {count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strata_core::RunId;

    #[test]
    fn entity_counts_are_sorted() {
        let now = chrono::Utc::now();
        let run = RunRecord {
            run_id: RunId::generate(),
            markers: 3,
            entity_types: BTreeMap::from([("semester".to_string(), 2), ("department".to_string(), 1)]),
            first_written: now,
            last_written: now,
        };
        assert_eq!(entity_counts(&run), "department: 1, semester: 2");
    }

    #[test]
    fn state_colors_keep_label() {
        assert!(state_colored(PhaseState::Aborted).contains("ABORTED"));
        assert!(state_colored(PhaseState::Complete).contains("COMPLETE"));
    }
}
