//! Custom assertion helpers for integration tests.

use strata_core::DocumentStore;
use strata_migrate::error::RecordError;
use strata_migrate::marker::MigrationMarker;
use strata_migrate::summary::{PhaseState, PhaseSummary, RunSummary};
use strata_migrate::verify::VerificationReport;

use crate::storage::{FaultyStore, StoreOp};

/// Returns the phase summary for `entity_type`.
///
/// # Panics
///
/// Panics if the run has no phase for that entity type.
pub fn phase<'a>(summary: &'a RunSummary, entity_type: &str) -> &'a PhaseSummary {
    summary
        .phase(entity_type)
        .unwrap_or_else(|| panic!("Expected a phase for '{entity_type}', got {:?}", phase_names(summary)))
}

fn phase_names(summary: &RunSummary) -> Vec<&str> {
    summary.phases.iter().map(|p| p.entity_type.as_str()).collect()
}

/// Asserts that every phase completed and wrote `expected` documents in
/// total, with no issues.
///
/// # Panics
///
/// Panics if any phase is not complete, any record has an issue, or the
/// written count differs.
pub fn assert_all_written(summary: &RunSummary, expected: usize) {
    for phase in &summary.phases {
        assert_eq!(
            phase.state,
            PhaseState::Complete,
            "Expected phase '{}' to complete, but state was {}",
            phase.entity_type,
            phase.state
        );
    }
    let issues: Vec<_> = summary.issues().collect();
    assert!(issues.is_empty(), "Expected no issues, got {issues:?}");
    assert_eq!(summary.written(), expected, "unexpected written count");
}

/// Asserts that a run wrote nothing and skipped every record as already
/// migrated.
///
/// # Panics
///
/// Panics if any record was written or reported as an issue.
pub fn assert_fully_skipped(summary: &RunSummary) {
    for phase in &summary.phases {
        assert_eq!(
            phase.written, 0,
            "Expected no writes in '{}', got {}",
            phase.entity_type, phase.written
        );
        assert_eq!(
            phase.skipped_idempotent, phase.total,
            "Expected all {} records of '{}' to be skipped",
            phase.total, phase.entity_type
        );
    }
}

/// Asserts the phase order of a run.
///
/// # Panics
///
/// Panics if the phases ran in a different order.
pub fn assert_phase_order(summary: &RunSummary, expected: &[&str]) {
    assert_eq!(phase_names(summary), expected, "unexpected phase order");
}

/// Asserts that `entity_type` reported exactly `count` issues matching
/// `predicate`.
///
/// # Panics
///
/// Panics if the count differs.
pub fn assert_issues(
    summary: &RunSummary,
    entity_type: &str,
    count: usize,
    predicate: impl Fn(&RecordError) -> bool,
) {
    let matching: Vec<_> = phase(summary, entity_type)
        .issues
        .iter()
        .filter(|issue| predicate(&issue.error))
        .collect();
    assert_eq!(
        matching.len(),
        count,
        "Expected {count} matching issues for '{entity_type}', got {matching:?}"
    );
}

/// Asserts that no commit ever touched a path under `prefix`.
///
/// # Panics
///
/// Panics if an applied or attempted commit included such a path.
pub fn assert_never_committed(store: &FaultyStore, prefix: &str) {
    for op in store.operations() {
        if let StoreOp::Commit { paths, .. } = op {
            assert!(
                paths.iter().all(|p| !p.starts_with(prefix)),
                "Expected no commit under '{prefix}', got {paths:?}"
            );
        }
    }
}

/// Asserts that `path` holds a document and its marker.
///
/// # Panics
///
/// Panics if either is missing.
pub async fn assert_migrated(store: &dyn DocumentStore, tracking: &str, path: &str) {
    assert!(
        store.get(path).await.unwrap().is_some(),
        "Expected document at {path}"
    );
    let marker = MigrationMarker::storage_path(tracking, path);
    assert!(
        store.get(&marker).await.unwrap().is_some(),
        "Expected marker for {path} at {marker}"
    );
}

/// Asserts that a verification report found nothing wrong.
///
/// # Panics
///
/// Panics with the first unclean collection.
pub fn assert_verified(report: &VerificationReport) {
    for collection in &report.collections {
        assert!(
            collection.is_clean(),
            "Expected '{}' to verify cleanly, got {collection:?}",
            collection.entity_type
        );
    }
}
