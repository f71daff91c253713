//! Migration metrics.
//!
//! Counters complementing the structured logs: record outcomes per entity
//! type, write retries, phase durations, and rollback deletions. Recorded
//! through the `metrics` facade; nothing is exported unless the host installs
//! a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};

// ============================================================================
// Migration Metrics
// ============================================================================

/// Records processed, labelled by entity type and outcome.
pub const RECORDS_PROCESSED: &str = "strata_records_processed_total";

/// Write retry attempts.
pub const WRITE_RETRIES: &str = "strata_write_retries_total";

/// Phase duration histogram.
pub const PHASE_DURATION: &str = "strata_phase_duration_seconds";

// ============================================================================
// Rollback Metrics
// ============================================================================

/// Documents and markers deleted by rollback.
pub const ROLLBACK_DELETIONS: &str = "strata_rollback_deletions_total";

/// Rollback deletions that failed.
pub const ROLLBACK_FAILURES: &str = "strata_rollback_failures_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all migration metric descriptions.
///
/// Call this once at application startup after installing a metrics recorder.
pub fn register_metrics() {
    describe_counter!(RECORDS_PROCESSED, "Records processed by outcome");
    describe_counter!(WRITE_RETRIES, "Store operation retry attempts");
    describe_histogram!(PHASE_DURATION, "Duration of migration phases in seconds");
    describe_counter!(ROLLBACK_DELETIONS, "Documents and markers deleted by rollback");
    describe_counter!(ROLLBACK_FAILURES, "Rollback deletions that failed");
}

// ============================================================================
// Recording
// ============================================================================

/// Records one or more records reaching an outcome.
pub fn record_outcome(entity_type: &str, outcome: &'static str, count: u64) {
    if count == 0 {
        return;
    }
    let labels = [
        ("entity_type", entity_type.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(RECORDS_PROCESSED, &labels).increment(count);
}

/// Records a retry of a store operation.
pub fn record_retry(operation: &'static str) {
    counter!(WRITE_RETRIES, "operation" => operation).increment(1);
}

/// Records a completed phase.
pub fn record_phase_duration(entity_type: &str, state: &str, duration_secs: f64) {
    let labels = [
        ("entity_type", entity_type.to_string()),
        ("state", state.to_string()),
    ];
    histogram!(PHASE_DURATION, &labels).record(duration_secs);
}

/// Records a rollback deletion.
pub fn record_rollback_deletion(kind: &'static str) {
    counter!(ROLLBACK_DELETIONS, "kind" => kind).increment(1);
}

/// Records a failed rollback deletion.
pub fn record_rollback_failure() {
    counter!(ROLLBACK_FAILURES).increment(1);
}
