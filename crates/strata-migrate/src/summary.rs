//! Run summaries and the per-phase state machine.
//!
//! Every migration run produces a [`RunSummary`], including runs that end in
//! [`Error::PhaseAborted`](crate::Error::PhaseAborted) or
//! [`Error::Cancelled`](crate::Error::Cancelled). Each phase reports counts by
//! outcome plus one [`RecordIssue`] per record that was not written or skipped
//! idempotently.
//!
//! ## Phase State Machine
//!
//! ```text
//! Running ──► Degraded ──► Complete
//!    │            │
//!    │            └──────► Aborted
//!    ├──────────────────► Complete
//!    └──────────────────► Aborted
//! ```
//!
//! A phase enters `Degraded` on its first failed record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use strata_core::RunId;

use crate::error::RecordError;

/// Lifecycle state of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    /// Records are being processed.
    #[default]
    Running,
    /// Processing continues with at least one failed record.
    Degraded,
    /// Every record was processed.
    Complete,
    /// Processing stopped early (threshold exceeded or cancelled).
    Aborted,
}

impl PhaseState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Running => matches!(target, Self::Degraded | Self::Complete | Self::Aborted),
            Self::Degraded => matches!(target, Self::Complete | Self::Aborted),
            Self::Complete | Self::Aborted => false,
        }
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// One record that was not written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordIssue {
    /// Entity type of the record.
    pub entity_type: String,
    /// Source identifier, or a positional label when the id is unreadable.
    pub source_id: String,
    /// Destination path, when it could be computed.
    pub destination_path: Option<String>,
    /// What happened.
    pub error: RecordError,
}

/// Outcome counts and issues for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    /// Entity type processed by this phase.
    pub entity_type: String,
    /// Final (or current) phase state.
    pub state: PhaseState,
    /// Source records in the phase.
    pub total: usize,
    /// Documents written together with their markers.
    pub written: usize,
    /// Records skipped because a marker with a matching hash exists.
    pub skipped_idempotent: usize,
    /// Records rejected by validation.
    pub skipped_validation: usize,
    /// Records whose marker hash differs from the computed hash.
    pub conflicts: usize,
    /// Records whose write failed.
    pub failed: usize,
    /// Records never attempted because the phase stopped early.
    pub not_attempted: usize,
    /// Every record that was not written or skipped idempotently.
    pub issues: Vec<RecordIssue>,
}

impl PhaseSummary {
    /// Creates a running phase summary.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, total: usize) -> Self {
        Self {
            entity_type: entity_type.into(),
            state: PhaseState::Running,
            total,
            written: 0,
            skipped_idempotent: 0,
            skipped_validation: 0,
            conflicts: 0,
            failed: 0,
            not_attempted: 0,
            issues: Vec::new(),
        }
    }

    /// Counts a written record.
    pub fn record_written(&mut self) {
        self.written += 1;
    }

    /// Counts an idempotent skip.
    pub fn record_skipped(&mut self) {
        self.skipped_idempotent += 1;
    }

    /// Counts a record issue and keeps it for the report.
    ///
    /// The first failed record moves a running phase to `Degraded`.
    pub fn record_issue(
        &mut self,
        source_id: impl Into<String>,
        destination_path: Option<String>,
        error: RecordError,
    ) {
        match &error {
            RecordError::Validation { .. } => self.skipped_validation += 1,
            RecordError::Conflict { .. } => self.conflicts += 1,
            RecordError::WriteFailed { .. } => {
                self.failed += 1;
                if self.state == PhaseState::Running {
                    self.state = PhaseState::Degraded;
                }
            }
            RecordError::NotAttempted { .. } => self.not_attempted += 1,
        }
        self.issues.push(RecordIssue {
            entity_type: self.entity_type.clone(),
            source_id: source_id.into(),
            destination_path,
            error,
        });
    }

    /// Moves the phase to a terminal state.
    ///
    /// Invalid transitions (e.g. out of a terminal state) are ignored.
    pub fn finish(&mut self, target: PhaseState) {
        if self.state.can_transition_to(target) && target.is_terminal() {
            self.state = target;
        }
    }

    /// Returns the number of records accounted for so far.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.written
            + self.skipped_idempotent
            + self.skipped_validation
            + self.conflicts
            + self.failed
            + self.not_attempted
    }
}

/// Summary of one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Run identifier recorded in every marker written by the run.
    pub run_id: RunId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished (set on success, abort, and cancellation).
    pub finished_at: Option<DateTime<Utc>>,
    /// One entry per phase started, in execution order.
    pub phases: Vec<PhaseSummary>,
}

impl RunSummary {
    /// Creates an empty summary for a run starting now.
    #[must_use]
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            phases: Vec::new(),
        }
    }

    /// Returns the phase summary for an entity type.
    #[must_use]
    pub fn phase(&self, entity_type: &str) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.entity_type == entity_type)
    }

    /// Total documents written across phases.
    #[must_use]
    pub fn written(&self) -> usize {
        self.phases.iter().map(|p| p.written).sum()
    }

    /// Total idempotent skips across phases.
    #[must_use]
    pub fn skipped_idempotent(&self) -> usize {
        self.phases.iter().map(|p| p.skipped_idempotent).sum()
    }

    /// Iterates over every issue in phase order.
    pub fn issues(&self) -> impl Iterator<Item = &RecordIssue> {
        self.phases.iter().flat_map(|p| p.issues.iter())
    }

    /// Returns true if every phase completed without issues.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.phases
            .iter()
            .all(|p| p.state == PhaseState::Complete && p.issues.is_empty())
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> RecordError {
        RecordError::WriteFailed {
            attempts: 5,
            reason: "unavailable".into(),
        }
    }

    #[test]
    fn phase_state_transitions() {
        assert!(PhaseState::Running.can_transition_to(PhaseState::Degraded));
        assert!(PhaseState::Running.can_transition_to(PhaseState::Complete));
        assert!(PhaseState::Degraded.can_transition_to(PhaseState::Aborted));
        assert!(!PhaseState::Degraded.can_transition_to(PhaseState::Running));
        assert!(!PhaseState::Complete.can_transition_to(PhaseState::Aborted));
        assert!(PhaseState::Aborted.is_terminal());
    }

    #[test]
    fn first_failure_degrades_phase() {
        let mut phase = PhaseSummary::new("term", 3);
        phase.record_written();
        assert_eq!(phase.state, PhaseState::Running);

        phase.record_issue("T2", Some("terms/T2".into()), failed());
        assert_eq!(phase.state, PhaseState::Degraded);
        phase.record_issue("T3", None, failed());
        assert_eq!(phase.failed, 2);

        phase.finish(PhaseState::Complete);
        assert_eq!(phase.state, PhaseState::Complete);
        assert_eq!(phase.processed(), 3);
    }

    #[test]
    fn issues_are_counted_by_kind() {
        let mut phase = PhaseSummary::new("department", 4);
        phase.record_issue("a", None, RecordError::validation("missing 'name'"));
        phase.record_issue(
            "b",
            Some("departments/b".into()),
            RecordError::Conflict {
                stored_hash: "aa".into(),
                computed_hash: "bb".into(),
                stored_run_id: "r".into(),
            },
        );
        phase.record_issue(
            "c",
            None,
            RecordError::NotAttempted {
                reason: "cancelled".into(),
            },
        );
        assert_eq!(phase.skipped_validation, 1);
        assert_eq!(phase.conflicts, 1);
        assert_eq!(phase.not_attempted, 1);
        assert_eq!(phase.state, PhaseState::Running);
        assert_eq!(phase.issues[1].entity_type, "department");
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut phase = PhaseSummary::new("unit", 0);
        phase.finish(PhaseState::Aborted);
        phase.finish(PhaseState::Complete);
        assert_eq!(phase.state, PhaseState::Aborted);
    }

    #[test]
    fn run_summary_serializes_camel_case() {
        let mut summary = RunSummary::new(RunId::generate());
        let mut phase = PhaseSummary::new("department", 1);
        phase.record_skipped();
        phase.finish(PhaseState::Complete);
        summary.phases.push(phase);
        summary.finish();

        assert!(summary.is_clean());
        assert_eq!(summary.skipped_idempotent(), 1);

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["phases"][0]["skippedIdempotent"], 1);
        assert_eq!(value["phases"][0]["state"], "complete");
        assert!(value["finishedAt"].is_string());
    }
}
