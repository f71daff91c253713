//! Migration orchestrator.
//!
//! Walks the plan's phases in dependency order. Within a phase every source
//! record is projected, validated, and placed at its destination path; the
//! resulting writes are split into bounded batches executed with bounded
//! concurrency. Phases run strictly one after another.
//!
//! ## Per-Record Flow
//!
//! ```text
//! project ─► required check ─► resolve parent ─► render path ─► hash
//!                                                                 │
//!            ┌────────────────── marker lookup ◄──────────────────┘
//!            │
//!            ├─ same hash ──────► skipped (idempotent)
//!            ├─ different hash ─► conflict (document untouched)
//!            └─ absent ─────────► commit { document, marker (DoesNotExist) }
//! ```
//!
//! A batch whose commit fails after retries is replayed one record at a time
//! so failures are attributed to individual records. A phase whose failed
//! count exceeds `abort_fraction` of its records stops launching batches and
//! the run ends with [`Error::PhaseAborted`]. Cancellation through an
//! [`AbortHandle`] behaves the same and ends with [`Error::Cancelled`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::Instrument;

use strata_core::observability::{migration_span, phase_span};
use strata_core::{CommitResult, Document, DocumentStore, RunId, WriteBatch, WritePrecondition};

use crate::error::{Error, RecordError, Result};
use crate::mapping::{EntityDescriptor, MigrationPlan, ParentLink};
use crate::marker::{MigrationMarker, list_markers};
use crate::metrics::{record_outcome, record_phase_duration};
use crate::options::RunOptions;
use crate::projection::{check_required, content_hash};
use crate::source::{SourceDataset, identifier};
use crate::summary::{PhaseState, PhaseSummary, RunSummary};
use crate::template::ID_PLACEHOLDER;

/// Cooperative cancellation for a running migration.
///
/// Cloning shares the flag. Once aborted, no new batch starts; batches in
/// flight complete.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Creates a handle that has not been triggered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// A record ready to be written.
#[derive(Debug, Clone)]
struct PreparedRecord {
    source_id: String,
    path: String,
    document: Document,
    hash: String,
}

/// A record rejected before any store access.
struct Rejected {
    source_id: String,
    path: Option<String>,
    error: RecordError,
}

enum Outcome {
    Written,
    Skipped,
    Issue(RecordError),
}

struct Processed {
    source_id: String,
    path: String,
    outcome: Outcome,
}

enum Stop {
    Threshold,
    Cancelled,
}

/// Ancestor placeholder values of each migrated parent, keyed by the
/// parent's source id. More than one entry means the id is ambiguous.
type ParentIndex = HashMap<String, Vec<BTreeMap<String, String>>>;

/// Runs migrations of a source data set into a document store.
pub struct Migrator {
    store: Arc<dyn DocumentStore>,
    plan: MigrationPlan,
    options: RunOptions,
    abort: AbortHandle,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("plan", &self.plan)
            .field("options", &self.options)
            .field("abort", &self.abort)
            .finish_non_exhaustive()
    }
}

impl Migrator {
    /// Creates a migrator.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the options are out of range.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        plan: MigrationPlan,
        options: RunOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            store,
            plan,
            options,
            abort: AbortHandle::new(),
        })
    }

    /// Replaces the abort handle.
    #[must_use]
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Returns a handle that cancels this migrator's runs.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Returns the plan being executed.
    #[must_use]
    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    /// Migrates the data set under a new run id.
    ///
    /// # Errors
    ///
    /// See [`Migrator::run_with_id`].
    pub async fn run(&self, source: &SourceDataset) -> Result<RunSummary> {
        self.run_with_id(RunId::generate(), source).await
    }

    /// Migrates the data set under the given run id.
    ///
    /// Reusing the id of an interrupted run resumes it: records already
    /// carrying a marker are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::PhaseAborted` if a phase exceeds its failure threshold,
    /// `Error::Cancelled` if the abort handle fires, and `Error::Store` if the
    /// tracking collection cannot be read. Record-level failures are reported
    /// in the summary and never returned as errors.
    pub async fn run_with_id(&self, run_id: RunId, source: &SourceDataset) -> Result<RunSummary> {
        let span = migration_span("migrate", &run_id.to_string());
        self.execute(run_id, source).instrument(span).await
    }

    async fn execute(&self, run_id: RunId, source: &SourceDataset) -> Result<RunSummary> {
        let mut summary = RunSummary::new(run_id);
        tracing::info!(phases = self.plan.phases().len(), "migration started");

        for entity in self.plan.phases() {
            if self.abort.is_aborted() {
                return Err(cancelled(summary, &entity.name));
            }

            let records = source.records(&entity.name);
            let span = phase_span(&entity.name, entity.phase_index);
            let (phase, stop) = self
                .run_phase(run_id, entity, records)
                .instrument(span)
                .await?;
            let failed = phase.failed;
            summary.phases.push(phase);

            match stop {
                None => {}
                Some(Stop::Threshold) => {
                    summary.finish();
                    tracing::error!(
                        entity_type = %entity.name,
                        failed,
                        total = records.len(),
                        threshold = self.options.abort_fraction,
                        "phase aborted, failure threshold exceeded"
                    );
                    return Err(Error::PhaseAborted {
                        entity_type: entity.name.clone(),
                        failed,
                        total: records.len(),
                        threshold: self.options.abort_fraction,
                        summary: Box::new(summary),
                    });
                }
                Some(Stop::Cancelled) => return Err(cancelled(summary, &entity.name)),
            }
        }

        summary.finish();
        tracing::info!(
            written = summary.written(),
            skipped = summary.skipped_idempotent(),
            issues = summary.issues().count(),
            "migration finished"
        );
        Ok(summary)
    }

    #[allow(clippy::cast_precision_loss)]
    fn threshold_exceeded(&self, failed: usize, total: usize) -> bool {
        failed as f64 > self.options.abort_fraction * total as f64
    }

    async fn run_phase(
        &self,
        run_id: RunId,
        entity: &EntityDescriptor,
        records: &[Document],
    ) -> Result<(PhaseSummary, Option<Stop>)> {
        let started = Instant::now();
        let mut phase = PhaseSummary::new(&entity.name, records.len());
        tracing::info!(records = records.len(), "phase started");

        let parents = match &entity.parent {
            Some(link) => Some(self.parent_index(link).await?),
            None => None,
        };

        let mut prepared = Vec::with_capacity(records.len());
        let mut seen = HashSet::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            match prepare(entity, position, record, parents.as_ref()) {
                Ok(rec) if !seen.insert(rec.path.clone()) => {
                    let error = RecordError::validation(format!(
                        "duplicate identifier: '{}' already targets {}",
                        rec.source_id, rec.path
                    ));
                    warn_issue(&rec.source_id, Some(rec.path.as_str()), &error);
                    phase.record_issue(rec.source_id, Some(rec.path), error);
                }
                Ok(rec) => prepared.push(rec),
                Err(rejected) => {
                    warn_issue(&rejected.source_id, rejected.path.as_deref(), &rejected.error);
                    phase.record_issue(rejected.source_id, rejected.path, rejected.error);
                }
            }
        }

        let mut pending = prepared.chunks(self.options.batch_size);
        let mut in_flight = FuturesUnordered::new();
        let mut stop = None;

        loop {
            while stop.is_none() && in_flight.len() < self.options.max_concurrency {
                if self.abort.is_aborted() {
                    stop = Some(Stop::Cancelled);
                    break;
                }
                match pending.next() {
                    Some(chunk) => in_flight.push(self.process_batch(run_id, entity, chunk)),
                    None => break,
                }
            }

            let Some(results) = in_flight.next().await else {
                break;
            };
            for processed in results {
                match processed.outcome {
                    Outcome::Written => phase.record_written(),
                    Outcome::Skipped => phase.record_skipped(),
                    Outcome::Issue(error) => {
                        warn_issue(&processed.source_id, Some(processed.path.as_str()), &error);
                        phase.record_issue(processed.source_id, Some(processed.path), error);
                    }
                }
            }

            if stop.is_none() && self.threshold_exceeded(phase.failed, records.len()) {
                stop = Some(Stop::Threshold);
            }
        }

        if let Some(stop) = &stop {
            let reason = match stop {
                Stop::Threshold => "phase aborted after exceeding the failure threshold",
                Stop::Cancelled => "run cancelled",
            };
            for rec in pending.flatten() {
                phase.record_issue(
                    rec.source_id.clone(),
                    Some(rec.path.clone()),
                    RecordError::NotAttempted {
                        reason: reason.to_string(),
                    },
                );
            }
            phase.finish(PhaseState::Aborted);
        } else {
            phase.finish(PhaseState::Complete);
        }

        record_phase_metrics(&phase, started.elapsed().as_secs_f64());
        tracing::info!(
            state = %phase.state,
            written = phase.written,
            skipped = phase.skipped_idempotent,
            invalid = phase.skipped_validation,
            conflicts = phase.conflicts,
            failed = phase.failed,
            not_attempted = phase.not_attempted,
            "phase finished"
        );
        Ok((phase, stop))
    }

    /// Indexes the parent entity's markers by source id.
    async fn parent_index(&self, link: &ParentLink) -> Result<ParentIndex> {
        let mut index = ParentIndex::new();
        let Some(parent) = self.plan.entity(&link.entity) else {
            return Ok(index);
        };

        for stored in list_markers(self.store.as_ref(), self.plan.tracking_collection()).await? {
            let marker = stored.marker;
            if marker.entity_type != parent.name {
                continue;
            }
            let Some(mut values) = parent.template.capture(&marker.destination_path) else {
                tracing::warn!(
                    path = %marker.destination_path,
                    "parent marker does not match the current path template"
                );
                continue;
            };
            let id = values.remove(ID_PLACEHOLDER).unwrap_or_else(|| marker.source_id.clone());
            values.insert(parent.name.clone(), id);
            index.entry(marker.source_id).or_default().push(values);
        }

        tracing::debug!(parent = %parent.name, entries = index.len(), "parent index built");
        Ok(index)
    }

    async fn process_batch(
        &self,
        run_id: RunId,
        entity: &EntityDescriptor,
        chunk: &[PreparedRecord],
    ) -> Vec<Processed> {
        let mut results = Vec::with_capacity(chunk.len());
        let mut to_write: Vec<(&PreparedRecord, Document)> = Vec::new();

        for rec in chunk {
            match self.classify_existing(rec).await {
                Ok(Some(outcome)) => results.push(processed(rec, outcome)),
                Ok(None) => match marker_document(run_id, entity, rec) {
                    Ok(marker) => to_write.push((rec, marker)),
                    Err(error) => results.push(processed(rec, Outcome::Issue(error))),
                },
                Err(error) => results.push(processed(rec, Outcome::Issue(error))),
            }
        }

        if to_write.is_empty() {
            return results;
        }

        let mut batch = WriteBatch::new();
        for (rec, marker) in &to_write {
            push_pair(&mut batch, self.plan.tracking_collection(), rec, marker.clone());
        }

        let commit = self
            .options
            .retry
            .run("commit_batch", || self.store.commit(batch.clone()))
            .await;

        match commit {
            Ok(CommitResult::Committed) => {
                tracing::debug!(records = to_write.len(), "batch committed");
                results.extend(to_write.iter().map(|(rec, _)| processed(rec, Outcome::Written)));
            }
            Ok(CommitResult::PreconditionFailed { path }) => {
                tracing::debug!(%path, "batch precondition failed, committing records individually");
                for (rec, marker) in to_write {
                    let outcome = self.commit_single(rec, marker).await;
                    results.push(processed(rec, outcome));
                }
            }
            Err(exhausted) if to_write.len() == 1 => {
                let (rec, _) = &to_write[0];
                results.push(processed(
                    rec,
                    Outcome::Issue(RecordError::WriteFailed {
                        attempts: exhausted.attempts,
                        reason: exhausted.error.to_string(),
                    }),
                ));
            }
            Err(exhausted) => {
                tracing::warn!(
                    records = to_write.len(),
                    attempts = exhausted.attempts,
                    error = %exhausted.error,
                    "batch commit failed, committing records individually"
                );
                for (rec, marker) in to_write {
                    let outcome = self.commit_single(rec, marker).await;
                    results.push(processed(rec, outcome));
                }
            }
        }

        results
    }

    /// Returns the outcome decided by an existing marker, or `None` if the
    /// record still needs writing.
    async fn classify_existing(
        &self,
        rec: &PreparedRecord,
    ) -> std::result::Result<Option<Outcome>, RecordError> {
        let marker_path = MigrationMarker::storage_path(self.plan.tracking_collection(), &rec.path);
        let doc = self
            .options
            .retry
            .run("read_marker", || self.store.get(&marker_path))
            .await
            .map_err(|exhausted| RecordError::WriteFailed {
                attempts: exhausted.attempts,
                reason: format!("marker lookup failed: {}", exhausted.error),
            })?;

        let Some(doc) = doc else {
            return Ok(None);
        };
        let marker = MigrationMarker::from_document(doc).map_err(|e| RecordError::WriteFailed {
            attempts: 1,
            reason: e.to_string(),
        })?;

        if marker.content_hash == rec.hash {
            Ok(Some(Outcome::Skipped))
        } else {
            Ok(Some(Outcome::Issue(RecordError::Conflict {
                stored_hash: marker.content_hash,
                computed_hash: rec.hash.clone(),
                stored_run_id: marker.run_id.to_string(),
            })))
        }
    }

    async fn commit_single(&self, rec: &PreparedRecord, marker: Document) -> Outcome {
        let mut batch = WriteBatch::new();
        push_pair(&mut batch, self.plan.tracking_collection(), rec, marker);

        match self
            .options
            .retry
            .run("commit_record", || self.store.commit(batch.clone()))
            .await
        {
            Ok(CommitResult::Committed) => Outcome::Written,
            Ok(CommitResult::PreconditionFailed { .. }) => match self.classify_existing(rec).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => Outcome::Issue(RecordError::WriteFailed {
                    attempts: 1,
                    reason: "marker precondition failed but no marker was found".into(),
                }),
                Err(error) => Outcome::Issue(error),
            },
            Err(exhausted) => Outcome::Issue(RecordError::WriteFailed {
                attempts: exhausted.attempts,
                reason: exhausted.error.to_string(),
            }),
        }
    }
}

fn marker_document(
    run_id: RunId,
    entity: &EntityDescriptor,
    rec: &PreparedRecord,
) -> std::result::Result<Document, RecordError> {
    MigrationMarker::new(&rec.path, run_id, &rec.source_id, &rec.hash, &entity.name)
        .to_document()
        .map_err(|e| RecordError::WriteFailed {
            attempts: 0,
            reason: e.to_string(),
        })
}

fn cancelled(mut summary: RunSummary, entity_type: &str) -> Error {
    summary.finish();
    tracing::warn!(entity_type, "migration cancelled");
    Error::Cancelled {
        run_id: summary.run_id,
        entity_type: entity_type.to_string(),
        summary: Box::new(summary),
    }
}

fn prepare(
    entity: &EntityDescriptor,
    position: usize,
    record: &Document,
    parents: Option<&ParentIndex>,
) -> std::result::Result<PreparedRecord, Rejected> {
    let source_id = identifier(record, &entity.id_field).map_err(|error| Rejected {
        source_id: format!("#{position}"),
        path: None,
        error,
    })?;
    let reject = |error: RecordError| Rejected {
        source_id: source_id.clone(),
        path: None,
        error,
    };

    let document = entity.projection.apply(record);
    check_required(&document, &entity.required).map_err(reject)?;

    let mut values = BTreeMap::new();
    if let (Some(link), Some(parents)) = (&entity.parent, parents) {
        let parent_id = identifier(&document, &link.field).map_err(|e| {
            reject(RecordError::validation(format!("invalid parent reference: {e}")))
        })?;
        match parents.get(&parent_id).map(Vec::as_slice) {
            Some([ancestors]) => values.clone_from(ancestors),
            Some([]) | None => {
                return Err(reject(RecordError::validation(format!(
                    "parent {} '{parent_id}' not migrated",
                    link.entity
                ))));
            }
            Some(_) => {
                return Err(reject(RecordError::validation(format!(
                    "parent {} '{parent_id}' is ambiguous",
                    link.entity
                ))));
            }
        }
    }
    values.insert(ID_PLACEHOLDER.to_string(), source_id.clone());

    let path = entity
        .template
        .render(&values)
        .map_err(|e| reject(RecordError::validation(format!("cannot build path: {e}"))))?;
    let hash = content_hash(&document).map_err(|e| Rejected {
        source_id: source_id.clone(),
        path: Some(path.clone()),
        error: RecordError::validation(format!("cannot hash document: {e}")),
    })?;

    Ok(PreparedRecord {
        source_id,
        path,
        document,
        hash,
    })
}

fn push_pair(batch: &mut WriteBatch, tracking_collection: &str, rec: &PreparedRecord, marker: Document) {
    batch.push(&rec.path, rec.document.clone(), WritePrecondition::None);
    batch.push(
        MigrationMarker::storage_path(tracking_collection, &rec.path),
        marker,
        WritePrecondition::DoesNotExist,
    );
}

fn processed(rec: &PreparedRecord, outcome: Outcome) -> Processed {
    Processed {
        source_id: rec.source_id.clone(),
        path: rec.path.clone(),
        outcome,
    }
}

fn warn_issue(source_id: &str, path: Option<&str>, error: &RecordError) {
    tracing::warn!(source_id, path = path.unwrap_or("-"), error = %error, "record not written");
}

fn record_phase_metrics(phase: &PhaseSummary, duration_secs: f64) {
    let name = phase.entity_type.as_str();
    for (outcome, count) in [
        ("written", phase.written),
        ("skipped_idempotent", phase.skipped_idempotent),
        ("skipped_validation", phase.skipped_validation),
        ("conflict", phase.conflicts),
        ("failed", phase.failed),
        ("not_attempted", phase.not_attempted),
    ] {
        record_outcome(name, outcome, u64::try_from(count).unwrap_or(u64::MAX));
    }
    record_phase_duration(name, &phase.state.to_string(), duration_secs);
}
