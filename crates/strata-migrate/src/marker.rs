//! Durable migration markers for exactly-once document writes.
//!
//! A marker is the only record of "already migrated". One marker exists per
//! destination document, written in the same atomic batch as the document.
//!
//! ## Protocol
//!
//! 1. Project the source record and compute its content hash
//! 2. Read the marker for the destination path:
//!    - Exists with same `contentHash`: skip (idempotent replay)
//!    - Exists with different `contentHash`: conflict, the document is untouched
//!    - Absent: commit document + marker with a `DoesNotExist` precondition on
//!      the marker
//!
//! ## Storage Layout
//!
//! ```text
//! {tracking_collection}/{SHA256(destination_path)}
//! ```
//!
//! Markers are only ever created, read, or (by rollback) deleted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use strata_core::{Document, DocumentStore, RunId};

use crate::error::{Error, Result};

/// Proof that a destination document was written by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationMarker {
    /// Destination document path.
    pub destination_path: String,
    /// Run that wrote the document.
    pub run_id: RunId,
    /// Source record identifier.
    pub source_id: String,
    /// Content hash of the projected document.
    pub content_hash: String,
    /// When the marker was created.
    pub timestamp: DateTime<Utc>,
    /// Entity type of the migrated record.
    pub entity_type: String,
}

impl MigrationMarker {
    /// Creates a marker timestamped now.
    #[must_use]
    pub fn new(
        destination_path: impl Into<String>,
        run_id: RunId,
        source_id: impl Into<String>,
        content_hash: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            destination_path: destination_path.into(),
            run_id,
            source_id: source_id.into(),
            content_hash: content_hash.into(),
            timestamp: Utc::now(),
            entity_type: entity_type.into(),
        }
    }

    /// Computes the SHA256 hash of a destination path.
    #[must_use]
    pub fn hash_path(destination_path: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(destination_path.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the marker path for a destination path.
    ///
    /// Path: `{tracking_collection}/{SHA256(destination_path)}`
    #[must_use]
    pub fn storage_path(tracking_collection: &str, destination_path: &str) -> String {
        format!(
            "{tracking_collection}/{}",
            Self::hash_path(destination_path)
        )
    }

    /// Returns the path for this marker.
    #[must_use]
    pub fn path(&self, tracking_collection: &str) -> String {
        Self::storage_path(tracking_collection, &self.destination_path)
    }

    /// Converts the marker to a store document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the marker cannot be encoded.
    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self) {
            Ok(Value::Object(doc)) => Ok(doc),
            Ok(_) => Err(Error::Serialization {
                message: "marker did not encode as an object".into(),
            }),
            Err(e) => Err(Error::Serialization {
                message: format!("failed to encode marker: {e}"),
            }),
        }
    }

    /// Parses a marker from a store document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the document is not a marker.
    pub fn from_document(doc: Document) -> Result<Self> {
        serde_json::from_value(Value::Object(doc)).map_err(|e| Error::Serialization {
            message: format!("invalid marker: {e}"),
        })
    }
}

/// A marker together with the path it is stored at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMarker {
    /// Marker document path.
    pub path: String,
    /// Marker content.
    pub marker: MigrationMarker,
}

/// Reads the marker for a destination path.
///
/// # Errors
///
/// Returns a store error if the read fails, or `Error::Serialization` if the
/// stored document is not a marker.
pub async fn read_marker(
    store: &dyn DocumentStore,
    tracking_collection: &str,
    destination_path: &str,
) -> Result<Option<MigrationMarker>> {
    let path = MigrationMarker::storage_path(tracking_collection, destination_path);
    match store.get(&path).await? {
        Some(doc) => Ok(Some(MigrationMarker::from_document(doc)?)),
        None => Ok(None),
    }
}

/// Lists every marker in the tracking collection, ordered by marker path.
///
/// Documents that do not parse as markers are skipped with a warning.
///
/// # Errors
///
/// Returns a store error if listing or reading fails.
pub async fn list_markers(
    store: &dyn DocumentStore,
    tracking_collection: &str,
) -> Result<Vec<StoredMarker>> {
    let prefix = format!("{tracking_collection}/");
    let mut markers = Vec::new();
    for path in store.list(&prefix).await? {
        let Some(doc) = store.get(&path).await? else {
            continue;
        };
        match MigrationMarker::from_document(doc) {
            Ok(marker) => markers.push(StoredMarker { path, marker }),
            Err(e) => tracing::warn!(path = %path, error = %e, "skipping unreadable marker"),
        }
    }
    Ok(markers)
}

/// Markers recorded by one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// The run.
    pub run_id: RunId,
    /// Markers written by the run.
    pub markers: usize,
    /// Marker count per entity type.
    pub entity_types: BTreeMap<String, usize>,
    /// Earliest marker timestamp.
    pub first_written: DateTime<Utc>,
    /// Latest marker timestamp.
    pub last_written: DateTime<Utc>,
}

/// Lists the runs recorded in the tracking collection, oldest first.
///
/// # Errors
///
/// Returns a store error if the markers cannot be listed.
pub async fn list_runs(
    store: &dyn DocumentStore,
    tracking_collection: &str,
) -> Result<Vec<RunRecord>> {
    let mut runs: BTreeMap<RunId, RunRecord> = BTreeMap::new();
    for StoredMarker { marker, .. } in list_markers(store, tracking_collection).await? {
        let record = runs.entry(marker.run_id).or_insert_with(|| RunRecord {
            run_id: marker.run_id,
            markers: 0,
            entity_types: BTreeMap::new(),
            first_written: marker.timestamp,
            last_written: marker.timestamp,
        });
        record.markers += 1;
        *record.entity_types.entry(marker.entity_type).or_insert(0) += 1;
        record.first_written = record.first_written.min(marker.timestamp);
        record.last_written = record.last_written.max(marker.timestamp);
    }
    Ok(runs.into_values().collect())
}
