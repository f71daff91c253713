//! Document store abstraction for path-addressed hierarchical stores.
//!
//! This module defines the store contract the migration engine writes through.
//! The contract mirrors what hierarchical document databases offer:
//! - Path-addressed document reads
//! - Batched writes that commit all-or-nothing
//! - Per-write preconditions (create-only vs. unconditional set)
//! - Prefix-scoped listing and counting
//!
//! ## Paths
//!
//! A document path is a `/`-separated list of non-empty segments, e.g.
//! `accounts/u1/departments/CS`. Leading or trailing slashes, empty segments,
//! and `.`/`..` segments are rejected with [`Error::InvalidPath`].
//!
//! ## Atomicity
//!
//! [`DocumentStore::commit`] is the only multi-document operation. Either every
//! write in the batch becomes visible or none does; a failed precondition on any
//! write rejects the whole batch.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// A stored document: a JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Precondition for a single write within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if the document does not exist.
    DoesNotExist,
    /// Write unconditionally, replacing any existing document.
    None,
}

/// One document write within a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    /// Destination document path.
    pub path: String,
    /// Full document content (replaces any existing content).
    pub document: Document,
    /// Precondition checked before the batch is applied.
    pub precondition: WritePrecondition,
}

/// An ordered set of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unconditional write.
    #[must_use]
    pub fn set(mut self, path: impl Into<String>, document: Document) -> Self {
        self.push(path, document, WritePrecondition::None);
        self
    }

    /// Adds a create-only write; the batch fails if the document exists.
    #[must_use]
    pub fn create(mut self, path: impl Into<String>, document: Document) -> Self {
        self.push(path, document, WritePrecondition::DoesNotExist);
        self
    }

    /// Appends a write with an explicit precondition.
    pub fn push(
        &mut self,
        path: impl Into<String>,
        document: Document,
        precondition: WritePrecondition,
    ) {
        self.ops.push(WriteOp {
            path: path.into(),
            document,
            precondition,
        });
    }

    /// Returns the writes in insertion order.
    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Returns the number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch contains no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Extends this batch with the writes of another.
    pub fn extend(&mut self, other: Self) {
        self.ops.extend(other.ops);
    }

    /// Validates every path and rejects duplicate paths within the batch.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPath` for a malformed path and
    /// `Error::InvalidInput` if a path appears twice.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(self.ops.len());
        for op in &self.ops {
            validate_path(&op.path)?;
            if !seen.insert(op.path.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "batch writes '{}' more than once",
                    op.path
                )));
            }
        }
        Ok(())
    }
}

/// Result of an atomic batch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// Every write in the batch was applied.
    Committed,
    /// A precondition failed; nothing was applied.
    PreconditionFailed {
        /// The first path whose precondition failed.
        path: String,
    },
}

/// Path-addressed document store.
///
/// All destination stores (the in-memory test store, the JSON file store, a
/// cloud client adapter) implement this trait.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Reads a document.
    ///
    /// Returns `None` if the document doesn't exist.
    async fn get(&self, path: &str) -> Result<Option<Document>>;

    /// Commits a batch of writes atomically.
    ///
    /// Returns `CommitResult::PreconditionFailed` if any precondition is not
    /// met. Never returns an error for a precondition failure - that's a
    /// normal result.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult>;

    /// Deletes a document.
    ///
    /// Succeeds even if the document doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists document paths starting with `prefix`, sorted lexicographically.
    ///
    /// An empty prefix lists every document.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Counts documents whose path starts with `prefix`.
    async fn count(&self, prefix: &str) -> Result<usize> {
        Ok(self.list(prefix).await?.len())
    }
}

/// Validates a document path.
///
/// # Errors
///
/// Returns `Error::InvalidPath` if the path is empty, has a leading or
/// trailing slash, or contains an empty, `.` or `..` segment.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::invalid_path(path, "path is empty"));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(Error::invalid_path(path, "leading or trailing slash"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(Error::invalid_path(path, "empty segment")),
            "." | ".." => return Err(Error::invalid_path(path, "relative segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Applies a validated batch to a map of documents.
///
/// Shared by the bundled stores so both enforce identical precondition
/// semantics. The map is untouched when a precondition fails.
pub(crate) fn apply_batch(
    documents: &mut BTreeMap<String, Document>,
    batch: WriteBatch,
) -> Result<CommitResult> {
    batch.validate()?;

    for op in batch.ops() {
        if op.precondition == WritePrecondition::DoesNotExist && documents.contains_key(&op.path) {
            return Ok(CommitResult::PreconditionFailed {
                path: op.path.clone(),
            });
        }
    }

    for op in batch.ops {
        documents.insert(op.path, op.document);
    }
    Ok(CommitResult::Committed)
}

pub(crate) fn list_prefix(documents: &BTreeMap<String, Document>, prefix: &str) -> Vec<String> {
    documents
        .range(prefix.to_string()..)
        .take_while(|(path, _)| path.starts_with(prefix))
        .map(|(path, _)| path.clone())
        .collect()
}

/// In-memory document store for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    documents: Arc<RwLock<BTreeMap<String, Document>>>,
}

impl MemoryStore {
    /// Creates a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Internal {
            message: "lock poisoned".into(),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Document>> {
        validate_path(path)?;
        let documents = self.documents.read().map_err(|_| Self::poisoned())?;
        Ok(documents.get(path).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult> {
        let mut documents = self.documents.write().map_err(|_| Self::poisoned())?;
        apply_batch(&mut documents, batch)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        self.documents
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let documents = self.documents.read().map_err(|_| Self::poisoned())?;
        Ok(list_prefix(&documents, prefix))
    }
}
