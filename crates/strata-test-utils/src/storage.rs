//! Test document store with operation tracing and failure injection.
//!
//! [`FaultyStore`] wraps a [`MemoryStore`] and records every operation so
//! tests can assert on exactly what reached the store. Failures are injected
//! by path prefix, either transient (retryable) or permanent, optionally for a
//! limited number of hits.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use strata_core::error::{Error, Result};
use strata_core::{CommitResult, Document, DocumentStore, MemoryStore, WriteBatch};

/// Record of a store operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Batch commit.
    Commit {
        /// Paths in the batch, in order.
        paths: Vec<String>,
        /// Whether the batch was applied.
        applied: bool,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

/// How an injected failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Fails with a retryable error.
    Transient,
    /// Fails with a non-retryable error.
    Permanent,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    prefix: String,
    kind: FailureKind,
    /// Remaining hits; `None` fails forever.
    remaining: Option<usize>,
}

type CommitHook = Arc<dyn Fn(usize) + Send + Sync>;

/// In-memory document store with operation tracing.
///
/// Clones share state, so a test can keep one handle for assertions while the
/// migrator owns another.
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    failures: Arc<Mutex<Vec<InjectedFailure>>>,
    commits: Arc<Mutex<usize>>,
    on_commit: Option<CommitHook>,
    latency: Option<Duration>,
}

impl std::fmt::Debug for FaultyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyStore")
            .field("operations", &self.operations.lock().expect("lock").len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl FaultyStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store over existing contents.
    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Creates a store with simulated latency on every operation.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Calls `hook` with the running count after every applied commit.
    #[must_use]
    pub fn with_commit_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_commit = Some(Arc::new(hook));
        self
    }

    /// Returns a shared trait-object handle for the migration engine.
    pub fn shared(&self) -> Arc<dyn DocumentStore> {
        Arc::new(self.clone())
    }

    /// Returns the wrapped store, bypassing tracing and failures.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Returns every path written by an applied commit, in commit order.
    pub fn written_paths(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Commit {
                    paths,
                    applied: true,
                } => Some(paths),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Returns the number of applied commits.
    pub fn commit_count(&self) -> usize {
        *self.commits.lock().expect("lock")
    }

    /// Fails every operation touching `prefix` with a permanent error.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.inject(prefix, FailureKind::Permanent, None);
    }

    /// Fails the next `times` operations touching `prefix` with a transient
    /// error.
    pub fn inject_transient(&self, prefix: impl Into<String>, times: usize) {
        self.inject(prefix, FailureKind::Transient, Some(times));
    }

    /// Injects a failure for `prefix`; `times` of `None` fails forever.
    pub fn inject(&self, prefix: impl Into<String>, kind: FailureKind, times: Option<usize>) {
        self.failures.lock().expect("lock").push(InjectedFailure {
            prefix: prefix.into(),
            kind,
            remaining: times,
        });
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().expect("lock").clear();
    }

    fn record(&self, op: StoreOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut failures = self.failures.lock().expect("lock");
        for path in paths {
            let Some(failure) = failures
                .iter_mut()
                .find(|f| path.starts_with(&f.prefix) && f.remaining != Some(0))
            else {
                continue;
            };
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }
            let message = format!("injected failure for path: {path}");
            return Err(match failure.kind {
                FailureKind::Transient => Error::transient(message),
                FailureKind::Permanent => Error::storage(message),
            });
        }
        Ok(())
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for FaultyStore {
    async fn get(&self, path: &str) -> Result<Option<Document>> {
        self.maybe_delay().await;
        self.check_failure([path])?;
        self.record(StoreOp::Get {
            path: path.to_string(),
        });
        self.inner.get(path).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult> {
        self.maybe_delay().await;
        let paths: Vec<String> = batch.ops().iter().map(|op| op.path.clone()).collect();
        self.check_failure(paths.iter().map(String::as_str))?;

        let result = self.inner.commit(batch).await?;
        let applied = result == CommitResult::Committed;
        self.record(StoreOp::Commit { paths, applied });

        if applied {
            let count = {
                let mut commits = self.commits.lock().expect("lock");
                *commits += 1;
                *commits
            };
            if let Some(hook) = &self.on_commit {
                hook(count);
            }
        }
        Ok(result)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure([path])?;
        self.record(StoreOp::Delete {
            path: path.to_string(),
        });
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.maybe_delay().await;
        self.record(StoreOp::List {
            prefix: prefix.to_string(),
        });
        self.inner.list(prefix).await
    }
}
