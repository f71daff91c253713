//! Single-file JSON document store.
//!
//! Keeps the whole store in memory and persists it to one JSON file after
//! every mutation. Each persist writes a sibling temp file and renames it over
//! the target, so a crash leaves either the previous or the new state on disk,
//! never a torn file. This gives [`DocumentStore::commit`] the same
//! all-or-nothing guarantee on disk that it has in memory.
//!
//! Intended for local operator runs, rehearsals and demos. Every commit
//! rewrites the full file.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::store::{
    CommitResult, Document, DocumentStore, WriteBatch, apply_batch, list_prefix, validate_path,
};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    documents: BTreeMap<String, Document>,
}

/// Document store persisted to a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    documents: Mutex<BTreeMap<String, Document>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading existing content if the file exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the file cannot be read, or
    /// `Error::Serialization` if it is not a valid store file.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let documents = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: StoreFile =
                    serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
                        message: format!("invalid store file {}: {e}", path.display()),
                    })?;
                if file.version != FORMAT_VERSION {
                    return Err(Error::Serialization {
                        message: format!(
                            "unsupported store file version {} in {}",
                            file.version,
                            path.display()
                        ),
                    });
                }
                file.documents
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(Error::storage_with_source(
                    format!("failed to read {}", path.display()),
                    e,
                ));
            }
        };

        tracing::debug!(path = %path.display(), documents = documents.len(), "opened file store");
        Ok(Self {
            path,
            documents: Mutex::new(documents),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, documents: BTreeMap<String, Document>) -> Result<BTreeMap<String, Document>> {
        let file = StoreFile {
            version: FORMAT_VERSION,
            documents,
        };
        let payload = serde_json::to_vec_pretty(&file).map_err(|e| Error::Serialization {
            message: format!("failed to serialize store: {e}"),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage_with_source(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, payload).await.map_err(|e| {
            Error::storage_with_source(format!("failed to write {}", tmp_path.display()), e)
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            Error::storage_with_source(format!("failed to replace {}", self.path.display()), e)
        })?;

        Ok(file.documents)
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn get(&self, path: &str) -> Result<Option<Document>> {
        validate_path(path)?;
        Ok(self.documents.lock().await.get(path).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult> {
        let mut documents = self.documents.lock().await;
        let mut next = documents.clone();
        let result = apply_batch(&mut next, batch)?;
        if result == CommitResult::Committed {
            *documents = self.persist(next).await?;
        }
        Ok(result)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut documents = self.documents.lock().await;
        if !documents.contains_key(path) {
            return Ok(());
        }
        let mut next = documents.clone();
        next.remove(path);
        *documents = self.persist(next).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(list_prefix(&*self.documents.lock().await, prefix))
    }
}
