//! Post-migration verification.
//!
//! Re-reads the destination and compares it with the source data set. For
//! each entity type the verifier counts the documents matching its path
//! template, then checks a sample (or all) of them for missing required
//! fields and dangling parent references. Verification never mutates the
//! store; a non-clean report is a signal for the operator, never a trigger
//! for rollback.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use strata_core::observability::destination_span;
use strata_core::{Document, DocumentStore};

use crate::error::Result;
use crate::mapping::{EntityDescriptor, MigrationPlan};
use crate::projection::missing_fields;
use crate::source::{SourceDataset, identifier};
use crate::template::ID_PLACEHOLDER;

/// A destination document lacking required fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingFields {
    /// Document path.
    pub path: String,
    /// Required fields that are absent or null.
    pub fields: Vec<String>,
}

/// A foreign key that does not resolve to an existing parent document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedReference {
    /// Child document path.
    pub path: String,
    /// Foreign-key field.
    pub field: String,
    /// Foreign-key value (`None` when missing or null).
    pub value: Option<String>,
    /// Where the parent was expected, when it could be computed.
    pub expected_parent_path: Option<String>,
}

/// Verification result for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    /// Entity type.
    pub entity_type: String,
    /// Destination path template.
    pub collection: String,
    /// Source records of this entity type.
    pub expected: usize,
    /// Destination documents matching the template.
    pub actual: usize,
    /// Documents inspected for fields and references.
    pub checked: usize,
    /// Documents missing required fields.
    pub missing_required: Vec<MissingFields>,
    /// Dangling parent references.
    pub orphaned: Vec<OrphanedReference>,
}

impl CollectionReport {
    /// Returns true if the destination count equals the source count.
    #[must_use]
    pub fn count_matches(&self) -> bool {
        self.expected == self.actual
    }

    /// Returns true if nothing is wrong with this collection.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.count_matches() && self.missing_required.is_empty() && self.orphaned.is_empty()
    }
}

/// Verification result for every entity type in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// One entry per entity type.
    pub collections: Vec<CollectionReport>,
}

impl VerificationReport {
    /// Returns true when every count matches and no document has problems.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.collections.iter().all(CollectionReport::is_clean)
    }

    /// Returns the report for an entity type.
    #[must_use]
    pub fn collection(&self, entity_type: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.entity_type == entity_type)
    }
}

/// Compares a destination store against a source data set.
pub struct Verifier {
    store: Arc<dyn DocumentStore>,
    plan: MigrationPlan,
    sample: Option<usize>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("plan", &self.plan)
            .field("sample", &self.sample)
            .finish_non_exhaustive()
    }
}

/// Per-report lookup caches.
#[derive(Default)]
struct ParentCache {
    exists: HashMap<String, bool>,
    /// Captured placeholder values of every document of an entity type.
    documents: HashMap<String, Vec<BTreeMap<String, String>>>,
}

impl Verifier {
    /// Creates a verifier that checks every document.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, plan: MigrationPlan) -> Self {
        Self {
            store,
            plan,
            sample: None,
        }
    }

    /// Limits field and reference checks to the first `sample` documents of
    /// each collection (`None` checks all).
    #[must_use]
    pub fn with_sample(mut self, sample: Option<usize>) -> Self {
        self.sample = sample;
        self
    }

    /// Builds a verification report.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the destination cannot be read.
    pub async fn verify(&self, source: &SourceDataset) -> Result<VerificationReport> {
        let span = destination_span("verify");
        async {
            let mut cache = ParentCache::default();
            let mut report = VerificationReport::default();
            for entity in self.plan.phases() {
                let collection = self
                    .verify_entity(entity, source.count(&entity.name), &mut cache)
                    .await?;
                if collection.is_clean() {
                    tracing::info!(entity_type = %entity.name, actual = collection.actual, "collection verified");
                } else {
                    tracing::warn!(
                        entity_type = %entity.name,
                        expected = collection.expected,
                        actual = collection.actual,
                        missing_required = collection.missing_required.len(),
                        orphaned = collection.orphaned.len(),
                        "collection has discrepancies"
                    );
                }
                report.collections.push(collection);
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn entity_documents(&self, entity: &EntityDescriptor) -> Result<Vec<String>> {
        let paths = self.store.list(&entity.template.literal_prefix()).await?;
        Ok(paths
            .into_iter()
            .filter(|path| entity.template.capture(path).is_some())
            .collect())
    }

    async fn verify_entity(
        &self,
        entity: &EntityDescriptor,
        expected: usize,
        cache: &mut ParentCache,
    ) -> Result<CollectionReport> {
        let paths = self.entity_documents(entity).await?;
        let mut report = CollectionReport {
            entity_type: entity.name.clone(),
            collection: entity.template.as_str().to_string(),
            expected,
            actual: paths.len(),
            checked: 0,
            missing_required: Vec::new(),
            orphaned: Vec::new(),
        };

        for path in paths.iter().take(self.sample.unwrap_or(usize::MAX)) {
            let Some(doc) = self.store.get(path).await? else {
                continue;
            };
            report.checked += 1;

            let missing = missing_fields(&doc, &entity.required);
            if !missing.is_empty() {
                report.missing_required.push(MissingFields {
                    path: path.clone(),
                    fields: missing,
                });
            }

            if let Some(orphan) = self.check_parent(entity, path, &doc, cache).await? {
                report.orphaned.push(orphan);
            }
        }

        Ok(report)
    }

    async fn check_parent(
        &self,
        entity: &EntityDescriptor,
        path: &str,
        doc: &Document,
        cache: &mut ParentCache,
    ) -> Result<Option<OrphanedReference>> {
        let Some(link) = &entity.parent else {
            return Ok(None);
        };
        let Some(parent) = self.plan.entity(&link.entity) else {
            return Ok(None);
        };

        let orphan = |value: Option<String>, expected_parent_path: Option<String>| OrphanedReference {
            path: path.to_string(),
            field: link.field.clone(),
            value,
            expected_parent_path,
        };

        let fk = match doc.get(&link.field) {
            None | Some(Value::Null) => return Ok(Some(orphan(None, None))),
            Some(raw) => match identifier(doc, &link.field) {
                Ok(fk) => fk,
                Err(_) => return Ok(Some(orphan(Some(raw.to_string()), None))),
            },
        };

        let mut values = entity.template.capture(path).unwrap_or_default();

        // A child nested under its parent must reference that parent.
        if let Some(placed) = values.get(&link.entity).filter(|placed| **placed != fk) {
            let mut expected = values.clone();
            expected.insert(ID_PLACEHOLDER.to_string(), placed.clone());
            return Ok(Some(orphan(Some(fk), parent.template.render(&expected).ok())));
        }
        values.insert(ID_PLACEHOLDER.to_string(), fk.clone());

        if let Ok(parent_path) = parent.template.render(&values) {
            let exists = match cache.exists.get(&parent_path) {
                Some(&exists) => exists,
                None => {
                    let exists = self.store.get(&parent_path).await?.is_some();
                    cache.exists.insert(parent_path.clone(), exists);
                    exists
                }
            };
            return Ok((!exists).then(|| orphan(Some(fk), Some(parent_path))));
        }

        // The parent's path has placeholders this child's path does not carry;
        // match against every parent document on the values both share.
        if !cache.documents.contains_key(&parent.name) {
            let captured: Vec<_> = self
                .entity_documents(parent)
                .await?
                .iter()
                .filter_map(|p| parent.template.capture(p))
                .collect();
            cache.documents.insert(parent.name.clone(), captured);
        }
        let found = cache.documents.get(&parent.name).is_some_and(|docs| {
            docs.iter().any(|candidate| {
                candidate
                    .iter()
                    .all(|(name, value)| values.get(name).is_none_or(|v| v == value))
            })
        });
        Ok((!found).then(|| orphan(Some(fk), None)))
    }
}
