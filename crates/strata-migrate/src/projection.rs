//! Field projection and content hashing.
//!
//! A projection turns a source record into the document written to the
//! destination. Rules are applied in a fixed order:
//!
//! 1. `drop` removes listed fields
//! 2. `keep`, when set, retains only listed fields
//! 3. `rename` moves fields to new names
//! 4. `defaults` fill fields that are absent
//! 5. `nullIfEmpty` turns empty or whitespace-only strings into `null`
//!
//! The content hash of a projected document is the SHA-256 of its RFC 8785
//! canonical JSON, so it is independent of key order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use strata_core::Document;

use crate::error::RecordError;

/// Per-entity field projection rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRules {
    /// Fields to retain (all fields when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<Vec<String>>,
    /// Fields to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop: Vec<String>,
    /// Source field name to destination field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rename: BTreeMap<String, String>,
    /// Values for fields absent after renaming.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub defaults: Document,
    /// Fields whose empty-string values become `null`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub null_if_empty: Vec<String>,
}

impl ProjectionRules {
    /// Projects a source record into a destination document.
    #[must_use]
    pub fn apply(&self, record: &Document) -> Document {
        let mut doc: Document = record
            .iter()
            .filter(|(key, _)| !self.drop.contains(key))
            .filter(|(key, _)| self.keep.as_ref().is_none_or(|keep| keep.contains(key)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        for (from, to) in &self.rename {
            if let Some(value) = doc.remove(from) {
                doc.insert(to.clone(), value);
            }
        }

        for (field, value) in &self.defaults {
            if !doc.contains_key(field) {
                doc.insert(field.clone(), value.clone());
            }
        }

        for field in &self.null_if_empty {
            if let Some(value) = doc.get_mut(field) {
                if value.as_str().is_some_and(|s| s.trim().is_empty()) {
                    *value = Value::Null;
                }
            }
        }

        doc
    }
}

/// Checks that every required field is present and non-null.
///
/// # Errors
///
/// Returns `RecordError::Validation` listing every missing field.
pub fn check_required(doc: &Document, required: &[String]) -> Result<(), RecordError> {
    let missing = missing_fields(doc, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RecordError::validation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )))
    }
}

/// Returns the required fields that are absent or null.
#[must_use]
pub fn missing_fields(doc: &Document, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|field| doc.get(field.as_str()).is_none_or(Value::is_null))
        .cloned()
        .collect()
}

/// Computes the content hash of a projected document.
///
/// # Errors
///
/// Returns an error if the document cannot be canonicalized.
pub fn content_hash(doc: &Document) -> Result<String, serde_json::Error> {
    let canonical = serde_jcs::to_string(doc)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn rules(value: Value) -> ProjectionRules {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn applies_rules_in_order() {
        let rules = rules(json!({
            "drop": ["legacy_flag"],
            "rename": { "semester_number": "number" },
            "defaults": { "archived": false, "number": 0 },
            "nullIfEmpty": ["department_id"]
        }));
        let projected = rules.apply(&doc(json!({
            "id": "S1",
            "department_id": "  ",
            "semester_number": 1,
            "legacy_flag": true
        })));

        assert_eq!(
            Value::Object(projected),
            json!({
                "id": "S1",
                "department_id": null,
                "number": 1,
                "archived": false
            })
        );
    }

    #[test]
    fn keep_applies_before_rename() {
        let rules = rules(json!({
            "keep": ["id", "title"],
            "rename": { "title": "name" }
        }));
        let projected = rules.apply(&doc(json!({"id": "u1", "title": "Intro", "extra": 1})));
        assert_eq!(Value::Object(projected), json!({"id": "u1", "name": "Intro"}));
    }

    #[test]
    fn null_if_empty_leaves_non_strings() {
        let rules = rules(json!({ "nullIfEmpty": ["parent", "count"] }));
        let projected = rules.apply(&doc(json!({"parent": "P1", "count": 0})));
        assert_eq!(projected["parent"], json!("P1"));
        assert_eq!(projected["count"], json!(0));
    }

    #[test]
    fn required_reports_every_missing_field() {
        let projected = doc(json!({"id": "CS", "name": null}));
        let err = check_required(
            &projected,
            &["id".to_string(), "name".to_string(), "code".to_string()],
        )
        .unwrap_err();
        assert_eq!(
            err,
            RecordError::validation("missing required field(s): name, code")
        );
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = content_hash(&doc(json!({"id": "CS", "name": "Computer Science"}))).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_changes_with_content() {
        let a = content_hash(&doc(json!({"id": "S1", "number": 1}))).unwrap();
        let b = content_hash(&doc(json!({"id": "S1", "number": 2}))).unwrap();
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn hash_ignores_key_order(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let forward: Document = entries
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let reverse: Document = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            prop_assert_eq!(content_hash(&forward).unwrap(), content_hash(&reverse).unwrap());
        }

        #[test]
        fn projection_is_deterministic(
            entries in proptest::collection::btree_map("[a-z]{1,6}", "[ a-z]{0,4}", 0..10),
            drop_key in "[a-z]{1,6}",
        ) {
            let rules = ProjectionRules {
                drop: vec![drop_key.clone()],
                null_if_empty: entries.keys().cloned().collect(),
                ..ProjectionRules::default()
            };
            let record: Document = entries
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let first = rules.apply(&record);
            let second = rules.apply(&record);
            prop_assert!(!first.contains_key(&drop_key));
            prop_assert_eq!(content_hash(&first).unwrap(), content_hash(&second).unwrap());
        }
    }
}
