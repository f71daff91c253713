//! Source data set loading.
//!
//! The source is a JSON object keyed by entity type. Each value is either an
//! array of records or an object mapping identifier to record (keyed form).
//! A directory source holds one `<entity_type>.json` file per entity type.
//!
//! ```json
//! {
//!   "department": [{ "id": "CS", "name": "Computer Science" }],
//!   "term": { "S1": { "department_id": "CS", "semester_number": 1 } }
//! }
//! ```
//!
//! In keyed form a record missing its identifier field gets the key injected.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use strata_core::Document;

use crate::error::{Error, RecordError, Result};
use crate::mapping::MigrationPlan;
use crate::template::ID_PLACEHOLDER;

/// Source records grouped by entity type. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceDataset {
    entities: BTreeMap<String, Vec<Document>>,
}

impl SourceDataset {
    /// Creates an empty data set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds records for an entity type, appending to any already present.
    pub fn insert(&mut self, entity_type: impl Into<String>, records: Vec<Document>) {
        self.entities
            .entry(entity_type.into())
            .or_default()
            .extend(records);
    }

    /// Builds a data set from a parsed source object.
    ///
    /// # Errors
    ///
    /// Returns `Error::Source` if the value is not an object of record arrays
    /// or keyed record objects.
    pub fn from_value(value: Value, plan: &MigrationPlan) -> Result<Self> {
        let Value::Object(entities) = value else {
            return Err(source_error("source must be a JSON object keyed by entity type"));
        };
        let mut dataset = Self::new();
        for (entity_type, records) in entities {
            let id_field = id_field_for(plan, &entity_type);
            let records = parse_records(&entity_type, records, id_field)?;
            dataset.insert(entity_type, records);
        }
        Ok(dataset)
    }

    /// Loads a data set from a JSON file or a directory of per-entity files.
    ///
    /// # Errors
    ///
    /// Returns `Error::Source` if the path cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>, plan: &MigrationPlan) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| source_error(format!("failed to read {}: {e}", path.display())))?;

        if metadata.is_dir() {
            Self::load_dir(path, plan).await
        } else {
            let value = read_json(path).await?;
            Self::from_value(value, plan)
        }
    }

    async fn load_dir(dir: &Path, plan: &MigrationPlan) -> Result<Self> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| source_error(format!("failed to list {}: {e}", dir.display())))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| source_error(format!("failed to list {}: {e}", dir.display())))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut dataset = Self::new();
        for file in files {
            let Some(entity_type) = file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let value = read_json(&file).await?;
            let records = parse_records(entity_type, value, id_field_for(plan, entity_type))?;
            dataset.insert(entity_type, records);
        }
        Ok(dataset)
    }

    /// Returns the records of an entity type (empty if none).
    #[must_use]
    pub fn records(&self, entity_type: &str) -> &[Document] {
        self.entities
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the number of records of an entity type.
    #[must_use]
    pub fn count(&self, entity_type: &str) -> usize {
        self.records(entity_type).len()
    }

    /// Returns the entity types present in the data set.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

fn source_error(message: impl Into<String>) -> Error {
    Error::Source {
        message: message.into(),
    }
}

fn id_field_for<'a>(plan: &'a MigrationPlan, entity_type: &str) -> &'a str {
    plan.entity(entity_type)
        .map_or(ID_PLACEHOLDER, |e| e.id_field.as_str())
}

async fn read_json(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| source_error(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| source_error(format!("failed to parse {}: {e}", path.display())))
}

fn parse_records(entity_type: &str, value: Value, id_field: &str) -> Result<Vec<Document>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(record) => Ok(record),
                _ => Err(source_error(format!(
                    "{entity_type}[{i}] is not a JSON object"
                ))),
            })
            .collect(),
        Value::Object(keyed) => keyed
            .into_iter()
            .map(|(key, item)| match item {
                Value::Object(mut record) => {
                    record
                        .entry(id_field.to_string())
                        .or_insert_with(|| Value::String(key));
                    Ok(record)
                }
                _ => Err(source_error(format!(
                    "{entity_type}.{key} is not a JSON object"
                ))),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => Err(source_error(format!(
            "records for '{entity_type}' must be an array or an object"
        ))),
    }
}

/// Reads an identifier value as a path segment.
///
/// Strings are used as-is; integers are rendered in decimal.
///
/// # Errors
///
/// Returns `RecordError::Validation` if the value is missing, of another
/// type, empty, or contains `/`.
pub fn identifier(record: &Document, field: &str) -> std::result::Result<String, RecordError> {
    let id = match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
        Some(Value::Null) | None => {
            return Err(RecordError::validation(format!("missing identifier field '{field}'")));
        }
        Some(other) => {
            return Err(RecordError::validation(format!(
                "identifier field '{field}' has unsupported value {other}"
            )));
        }
    };
    if id.trim().is_empty() {
        return Err(RecordError::validation(format!("identifier field '{field}' is empty")));
    }
    if id.contains('/') || id == "." || id == ".." {
        return Err(RecordError::validation(format!(
            "identifier '{id}' is not a valid path segment"
        )));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingDefinition;
    use serde_json::json;

    fn plan() -> MigrationPlan {
        serde_json::from_value::<MappingDefinition>(json!({
            "entities": [
                { "name": "department", "path": "departments/{id}" },
                {
                    "name": "term",
                    "idField": "code",
                    "parent": { "entity": "department", "field": "department_id" },
                    "path": "departments/{department}/terms/{id}"
                }
            ]
        }))
        .unwrap()
        .resolve()
        .unwrap()
    }

    #[test]
    fn accepts_array_and_keyed_forms() {
        let dataset = SourceDataset::from_value(
            json!({
                "department": [{ "id": "CS", "name": "Computer Science" }],
                "term": { "S1": { "department_id": "CS" }, "S2": { "code": "X", "department_id": "CS" } },
                "unit": null
            }),
            &plan(),
        )
        .unwrap();

        assert_eq!(dataset.count("department"), 1);
        assert_eq!(dataset.count("unit"), 0);
        assert_eq!(dataset.count("missing"), 0);
        let terms = dataset.records("term");
        assert_eq!(terms[0]["code"], json!("S1"));
        assert_eq!(terms[1]["code"], json!("X"));
    }

    #[test]
    fn rejects_non_object_records() {
        let err = SourceDataset::from_value(json!({ "department": [1, 2] }), &plan()).unwrap_err();
        assert!(err.to_string().contains("department[0]"));
        assert!(SourceDataset::from_value(json!([]), &plan()).is_err());
    }

    #[test]
    fn identifier_accepts_strings_and_integers() {
        let record = json!({ "id": "CS", "n": 42, "f": 1.5, "slash": "a/b", "blank": " " });
        let Value::Object(record) = record else { unreachable!() };

        assert_eq!(identifier(&record, "id").unwrap(), "CS");
        assert_eq!(identifier(&record, "n").unwrap(), "42");
        assert!(identifier(&record, "f").is_err());
        assert!(identifier(&record, "slash").is_err());
        assert!(identifier(&record, "blank").is_err());
        assert!(identifier(&record, "absent").is_err());
    }

    #[tokio::test]
    async fn loads_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("source.json");
        tokio::fs::write(&file, r#"{"department": [{"id": "CS"}]}"#)
            .await
            .unwrap();
        let dataset = SourceDataset::load(&file, &plan()).await.unwrap();
        assert_eq!(dataset.count("department"), 1);

        let per_entity = dir.path().join("per_entity");
        tokio::fs::create_dir(&per_entity).await.unwrap();
        tokio::fs::write(per_entity.join("department.json"), r#"[{"id": "CS"}, {"id": "EE"}]"#)
            .await
            .unwrap();
        tokio::fs::write(per_entity.join("term.json"), r#"{"S1": {"department_id": "CS"}}"#)
            .await
            .unwrap();
        tokio::fs::write(per_entity.join("README.txt"), "ignored")
            .await
            .unwrap();

        let dataset = SourceDataset::load(&per_entity, &plan()).await.unwrap();
        assert_eq!(dataset.count("department"), 2);
        assert_eq!(dataset.records("term")[0]["code"], json!("S1"));
        assert_eq!(dataset.entity_types().collect::<Vec<_>>(), vec!["department", "term"]);
    }

    #[tokio::test]
    async fn missing_path_is_source_error() {
        let err = SourceDataset::load("/nonexistent/strata/source.json", &plan())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Source { .. }));
    }
}
