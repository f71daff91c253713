//! Pre-built test fixtures for common test scenarios.
//!
//! Two data sets are provided:
//! - the department/semester scenario (one record per entity type)
//! - a six-level hierarchy (account, department, term, subject, unit, note)
//!   with a configurable fan-out per level

use std::sync::Arc;

use serde_json::{Value, json};

use strata_core::{Document, DocumentStore, MemoryStore};
use strata_migrate::mapping::{MappingDefinition, MigrationPlan};
use strata_migrate::options::RunOptions;
use strata_migrate::orchestrator::Migrator;
use strata_migrate::retry::RetryPolicy;
use strata_migrate::source::SourceDataset;

use crate::storage::FaultyStore;

/// Entity types of the six-level hierarchy, parent first.
pub const HIERARCHY_LEVELS: [&str; 6] = ["account", "department", "term", "subject", "unit", "note"];

/// Converts a JSON object literal into a [`Document`].
pub fn doc(value: Value) -> Document {
    value.as_object().expect("fixture must be a JSON object").clone()
}

/// Mapping for the department/semester scenario.
pub fn scenario_mapping() -> MappingDefinition {
    serde_json::from_value(json!({
        "entities": [
            {
                "name": "department",
                "path": "departments/{id}",
                "required": ["name"]
            },
            {
                "name": "semester",
                "parent": { "entity": "department", "field": "department_id" },
                "path": "departments/{department}/semesters/{id}",
                "rename": { "semester_number": "number" },
                "required": ["number"]
            }
        ]
    }))
    .expect("valid scenario mapping")
}

/// Resolved plan for the department/semester scenario.
pub fn scenario_plan() -> MigrationPlan {
    scenario_mapping().resolve().expect("scenario mapping resolves")
}

/// Source data for the department/semester scenario.
pub fn scenario_source() -> SourceDataset {
    SourceDataset::from_value(
        json!({
            "department": [
                { "id": "CS", "name": "Computer Science", "code": "CS101" }
            ],
            "semester": [
                { "id": "S1", "department_id": "CS", "semester_number": 1 }
            ]
        }),
        &scenario_plan(),
    )
    .expect("valid scenario source")
}

/// Destination path of the scenario department.
pub const SCENARIO_DEPARTMENT_PATH: &str = "departments/CS";
/// Destination path of the scenario semester.
pub const SCENARIO_SEMESTER_PATH: &str = "departments/CS/semesters/S1";

/// Mapping for the six-level hierarchy.
///
/// Every level requires `name`; notes additionally require `body`.
pub fn hierarchy_mapping() -> MappingDefinition {
    let mut entities = vec![json!({
        "name": "account",
        "path": "accounts/{id}",
        "required": ["name"]
    })];
    let mut path = String::from("accounts/{account}");
    for pair in HIERARCHY_LEVELS.windows(2) {
        let (parent, child) = (pair[0], pair[1]);
        let required = if child == "note" {
            json!(["name", "body"])
        } else {
            json!(["name"])
        };
        entities.push(json!({
            "name": child,
            "parent": { "entity": parent, "field": format!("{parent}_id") },
            "path": format!("{path}/{child}s/{{id}}"),
            "required": required
        }));
        path = format!("{path}/{child}s/{{{child}}}");
    }
    serde_json::from_value(json!({ "entities": entities })).expect("valid hierarchy mapping")
}

/// Resolved plan for the six-level hierarchy.
pub fn hierarchy_plan() -> MigrationPlan {
    hierarchy_mapping().resolve().expect("hierarchy mapping resolves")
}

/// Source data for the six-level hierarchy with `fan_out` children per
/// parent at every level.
///
/// Identifiers encode the ancestry (`A0`, `A0.D1`, `A0.D1.T0`...) so they are
/// unique within each entity type.
pub fn hierarchy_source(fan_out: usize) -> SourceDataset {
    let mut data = serde_json::Map::new();
    let mut parents: Vec<String> = vec![String::new()];

    for (level, entity) in HIERARCHY_LEVELS.iter().enumerate() {
        let tag = entity[..1].to_ascii_uppercase();
        let mut records = Vec::new();
        let mut ids = Vec::new();
        for parent in &parents {
            for n in 0..fan_out {
                let id = if parent.is_empty() {
                    format!("{tag}{n}")
                } else {
                    format!("{parent}.{tag}{n}")
                };
                let mut record = json!({ "id": id, "name": format!("{entity} {id}") });
                if level > 0 {
                    record[format!("{}_id", HIERARCHY_LEVELS[level - 1])] = json!(parent);
                }
                if *entity == "note" {
                    record["body"] = json!(format!("text of {id}"));
                }
                records.push(record);
                ids.push(id);
            }
        }
        data.insert((*entity).to_string(), Value::Array(records));
        parents = ids;
    }

    SourceDataset::from_value(Value::Object(data), &hierarchy_plan()).expect("valid hierarchy source")
}

/// Number of records `hierarchy_source(fan_out)` produces for each level.
pub fn hierarchy_counts(fan_out: usize) -> Vec<usize> {
    (1..=HIERARCHY_LEVELS.len())
        .map(|depth| fan_out.pow(u32::try_from(depth).expect("small depth")))
        .collect()
}

/// Run options with zero-delay retries, for fast tests.
pub fn fast_options() -> RunOptions {
    RunOptions {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
        },
        ..RunOptions::default()
    }
}

/// Builds a migrator over `store` with [`fast_options`].
pub fn migrator(store: &FaultyStore, plan: MigrationPlan) -> Migrator {
    migrator_with(store.shared(), plan, fast_options())
}

/// Builds a migrator with explicit options.
pub fn migrator_with(store: Arc<dyn DocumentStore>, plan: MigrationPlan, options: RunOptions) -> Migrator {
    Migrator::new(store, plan, options).expect("valid run options")
}

/// Returns a shared handle to a fresh in-memory store.
pub fn memory_store() -> (MemoryStore, Arc<dyn DocumentStore>) {
    let store = MemoryStore::new();
    let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
    (store, shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_plan_orders_levels() {
        let plan = hierarchy_plan();
        let order: Vec<_> = plan.order().collect();
        assert_eq!(order, HIERARCHY_LEVELS);
        assert_eq!(
            plan.entity("note").unwrap().template.as_str(),
            "accounts/{account}/departments/{department}/terms/{term}/subjects/{subject}/units/{unit}/notes/{id}"
        );
    }

    #[test]
    fn hierarchy_source_fans_out() {
        let source = hierarchy_source(2);
        let counts: Vec<_> = HIERARCHY_LEVELS.iter().map(|e| source.count(e)).collect();
        assert_eq!(counts, hierarchy_counts(2));
        assert_eq!(counts, vec![2, 4, 8, 16, 32, 64]);
    }

    #[test]
    fn scenario_fixture_is_consistent() {
        assert_eq!(scenario_source().count("semester"), 1);
        assert_eq!(scenario_plan().order().collect::<Vec<_>>(), vec!["department", "semester"]);
    }
}
