//! Mapping drift between runs surfaces as a conflict and never overwrites the
//! stored document.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use serde_json::json;

use strata_core::DocumentStore;
use strata_migrate::error::RecordError;
use strata_migrate::source::SourceDataset;
use strata_test_utils::{
    FaultyStore, SCENARIO_DEPARTMENT_PATH, assert_issues, migrator, phase, scenario_mapping,
    scenario_plan, scenario_source,
};

async fn stored_bytes(store: &FaultyStore, path: &str) -> Vec<u8> {
    let doc = store.inner().get(path).await.unwrap().unwrap();
    serde_json::to_vec(&doc).unwrap()
}

#[tokio::test]
async fn altered_projection_is_a_conflict() {
    let store = FaultyStore::new();
    let first = migrator(&store, scenario_plan())
        .run(&scenario_source())
        .await
        .unwrap();
    let before = stored_bytes(&store, SCENARIO_DEPARTMENT_PATH).await;

    let mut mapping = scenario_mapping();
    mapping.entities[0].projection.drop.push("code".into());
    store.clear_operations();

    let summary = migrator(&store, mapping.resolve().unwrap())
        .run(&scenario_source())
        .await
        .unwrap();

    assert_eq!(phase(&summary, "department").conflicts, 1);
    assert_eq!(phase(&summary, "semester").skipped_idempotent, 1);
    let stored_run = first.run_id.to_string();
    assert_issues(&summary, "department", 1, |e| {
        matches!(e, RecordError::Conflict { stored_run_id, stored_hash, computed_hash }
            if *stored_run_id == stored_run && stored_hash != computed_hash)
    });
    assert_eq!(stored_bytes(&store, SCENARIO_DEPARTMENT_PATH).await, before);
    assert!(store.written_paths().is_empty());
}

#[tokio::test]
async fn changed_source_value_is_a_conflict() {
    let store = FaultyStore::new();
    migrator(&store, scenario_plan())
        .run(&scenario_source())
        .await
        .unwrap();
    let before = stored_bytes(&store, SCENARIO_DEPARTMENT_PATH).await;

    let edited = SourceDataset::from_value(
        json!({
            "department": [{ "id": "CS", "name": "Computing", "code": "CS101" }],
            "semester": [{ "id": "S1", "department_id": "CS", "semester_number": 1 }]
        }),
        &scenario_plan(),
    )
    .unwrap();
    let summary = migrator(&store, scenario_plan()).run(&edited).await.unwrap();

    assert_eq!(phase(&summary, "department").conflicts, 1);
    assert_eq!(stored_bytes(&store, SCENARIO_DEPARTMENT_PATH).await, before);
}

#[tokio::test]
async fn key_order_does_not_cause_conflicts() {
    let store = FaultyStore::new();
    migrator(&store, scenario_plan())
        .run(&scenario_source())
        .await
        .unwrap();

    let reordered = SourceDataset::from_value(
        json!({
            "semester": [{ "semester_number": 1, "department_id": "CS", "id": "S1" }],
            "department": [{ "code": "CS101", "name": "Computer Science", "id": "CS" }]
        }),
        &scenario_plan(),
    )
    .unwrap();
    let summary = migrator(&store, scenario_plan()).run(&reordered).await.unwrap();

    assert_eq!(summary.skipped_idempotent(), 2);
    assert!(summary.is_clean());
}
