//! Re-running a migration never duplicates work: markers are the only record
//! of "already migrated", and removing one re-migrates exactly that document.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use strata_core::DocumentStore;
use strata_migrate::marker::{MigrationMarker, list_markers, list_runs};
use strata_test_utils::{
    FaultyStore, SCENARIO_DEPARTMENT_PATH, SCENARIO_SEMESTER_PATH, assert_all_written,
    assert_fully_skipped, assert_migrated, assert_phase_order, migrator, phase, scenario_plan,
    scenario_source,
};

#[tokio::test]
async fn first_run_writes_documents_and_markers() {
    let store = FaultyStore::new();
    let plan = scenario_plan();
    let tracking = plan.tracking_collection().to_string();

    let summary = migrator(&store, plan).run(&scenario_source()).await.unwrap();

    assert_all_written(&summary, 2);
    assert_phase_order(&summary, &["department", "semester"]);
    assert_migrated(store.inner(), &tracking, SCENARIO_DEPARTMENT_PATH).await;
    assert_migrated(store.inner(), &tracking, SCENARIO_SEMESTER_PATH).await;
    assert_eq!(store.inner().count(&format!("{tracking}/")).await.unwrap(), 2);

    let semester = store.inner().get(SCENARIO_SEMESTER_PATH).await.unwrap().unwrap();
    assert_eq!(semester["number"], 1);
    assert!(semester.get("semester_number").is_none());

    let markers = list_markers(store.inner(), &tracking).await.unwrap();
    assert!(markers.iter().all(|m| m.marker.run_id == summary.run_id));
}

#[tokio::test]
async fn second_run_skips_everything() {
    let store = FaultyStore::new();
    let source = scenario_source();
    migrator(&store, scenario_plan()).run(&source).await.unwrap();
    store.clear_operations();

    let summary = migrator(&store, scenario_plan()).run(&source).await.unwrap();

    assert_fully_skipped(&summary);
    assert_eq!(phase(&summary, "department").skipped_idempotent, 1);
    assert_eq!(phase(&summary, "semester").skipped_idempotent, 1);
    assert!(store.written_paths().is_empty(), "second run must not write");
    assert!(summary.is_clean());
}

#[tokio::test]
async fn deleting_one_marker_remigrates_only_that_document() {
    let store = FaultyStore::new();
    let plan = scenario_plan();
    let tracking = plan.tracking_collection().to_string();
    let source = scenario_source();
    let first = migrator(&store, plan.clone()).run(&source).await.unwrap();

    store
        .inner()
        .delete(&MigrationMarker::storage_path(&tracking, SCENARIO_SEMESTER_PATH))
        .await
        .unwrap();
    store.clear_operations();

    let second = migrator(&store, plan).run(&source).await.unwrap();

    assert_eq!(phase(&second, "department").skipped_idempotent, 1);
    assert_eq!(phase(&second, "department").written, 0);
    assert_eq!(phase(&second, "semester").written, 1);
    assert_eq!(
        store.written_paths(),
        vec![
            SCENARIO_SEMESTER_PATH.to_string(),
            MigrationMarker::storage_path(&tracking, SCENARIO_SEMESTER_PATH),
        ]
    );

    let runs = list_runs(store.inner(), &tracking).await.unwrap();
    assert_eq!(runs.len(), 2);
    let by_id = |id| runs.iter().find(|r| r.run_id == id).unwrap();
    assert_eq!(by_id(first.run_id).entity_types.get("department"), Some(&1));
    assert_eq!(by_id(second.run_id).entity_types.get("semester"), Some(&1));
}

#[tokio::test]
async fn document_without_marker_is_rewritten() {
    let store = FaultyStore::new();
    let plan = scenario_plan();
    let tracking = plan.tracking_collection().to_string();
    let source = scenario_source();
    migrator(&store, plan.clone()).run(&source).await.unwrap();

    // Simulates a crash between document and marker on a store without
    // atomic batches: the document exists but is not yet marked.
    store
        .inner()
        .delete(&MigrationMarker::storage_path(&tracking, SCENARIO_DEPARTMENT_PATH))
        .await
        .unwrap();

    let summary = migrator(&store, plan).run(&source).await.unwrap();
    assert_eq!(phase(&summary, "department").written, 1);
    assert_eq!(phase(&summary, "semester").skipped_idempotent, 1);
    assert_migrated(store.inner(), &tracking, SCENARIO_DEPARTMENT_PATH).await;
}
