//! End-to-end migration against the JSON file store, including a restart
//! between runs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use strata_core::{DocumentStore, JsonFileStore};
use strata_migrate::mapping::MappingDefinition;
use strata_migrate::rollback::{Rollback, RollbackScope};
use strata_migrate::source::SourceDataset;
use strata_test_utils::{
    SCENARIO_SEMESTER_PATH, assert_fully_skipped, fast_options, migrator_with, scenario_mapping,
};

#[tokio::test]
async fn markers_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("destination.json");
    let mapping_path = dir.path().join("mapping.json");
    let source_path = dir.path().join("source.json");

    tokio::fs::write(
        &mapping_path,
        serde_json::to_vec_pretty(&scenario_mapping()).unwrap(),
    )
    .await
    .unwrap();
    tokio::fs::write(
        &source_path,
        r#"{
            "department": {"CS": {"name": "Computer Science", "code": "CS101"}},
            "semester": [{"id": "S1", "department_id": "CS", "semester_number": 1}]
        }"#,
    )
    .await
    .unwrap();

    let plan = MappingDefinition::from_file(&mapping_path)
        .await
        .unwrap()
        .resolve()
        .unwrap();
    let source = SourceDataset::load(&source_path, &plan).await.unwrap();

    let store: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::open(&db).await.unwrap());
    let first = migrator_with(store, plan.clone(), fast_options())
        .run(&source)
        .await
        .unwrap();
    assert_eq!(first.written(), 2);

    // Fresh handle, as after a process restart.
    let reopened: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::open(&db).await.unwrap());
    assert!(reopened.get(SCENARIO_SEMESTER_PATH).await.unwrap().is_some());
    let second = migrator_with(reopened.clone(), plan.clone(), fast_options())
        .run(&source)
        .await
        .unwrap();
    assert_fully_skipped(&second);

    let tally = Rollback::new(reopened, plan)
        .execute(&RollbackScope::Run(first.run_id))
        .await
        .unwrap();
    assert!(tally.is_complete());

    let after: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::open(&db).await.unwrap());
    assert_eq!(after.count("").await.unwrap(), 0);
}
