//! Saving a run manager and resuming it from the checkpoint.

mod common;

use basin_runner::orchestration::{RunManager, RunOutcome};
use basin_runner::{RunStatus, RunnerError};
use common::*;

#[tokio::test]
async fn test_checkpoint_resumes_scheduled_scenario() {
    let scenario = Scenario::new();
    let checkpoint = scenario.path().join("run_manager.json");

    let mut manager = RunManager::new(scenario.local_config(2), three_stage_pipeline()).unwrap();
    manager.set_max_pending_jobs(4);
    manager.schedule_case(case_a(&scenario)).unwrap();
    manager.schedule_case(case_b(&scenario)).unwrap();
    manager.save(&checkpoint).unwrap();
    let saved = manager.snapshot();
    drop(manager);

    let mut restored =
        RunManager::load(&checkpoint, scenario.local_config(2), three_stage_pipeline()).unwrap();
    assert_eq!(restored.snapshot(), saved);
    assert_eq!(restored.max_pending_jobs(), 4);
    assert_eq!(restored.case_count(), 2);

    let copy_job = restored.job_for_stage(1, 0).unwrap();
    assert_eq!(restored.dependencies_of(copy_job).len(), 1);

    let outcome = restored.run_scheduled_cases(TICK).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(restored.cases().all(|case| case.status() == RunStatus::Completed));
    assert_eq!(scenario.read("case_b", "pt.txt"), "case_a");
    assert_eq!(scenario.read("case_b", "migration.txt"), "case_b");
}

#[tokio::test]
async fn test_checkpoint_after_completion_keeps_finished_jobs() {
    let scenario = Scenario::new();
    let checkpoint = scenario.path().join("run_manager.json");

    let mut config = scenario.local_config(2);
    config.orchestration.update_interval_secs = 0;
    let mut manager = RunManager::new(config, three_stage_pipeline()).unwrap();
    let a = manager.schedule_case(case_a(&scenario)).unwrap();
    assert_eq!(manager.run().await.unwrap(), RunOutcome::Completed);
    manager.save(&checkpoint).unwrap();

    let restored =
        RunManager::load(&checkpoint, scenario.local_config(2), three_stage_pipeline()).unwrap();
    assert_eq!(restored.case(a).unwrap().status(), RunStatus::Completed);
    let counters = restored.collect_statistics();
    assert_eq!(counters.total, 3);
    assert_eq!(counters.finished, 3);
}

#[test]
fn test_newer_checkpoint_version_is_rejected() {
    let scenario = Scenario::new();
    let checkpoint = scenario.path().join("run_manager.json");
    let manager = RunManager::new(scenario.local_config(1), three_stage_pipeline()).unwrap();
    manager.save(&checkpoint).unwrap();

    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&checkpoint).unwrap()).unwrap();
    json["version"] = serde_json::json!(99);
    std::fs::write(&checkpoint, json.to_string()).unwrap();

    let err = RunManager::load(&checkpoint, scenario.local_config(1), three_stage_pipeline())
        .unwrap_err();
    assert!(matches!(err, RunnerError::Checkpoint(_)));
    assert!(err.to_string().contains("99"));
}

#[test]
fn test_checkpoint_must_match_pipeline_and_backend() {
    let scenario = Scenario::new();
    let checkpoint = scenario.path().join("run_manager.json");
    let mut manager = RunManager::new(scenario.local_config(1), three_stage_pipeline()).unwrap();
    manager.schedule_case(case_a(&scenario)).unwrap();
    manager.save(&checkpoint).unwrap();

    let mut shorter = three_stage_pipeline();
    shorter.pop();
    let err = RunManager::load(&checkpoint, scenario.local_config(1), shorter).unwrap_err();
    assert!(matches!(err, RunnerError::Checkpoint(_)));

    let lsf = FakeLsf::install();
    let err = RunManager::load(&checkpoint, scenario.cluster_config(&lsf), three_stage_pipeline())
        .unwrap_err();
    assert!(matches!(err, RunnerError::Checkpoint(_)));
}

#[test]
fn test_corrupt_checkpoint_is_an_error() {
    let scenario = Scenario::new();
    let checkpoint = scenario.path().join("run_manager.json");
    std::fs::write(&checkpoint, "{ not json").unwrap();

    assert!(
        RunManager::load(&checkpoint, scenario.local_config(1), three_stage_pipeline()).is_err()
    );
    assert!(RunManager::load(
        &scenario.path().join("missing.json"),
        scenario.local_config(1),
        three_stage_pipeline()
    )
    .is_err());
}
