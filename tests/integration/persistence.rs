//! Persistence and restart integration tests.
//!
//! A "restart" is simulated by shutting the engines down and starting new
//! ones on the same store (or on a reopened SQLite file).

use crate::common::start_engines;

use cadence::storage::{ExecutionStatus, WorkflowRunStatus};
use cadence::testing::ScriptedAction;
use cadence::{
    ActionDispatcher, ConfigBuilder, InMemoryStorage, ScheduleSpec, ScheduledTask,
    SchedulerSettings, SqliteStorage, Storage, TaskConfig, TaskExecution, TaskId, TaskType,
    WorkflowConfig, WorkflowContext, WorkflowExecution, WorkflowStep, YamlLoader,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn dispatcher() -> ActionDispatcher {
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("ok", ScriptedAction::succeeding(json!("ok")));
    dispatcher
}

/// Test: executions left `Running` by a crash are closed out on start.
#[tokio::test]
async fn test_restart_closes_interrupted_executions() {
    let store = Arc::new(InMemoryStorage::new());
    let first =
        start_engines(store.clone(), dispatcher(), None, SchedulerSettings::default()).await;

    let task = first
        .scheduler
        .schedule_task(TaskConfig::new("nightly", TaskType::Cron, "0 3 * * *", "ok"))
        .await
        .unwrap();
    let workflow = first
        .workflows
        .create_workflow(WorkflowConfig::new("wf", vec![WorkflowStep::new("s", "ok")]))
        .await
        .unwrap();
    first.scheduler.shutdown().await;

    // What a crash mid-run leaves behind
    store
        .insert_task_execution(&TaskExecution::start(task.id.clone(), 0, Utc::now()))
        .await
        .unwrap();
    store
        .insert_workflow_execution(&WorkflowExecution::start(
            workflow.id.clone(),
            1,
            WorkflowContext::new(),
            Utc::now(),
        ))
        .await
        .unwrap();

    let second =
        start_engines(store.clone(), dispatcher(), None, SchedulerSettings::default()).await;

    let task_runs = store.list_task_executions(&task.id, 10).await.unwrap();
    assert_eq!(task_runs.len(), 1);
    assert_eq!(task_runs[0].status, ExecutionStatus::Cancelled);
    assert!(task_runs[0].completed_at.is_some());

    let workflow_runs = store.list_workflow_executions(&workflow.id, 10).await.unwrap();
    assert_eq!(workflow_runs[0].status, WorkflowRunStatus::Error);
    assert_eq!(
        workflow_runs[0].error.as_deref(),
        Some("interrupted by restart")
    );

    assert!(second.scheduler.has_trigger(&task.id).await);
    second.scheduler.shutdown().await;
}

/// Test: a one-shot task whose time passed while stopped is disabled on start.
#[tokio::test]
async fn test_restart_disables_missed_once_task() {
    let store = Arc::new(InMemoryStorage::new());
    let now = Utc::now();
    let missed = ScheduledTask {
        id: TaskId::new(),
        name: "missed".into(),
        description: None,
        task_type: TaskType::Once,
        schedule: ScheduleSpec::Millis(now.timestamp_millis() - 60_000),
        action: "ok".into(),
        parameters: Default::default(),
        enabled: true,
        max_retries: 0,
        retry_delay_ms: 1000,
        notify_on_success: false,
        notify_on_error: true,
        created_at: now,
        updated_at: now,
        last_run: None,
        next_run: None,
    };
    store.create_task(&missed).await.unwrap();

    let engines =
        start_engines(store.clone(), dispatcher(), None, SchedulerSettings::default()).await;

    assert!(!engines.scheduler.has_trigger(&missed.id).await);
    let stored = store.get_task(&missed.id).await.unwrap();
    assert!(!stored.enabled);
    assert!(engines.events.names().await.contains(&"task:disabled"));
    assert!(store.list_task_executions(&missed.id, 10).await.unwrap().is_empty());
}

/// Test: tasks, workflows and history survive reopening a SQLite file.
#[tokio::test]
async fn test_sqlite_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cadence.db");

    let (task_id, workflow_id) = {
        let store = Arc::new(SqliteStorage::new(&path).await.unwrap());
        let engines =
            start_engines(store.clone(), dispatcher(), None, SchedulerSettings::default()).await;

        let task = engines
            .scheduler
            .schedule_task(
                TaskConfig::new("heartbeat", TaskType::Interval, 60_000i64, "ok")
                    .with_parameters(json!({ "k": [1, 2] }).as_object().cloned().unwrap()),
            )
            .await
            .unwrap();
        assert!(engines.scheduler.execute_task(&task.id).await.is_success());

        let workflow = engines
            .workflows
            .create_workflow(WorkflowConfig::new(
                "persisted",
                vec![WorkflowStep::new("s", "ok").with_output("out")],
            ))
            .await
            .unwrap();
        engines
            .workflows
            .execute_workflow(&workflow.id, WorkflowContext::new())
            .await
            .unwrap();

        engines.scheduler.shutdown().await;
        store.close().await;
        (task.id, workflow.id)
    };

    let store = Arc::new(SqliteStorage::new(&path).await.unwrap());
    let engines =
        start_engines(store.clone(), dispatcher(), None, SchedulerSettings::default()).await;

    let task = engines.scheduler.get_task(&task_id).await.unwrap();
    assert_eq!(task.name, "heartbeat");
    assert_eq!(task.schedule, ScheduleSpec::Millis(60_000));
    assert_eq!(task.parameters["k"], json!([1, 2]));
    assert!(engines.scheduler.has_trigger(&task_id).await);

    let history = engines
        .scheduler
        .get_task_history(&task_id, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Success);
    assert_eq!(history[0].result, Some(json!("ok")));

    let workflow = engines.workflows.get_workflow(&workflow_id).await.unwrap();
    assert_eq!(workflow.steps[0].output_variable.as_deref(), Some("out"));
    let runs = engines
        .workflows
        .get_workflow_history(&workflow_id, None)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].context.get("out"), Some(&json!("ok")));

    engines.scheduler.shutdown().await;
}

/// Test: history is pruned to the configured limit per task.
#[tokio::test]
async fn test_history_pruned_to_limit() {
    let store = Arc::new(SqliteStorage::in_memory().await.unwrap());
    let settings = SchedulerSettings {
        max_history_per_task: 3,
        ..SchedulerSettings::default()
    };
    let engines = start_engines(store.clone(), dispatcher(), None, settings).await;

    let task = engines
        .scheduler
        .schedule_task(TaskConfig::new("busy", TaskType::Cron, "0 0 1 1 *", "ok"))
        .await
        .unwrap();
    for _ in 0..5 {
        engines.scheduler.execute_task(&task.id).await;
    }

    let history = store.list_task_executions(&task.id, 100).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|e| e.status == ExecutionStatus::Success));
}

/// Test: seeding a persistent store from YAML on every start does not
/// duplicate definitions.
#[tokio::test]
async fn test_yaml_seed_across_restarts() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("seed.db");
    let config_path = dir.path().join("cadence.yaml");
    std::fs::write(
        &config_path,
        format!(
            r#"
storage:
  type: sqlite
  path: {}
tasks:
  - name: nightly
    type: cron
    schedule: "0 3 * * *"
    action: ok
workflows:
  - template: code-quality-check
"#,
            db.display()
        ),
    )
    .unwrap();
    let config = YamlLoader::load_config(&config_path).unwrap();

    for round in 0..2 {
        let store = Arc::new(SqliteStorage::new(&db).await.unwrap());
        let engines =
            start_engines(store.clone(), dispatcher(), None, SchedulerSettings::default()).await;

        let report = ConfigBuilder::seed(&config, &engines.scheduler, &engines.workflows)
            .await
            .unwrap();
        if round == 0 {
            assert_eq!((report.tasks_created, report.workflows_created), (1, 1));
        } else {
            assert_eq!((report.tasks_created, report.workflows_created), (0, 0));
            assert_eq!(report.skipped.len(), 2);
        }

        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
        assert_eq!(store.list_workflows().await.unwrap().len(), 1);

        engines.scheduler.shutdown().await;
        store.close().await;
    }
}
