//! Workflow integration tests.
//!
//! These tests run workflows through the engine and through the scheduler's
//! `workflow` action, using the built-in actions with fake collaborators.

use crate::common::start_engines;

use cadence::storage::{ExecutionStatus, WorkflowRunStatus};
use cadence::testing::{FakeAgent, FakeCodeIndexer, RecordingNotificationSink, ScriptedAction};
use cadence::{
    ActionDispatcher, Collaborators, ExecutionOutcome, InMemoryStorage, RetryPolicy,
    SchedulerSettings, Storage, TaskConfig, TaskType, TemplateOverrides, WorkflowConfig,
    WorkflowContext, WorkflowError, WorkflowStep,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn params(value: Value) -> cadence::Params {
    value.as_object().cloned().unwrap()
}

/// Test: integer context values keep their type through `${...}` references.
#[tokio::test]
async fn test_context_reference_dispatches_integer() {
    let recorder = ScriptedAction::succeeding(json!("seen"));
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("record", recorder.clone());
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let workflow = engines
        .workflows
        .create_workflow(WorkflowConfig::new(
            "typed",
            vec![
                WorkflowStep::new("record", "record")
                    .with_parameters(params(json!({ "n": "${x}" }))),
            ],
        ))
        .await
        .unwrap();

    engines
        .workflows
        .execute_workflow(&workflow.id, WorkflowContext::from(params(json!({ "x": 5 }))))
        .await
        .unwrap();

    let seen = recorder.last_params().unwrap();
    assert_eq!(seen["n"], json!(5));
    assert!(seen["n"].is_i64());
}

/// Test: a failing critical step aborts before later steps.
#[tokio::test]
async fn test_critical_failure_aborts() {
    let after = ScriptedAction::succeeding(json!("b"));
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("fail", ScriptedAction::failing("disk full"));
    dispatcher.register("after", after.clone());
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let workflow = engines
        .workflows
        .create_workflow(WorkflowConfig::new(
            "strict",
            vec![WorkflowStep::new("A", "fail"), WorkflowStep::new("B", "after")],
        ))
        .await
        .unwrap();

    let err = engines
        .workflows
        .execute_workflow(&workflow.id, WorkflowContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Aborted { step: 1, .. }));
    assert_eq!(after.calls(), 0);

    let history = engines
        .workflows
        .get_workflow_history(&workflow.id, None)
        .await
        .unwrap();
    assert_eq!(history[0].status, WorkflowRunStatus::Error);
    assert_eq!(history[0].results.len(), 1);
    assert!(history[0].error.as_deref().unwrap().contains("disk full"));
}

/// Test: a failing non-critical step is recorded and the workflow succeeds.
#[tokio::test]
async fn test_non_critical_failure_continues() {
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("fail", ScriptedAction::failing("meh"));
    dispatcher.register("ok", ScriptedAction::succeeding(json!("b")));
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let workflow = engines
        .workflows
        .create_workflow(WorkflowConfig::new(
            "lenient",
            vec![
                WorkflowStep::new("A", "fail").with_critical(false),
                WorkflowStep::new("B", "ok"),
            ],
        ))
        .await
        .unwrap();

    let execution = engines
        .workflows
        .execute_workflow(&workflow.id, WorkflowContext::new())
        .await
        .unwrap();

    assert_eq!(execution.status, WorkflowRunStatus::Success);
    assert_eq!(execution.results.len(), 2);
    assert_eq!(execution.results[0].error.as_deref(), Some("meh"));
    assert_eq!(execution.results[1].result, Some(json!("b")));
}

/// Test: the daily maintenance template runs its steps in declared order.
#[tokio::test]
async fn test_daily_maintenance_template_runs_in_order() {
    let indexer = Arc::new(FakeCodeIndexer::new());
    let agent = Arc::new(FakeAgent::new());
    let sink = Arc::new(RecordingNotificationSink::new());
    let dispatcher = ActionDispatcher::with_builtins(
        Collaborators::new()
            .with_indexer(indexer.clone())
            .with_agent(agent.clone())
            .with_notifier(sink.clone()),
    );
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let workflow = engines
        .workflows
        .create_from_template("daily-maintenance", TemplateOverrides::default())
        .await
        .unwrap();
    let names: Vec<_> = workflow.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Reindex code",
            "Clean up old notifications",
            "Generate health report"
        ]
    );

    let execution = engines
        .workflows
        .execute_workflow(&workflow.id, WorkflowContext::new())
        .await
        .unwrap();

    assert_eq!(
        execution.results.iter().map(|r| r.step).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(execution.results.iter().all(|r| r.success));
    assert_eq!(indexer.reindex_count(), 1);
    assert_eq!(
        sink.cleanups(),
        vec![Duration::from_millis(7 * 24 * 60 * 60 * 1000)]
    );
    assert_eq!(agent.tasks(), vec!["Generate a project health report".to_string()]);
}

/// Test: a scheduled task can launch a workflow, and an aborted workflow
/// fails the task subject to its retry policy.
#[tokio::test]
async fn test_task_runs_workflow_action() {
    let step = ScriptedAction::failing_times(1, json!("recovered"));
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("step", step.clone());
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let workflow = engines
        .workflows
        .create_workflow(WorkflowConfig::new(
            "nested",
            vec![WorkflowStep::new("only", "step").with_output("out")],
        ))
        .await
        .unwrap();

    let task = engines
        .scheduler
        .schedule_task(
            TaskConfig::new("launcher", TaskType::Cron, "0 0 1 1 *", "workflow")
                .with_parameters(params(json!({
                    "workflow_id": workflow.id.to_string(),
                    "context": { "source": "task" },
                })))
                .with_retry(RetryPolicy::fixed(1, Duration::from_millis(10))),
        )
        .await
        .unwrap();

    let outcome = engines.scheduler.execute_task(&task.id).await;
    let ExecutionOutcome::Success {
        retry_count,
        result,
        ..
    } = outcome
    else {
        panic!("expected success, got {:?}", outcome);
    };
    assert_eq!(retry_count, 1);
    assert_eq!(result["status"], "success");
    assert_eq!(result["context"]["out"], "recovered");
    assert_eq!(result["context"]["source"], "task");

    let task_history = engines.store.list_task_executions(&task.id, 10).await.unwrap();
    assert_eq!(task_history[0].status, ExecutionStatus::Success);
    assert_eq!(task_history[1].status, ExecutionStatus::Error);

    let runs = engines
        .workflows
        .get_workflow_history(&workflow.id, None)
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, WorkflowRunStatus::Success);
    assert_eq!(runs[1].status, WorkflowRunStatus::Error);
}

/// Test: the engine emits the full event sequence for a successful run.
#[tokio::test]
async fn test_workflow_event_sequence() {
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("ok", ScriptedAction::succeeding(json!(1)));
    dispatcher.register("fail", ScriptedAction::failing("x"));
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let workflow = engines
        .workflows
        .create_workflow(WorkflowConfig::new(
            "events",
            vec![
                WorkflowStep::new("one", "ok"),
                WorkflowStep::new("two", "fail").with_critical(false),
            ],
        ))
        .await
        .unwrap();
    engines
        .workflows
        .execute_workflow(&workflow.id, WorkflowContext::new())
        .await
        .unwrap();
    engines.workflows.delete_workflow(&workflow.id).await.unwrap();

    assert_eq!(
        engines.events.names().await,
        vec![
            "workflow:created",
            "workflow:started",
            "workflow:step-completed",
            "workflow:step-failed",
            "workflow:completed",
            "workflow:deleted",
        ]
    );
}
