//! Scheduling integration tests.
//!
//! These tests run real triggers against in-memory storage and verify
//! schedule validation, firing, retries, disabling and deletion.

use crate::common::{start_engines, wait_for_finished_executions, wait_for_running};

use cadence::storage::ExecutionStatus;
use cadence::testing::{FakeCommandRunner, ManualClock, ScriptedAction};
use cadence::{
    ActionDispatcher, Collaborators, ExecutionOutcome, InMemoryStorage, RetryPolicy,
    ScheduleSpec, SchedulerError, SchedulerSettings, Storage, TaskConfig, TaskPatch, TaskType,
};
use chrono::{DateTime, Days, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn params(value: serde_json::Value) -> cadence::Params {
    value.as_object().cloned().unwrap()
}

/// Test: a one-shot schedule at or before now is rejected.
#[tokio::test]
async fn test_once_in_the_past_is_rejected() {
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        ActionDispatcher::new(),
        None,
        SchedulerSettings::default(),
    )
    .await;

    let past = Utc::now().timestamp_millis() - 1_000;
    let result = engines
        .scheduler
        .schedule_task(TaskConfig::new("late", TaskType::Once, past, "command"))
        .await;

    assert!(matches!(result, Err(SchedulerError::PastSchedule { .. })));
    assert!(engines.store.list_tasks().await.unwrap().is_empty());
}

/// Test: intervals below one second are rejected.
#[tokio::test]
async fn test_interval_below_minimum_is_rejected() {
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        ActionDispatcher::new(),
        None,
        SchedulerSettings::default(),
    )
    .await;

    let result = engines
        .scheduler
        .schedule_task(TaskConfig::new("fast", TaskType::Interval, 999i64, "command"))
        .await;

    assert!(matches!(
        result,
        Err(SchedulerError::IntervalTooSmall { interval_ms: 999 })
    ));

    let ok = engines
        .scheduler
        .schedule_task(TaskConfig::new("ok", TaskType::Interval, 1000i64, "command").disabled())
        .await;
    assert!(ok.is_ok());
}

/// Test: a cron task fires at the next tick and records it as last_run.
#[tokio::test]
async fn test_cron_task_fires_on_tick() {
    let runner = Arc::new(FakeCommandRunner::new().respond("echo", 0, "tick\n", ""));
    let dispatcher =
        ActionDispatcher::with_builtins(Collaborators::new().with_commands(runner.clone()));

    // 300ms before a minute boundary
    let tick = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
    let clock = Arc::new(ManualClock::new(tick - chrono::Duration::milliseconds(300)));

    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        Some(clock.clone()),
        SchedulerSettings::default(),
    )
    .await;

    let task = engines
        .scheduler
        .schedule_task(
            TaskConfig::new("every-minute", TaskType::Cron, "* * * * *", "command")
                .with_parameters(params(json!({ "command": "echo", "args": ["tick"] }))),
        )
        .await
        .unwrap();
    assert_eq!(task.next_run, Some(tick));

    let executions = wait_for_finished_executions(
        engines.store.as_ref(),
        &task.id,
        1,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Success);
    assert_eq!(executions[0].result.as_ref().unwrap()["stdout"], "tick\n");
    assert_eq!(runner.calls().len(), 1);

    let stored = engines.store.get_task(&task.id).await.unwrap();
    assert_eq!(stored.last_run, Some(tick));

    engines.scheduler.shutdown().await;
}

/// Test: a one-shot task runs once and then disables itself.
#[tokio::test]
async fn test_once_task_runs_then_disables() {
    let action = ScriptedAction::succeeding(json!("done"));
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("scripted", action.clone());
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let at = Utc::now().timestamp_millis() + 200;
    let task = engines
        .scheduler
        .schedule_task(TaskConfig::new("launch", TaskType::Once, at, "scripted"))
        .await
        .unwrap();

    wait_for_finished_executions(engines.store.as_ref(), &task.id, 1, Duration::from_secs(5))
        .await;

    // The self-disable follows the run
    let start = tokio::time::Instant::now();
    while engines.scheduler.has_trigger(&task.id).await {
        assert!(start.elapsed() < Duration::from_secs(2), "trigger never removed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stored = engines.store.get_task(&task.id).await.unwrap();
    assert!(!stored.enabled);
    assert_eq!(action.calls(), 1);
    assert!(engines.events.names().await.contains(&"task:disabled"));
}

/// Test: an always-failing action with max_retries = N leaves N+1 rows.
#[tokio::test]
async fn test_retries_produce_one_row_per_attempt() {
    let runner = Arc::new(FakeCommandRunner::new().respond("flaky", 2, "", "nope"));
    let dispatcher =
        ActionDispatcher::with_builtins(Collaborators::new().with_commands(runner.clone()));
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let task = engines
        .scheduler
        .schedule_task(
            TaskConfig::new("flaky", TaskType::Cron, "0 0 1 1 *", "command")
                .with_parameters(params(json!({ "command": "flaky" })))
                .with_retry(RetryPolicy::fixed(3, Duration::from_millis(10))),
        )
        .await
        .unwrap();

    let outcome = engines.scheduler.execute_task(&task.id).await;
    assert!(matches!(
        outcome,
        ExecutionOutcome::Error { retry_count: 3, ref error, .. } if error == "flaky exited with code 2: nope"
    ));

    let mut history = engines
        .scheduler
        .get_task_history(&task.id, None)
        .await
        .unwrap();
    history.reverse();
    assert_eq!(history.len(), 4);
    assert_eq!(
        history.iter().map(|e| e.retry_count).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert!(history.iter().all(|e| e.status == ExecutionStatus::Error));
    assert_eq!(runner.calls().len(), 4);
}

/// Test: disabling stops future firings and leaves a running execution alone.
#[tokio::test]
async fn test_disable_stops_trigger_but_not_running_execution() {
    let action = ScriptedAction::succeeding(json!(1)).with_delay(Duration::from_millis(300));
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("slow", action.clone());
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let task = engines
        .scheduler
        .schedule_task(
            TaskConfig::new("pulse", TaskType::Interval, 1000i64, "slow")
                .with_retry(RetryPolicy::none()),
        )
        .await
        .unwrap();
    assert!(engines.scheduler.has_trigger(&task.id).await);

    let handle = engines.scheduler.clone();
    let id = task.id.clone();
    let manual = tokio::spawn(async move { handle.execute_task(&id).await });
    wait_for_running(engines.store.as_ref(), &task.id, Duration::from_secs(2)).await;

    let disabled = engines.scheduler.disable_task(&task.id).await.unwrap();
    assert!(!disabled.enabled);
    assert!(!engines.scheduler.has_trigger(&task.id).await);

    assert!(manual.await.unwrap().is_success());

    // Past the first interval tick: nothing else fired
    tokio::time::sleep(Duration::from_millis(1_300)).await;
    let history = engines.store.list_task_executions(&task.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Success);
    assert_eq!(action.calls(), 1);
}

/// Test: delete removes history and a second delete reports NotFound.
#[tokio::test]
async fn test_delete_cascades_history() {
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("ok", ScriptedAction::succeeding(json!("ok")));
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let task = engines
        .scheduler
        .schedule_task(TaskConfig::new("doomed", TaskType::Cron, "0 0 1 1 *", "ok"))
        .await
        .unwrap();
    engines.scheduler.execute_task(&task.id).await;
    engines.scheduler.execute_task(&task.id).await;
    assert_eq!(
        engines.store.list_task_executions(&task.id, 10).await.unwrap().len(),
        2
    );

    engines.scheduler.delete_task(&task.id).await.unwrap();
    assert!(!engines.scheduler.has_trigger(&task.id).await);
    assert!(
        engines
            .store
            .list_task_executions(&task.id, 10)
            .await
            .unwrap()
            .is_empty()
    );

    let again = engines.scheduler.delete_task(&task.id).await;
    assert!(matches!(again, Err(SchedulerError::NotFound(id)) if id == task.id));
}

/// Test: re-enabling a task restarts its trigger.
#[tokio::test]
async fn test_enable_restarts_trigger() {
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        ActionDispatcher::new(),
        None,
        SchedulerSettings::default(),
    )
    .await;

    let task = engines
        .scheduler
        .schedule_task(TaskConfig::new("idle", TaskType::Cron, "@daily", "command").disabled())
        .await
        .unwrap();
    assert!(!engines.scheduler.has_trigger(&task.id).await);
    assert!(task.next_run.is_none());

    let enabled = engines.scheduler.enable_task(&task.id).await.unwrap();
    assert!(enabled.enabled);
    assert!(enabled.next_run.is_some());
    assert!(engines.scheduler.has_trigger(&task.id).await);

    let stats = engines.scheduler.stats().await.unwrap();
    assert_eq!(stats.total_tasks, 1);
    assert_eq!(stats.enabled_tasks, 1);
    assert_eq!(stats.active_triggers, 1);

    engines.scheduler.shutdown().await;
}

fn next_midnight(after: DateTime<Utc>) -> DateTime<Utc> {
    let day = after.date_naive().checked_add_days(Days::new(1)).unwrap();
    Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap())
}

/// Test: changing an interval task to a daily cron replaces its trigger.
#[tokio::test]
async fn test_schedule_change_replaces_interval_trigger() {
    let action = ScriptedAction::succeeding(json!("tick"));
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("tick", action.clone());
    let engines = start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await;

    let task = engines
        .scheduler
        .schedule_task(TaskConfig::new("ticker", TaskType::Interval, 1_000i64, "tick"))
        .await
        .unwrap();

    let before = Utc::now();
    let updated = engines
        .scheduler
        .update_task(
            &task.id,
            TaskPatch {
                task_type: Some(TaskType::Cron),
                schedule: Some(ScheduleSpec::from("@daily")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let after = Utc::now();
    assert_eq!(updated.task_type, TaskType::Cron);
    assert!(engines.scheduler.has_trigger(&task.id).await);

    // Long enough for the old interval trigger to have fired
    tokio::time::sleep(Duration::from_millis(1_300)).await;

    assert_eq!(action.calls(), 0);
    assert!(engines.store.list_task_executions(&task.id, 10).await.unwrap().is_empty());

    let stored = engines.store.get_task(&task.id).await.unwrap();
    let expected = [next_midnight(before), next_midnight(after)];
    assert!(
        stored.next_run.is_some_and(|at| expected.contains(&at)),
        "next_run {:?} is not the next midnight",
        stored.next_run
    );

    engines.scheduler.shutdown().await;
}
