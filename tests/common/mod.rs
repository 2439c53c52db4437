//! Common test utilities shared across integration tests.

use cadence::testing::RecordingHandler;
use cadence::{
    ActionDispatcher, Clock, EventBus, SchedulerHandle, SchedulerSettings, Storage, SystemClock,
    TaskExecution, TaskId, TaskScheduler, WorkflowEngine,
};
use std::sync::Arc;
use std::time::Duration;

/// A scheduler and workflow engine sharing one store, dispatcher and bus.
pub struct Engines<S: Storage + 'static> {
    pub store: Arc<S>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub events: Arc<RecordingHandler>,
    pub scheduler: SchedulerHandle<S>,
    pub workflows: Arc<WorkflowEngine<S>>,
}

/// Start both engines on `store` with `dispatcher`.
pub async fn start_engines<S: Storage + 'static>(
    store: Arc<S>,
    dispatcher: ActionDispatcher,
    clock: Option<Arc<dyn Clock>>,
    settings: SchedulerSettings,
) -> Engines<S> {
    let dispatcher = Arc::new(dispatcher);
    let bus = Arc::new(EventBus::new());
    let events = RecordingHandler::new();
    bus.register(events.clone()).await;
    let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));

    let workflows = WorkflowEngine::builder(store.clone(), dispatcher.clone())
        .with_event_bus(bus.clone())
        .with_clock(clock.clone())
        .build();
    workflows.start().await.unwrap();

    let scheduler = TaskScheduler::new(store.clone(), dispatcher.clone())
        .with_event_bus(bus)
        .with_clock(clock)
        .with_settings(settings)
        .start()
        .await
        .unwrap();

    Engines {
        store,
        dispatcher,
        events,
        scheduler,
        workflows,
    }
}

/// Wait until a task has at least `count` finished executions, polling
/// storage. Returns them newest first.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_finished_executions(
    storage: &dyn Storage,
    task_id: &TaskId,
    count: usize,
    timeout: Duration,
) -> Vec<TaskExecution> {
    let start = tokio::time::Instant::now();
    loop {
        let executions = storage.list_task_executions(task_id, 100).await.unwrap();
        let finished = executions
            .iter()
            .filter(|e| e.completed_at.is_some())
            .count();
        if finished >= count {
            return executions;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} finished executions of {}, have {}",
                count, task_id, finished
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until any execution of the task is recorded as running.
pub async fn wait_for_running(storage: &dyn Storage, task_id: &TaskId, timeout: Duration) {
    let start = tokio::time::Instant::now();
    loop {
        let executions = storage.list_task_executions(task_id, 100).await.unwrap();
        if executions.iter().any(|e| e.completed_at.is_none()) {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for a running execution of {}", task_id);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
