//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Validating and persisting task definitions
//! - Keeping exactly one runtime trigger per enabled task
//! - Dispatching firings to the execution runner
//! - Recovery of executions interrupted by a previous process
//! - Event emission

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::clock::{Clock, SystemClock};
use super::runner;
use super::trigger::{self, Trigger};
use super::types::{
    DEFAULT_HISTORY_LIMIT, ExecutionOutcome, OverlapPolicy, SchedulerError, SchedulerSettings,
    SchedulerStats,
};
use crate::actions::ActionDispatcher;
use crate::actions::collaborators::{Notification, NotificationSink};
use crate::core::schedule::Schedule;
use crate::core::task::{ScheduledTask, TaskConfig, TaskFilter, TaskPatch};
use crate::core::types::TaskId;
use crate::events::{Event, EventBus};
use crate::storage::{Storage, StorageError, TaskExecution};

/// Builder for the task scheduler.
///
/// # Example
///
/// ```rust,no_run
/// use cadence::{ActionDispatcher, InMemoryStorage, TaskConfig, TaskScheduler, TaskType};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(InMemoryStorage::new());
/// let dispatcher = Arc::new(ActionDispatcher::new());
///
/// let scheduler = TaskScheduler::new(store, dispatcher).start().await?;
/// scheduler
///     .schedule_task(TaskConfig::new("heartbeat", TaskType::Interval, 60_000, "command"))
///     .await?;
/// scheduler.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct TaskScheduler<S: Storage> {
    store: Arc<S>,
    dispatcher: Arc<ActionDispatcher>,
    event_bus: Arc<EventBus>,
    notifier: Option<Arc<dyn NotificationSink>>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl<S: Storage + 'static> TaskScheduler<S> {
    /// Create a scheduler over the given store and dispatcher.
    pub fn new(store: Arc<S>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            event_bus: Arc::new(EventBus::new()),
            notifier: None,
            clock: Arc::new(SystemClock),
            settings: SchedulerSettings::default(),
        }
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Set the sink for success and error notifications.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the runtime settings.
    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Recover interrupted executions, start triggers for every persisted
    /// enabled task and return a handle for controlling the scheduler.
    pub async fn start(self) -> Result<SchedulerHandle<S>, SchedulerError> {
        let inner = Arc::new(Inner {
            store: self.store,
            dispatcher: self.dispatcher,
            event_bus: self.event_bus,
            notifier: self.notifier,
            clock: self.clock,
            settings: self.settings,
            triggers: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
            trigger_seq: AtomicU64::new(0),
            run_seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });

        let cancelled = inner.recover().await?;
        if cancelled > 0 {
            tracing::warn!(count = cancelled, "Marked interrupted task executions as cancelled");
        }
        inner.load_tasks().await?;

        Ok(SchedulerHandle { inner })
    }
}

/// Handle for controlling a started scheduler.
pub struct SchedulerHandle<S: Storage> {
    inner: Arc<Inner<S>>,
}

impl<S: Storage> Clone for SchedulerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Storage + 'static> SchedulerHandle<S> {
    /// Validate, persist and start a new task.
    pub async fn schedule_task(&self, config: TaskConfig) -> Result<ScheduledTask, SchedulerError> {
        let inner = &self.inner;
        let (task_type, spec) = config.validate()?;
        let now = inner.clock.now();
        let schedule = Schedule::parse(task_type, spec, inner.settings.timezone, now)?;

        let task = ScheduledTask {
            id: TaskId::new(),
            name: config.name.clone(),
            description: config.description.clone(),
            task_type,
            schedule: spec.clone(),
            action: config.action.clone(),
            parameters: config.parameters.clone(),
            enabled: config.enabled,
            max_retries: config
                .max_retries
                .unwrap_or(inner.settings.default_max_retries),
            retry_delay_ms: config
                .retry_delay_ms
                .unwrap_or(inner.settings.default_retry_delay.as_millis() as u64),
            notify_on_success: config.notify_on_success,
            notify_on_error: config.notify_on_error,
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: if config.enabled {
                schedule.next_after(now)
            } else {
                None
            },
        };

        inner.store.create_task(&task).await?;
        if task.enabled {
            let mut triggers = inner.triggers.write().await;
            inner.start_trigger(&mut triggers, &task, schedule);
        }

        tracing::info!(
            task_id = %task.id,
            name = %task.name,
            task_type = %task.task_type,
            schedule = %task.schedule,
            "Task scheduled"
        );
        inner
            .event_bus
            .emit(Event::task_scheduled(task.id.clone(), &task.name, task.next_run))
            .await;
        Ok(task)
    }

    /// Apply a partial update.
    ///
    /// A changed type or schedule is validated before anything is touched,
    /// then the old trigger is replaced while holding the registry lock.
    pub async fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<ScheduledTask, SchedulerError> {
        let inner = &self.inner;
        patch.validate()?;
        let mut task = inner.load_task(id).await?;
        let was_enabled = task.enabled;
        let enabled = patch.enabled.unwrap_or(task.enabled);
        let now = inner.clock.now();

        let task_type = patch.task_type.unwrap_or(task.task_type);
        let spec = patch.schedule.clone().unwrap_or_else(|| task.schedule.clone());
        let schedule = if patch.changes_schedule(&task) || (enabled && !was_enabled) {
            Some(Schedule::parse(task_type, &spec, inner.settings.timezone, now)?)
        } else {
            None
        };

        task.apply_fields(&patch);
        task.task_type = task_type;
        task.schedule = spec;
        task.enabled = enabled;
        task.updated_at = now;

        {
            let mut triggers = inner.triggers.write().await;
            if !enabled {
                if let Some(old) = triggers.remove(id) {
                    old.stop();
                }
                task.next_run = None;
                inner.store.update_task(&task).await?;
            } else if let Some(schedule) = schedule {
                task.next_run = schedule.next_after(now);
                inner.store.update_task(&task).await?;
                inner.start_trigger(&mut triggers, &task, schedule);
            } else {
                inner.store.update_task(&task).await?;
            }
        }

        tracing::info!(task_id = %id, enabled, "Task updated");
        inner.event_bus.emit(Event::task_updated(id.clone())).await;
        if was_enabled && !enabled {
            inner.event_bus.emit(Event::task_disabled(id.clone())).await;
        }
        Ok(task)
    }

    /// Start the task's trigger again, revalidating its schedule.
    pub async fn enable_task(&self, id: &TaskId) -> Result<ScheduledTask, SchedulerError> {
        self.update_task(
            id,
            TaskPatch {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    /// Stop the task's trigger and keep its definition.
    ///
    /// An execution already in flight is left to finish.
    pub async fn disable_task(&self, id: &TaskId) -> Result<ScheduledTask, SchedulerError> {
        self.update_task(
            id,
            TaskPatch {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Stop the trigger and delete the task with its history.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        {
            let mut triggers = inner.triggers.write().await;
            if let Some(old) = triggers.remove(id) {
                old.stop();
            }
            inner.store.delete_task(id).await.map_err(|e| match e {
                StorageError::NotFound(_) => SchedulerError::NotFound(id.clone()),
                other => SchedulerError::Storage(other),
            })?;
        }

        tracing::info!(task_id = %id, "Task deleted");
        inner.event_bus.emit(Event::task_deleted(id.clone())).await;
        Ok(())
    }

    /// Get a task by ID.
    pub async fn get_task(&self, id: &TaskId) -> Result<ScheduledTask, SchedulerError> {
        self.inner.load_task(id).await
    }

    /// List tasks in creation order.
    pub async fn list_tasks(
        &self,
        filter: &TaskFilter,
    ) -> Result<Vec<ScheduledTask>, SchedulerError> {
        let tasks = self.inner.store.list_tasks().await?;
        Ok(tasks.into_iter().filter(|t| t.matches(filter)).collect())
    }

    /// Execution history of a task, newest first.
    ///
    /// `limit` defaults to 20.
    pub async fn get_task_history(
        &self,
        id: &TaskId,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecution>, SchedulerError> {
        self.inner.load_task(id).await?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        Ok(self.inner.store.list_task_executions(id, limit).await?)
    }

    /// Run a task now and wait for the outcome.
    ///
    /// Missing and disabled tasks are skipped rather than reported as errors.
    pub async fn execute_task(&self, id: &TaskId) -> ExecutionOutcome {
        let now = self.inner.clock.now();
        match self.inner.fire(id, now).await {
            Some(outcome) => outcome
                .await
                .unwrap_or_else(|_| ExecutionOutcome::skipped("execution was aborted")),
            None => ExecutionOutcome::skipped("task is not runnable"),
        }
    }

    /// Scheduler and execution statistics.
    pub async fn stats(&self) -> Result<SchedulerStats, SchedulerError> {
        let inner = &self.inner;
        let tasks = inner.store.list_tasks().await?;

        let mut stats = SchedulerStats {
            total_tasks: tasks.len() as u64,
            ..Default::default()
        };
        for task in &tasks {
            if task.enabled {
                stats.enabled_tasks += 1;
            }
            *stats
                .tasks_by_type
                .entry(task.task_type.to_string())
                .or_default() += 1;
            *stats.tasks_by_action.entry(task.action.clone()).or_default() += 1;
        }
        stats.active_triggers = inner.triggers.read().await.len() as u64;
        stats.running_executions = inner.running_count().await as u64;
        stats.executions = inner.store.task_execution_stats().await?;
        Ok(stats)
    }

    /// Whether the task currently has a live trigger.
    pub async fn has_trigger(&self, id: &TaskId) -> bool {
        self.inner.triggers.read().await.contains_key(id)
    }

    /// Stop all triggers, cancel pending retries and wait for in-flight
    /// executions up to the configured shutdown timeout.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        {
            let mut triggers = inner.triggers.write().await;
            for (_, trigger) in triggers.drain() {
                trigger.stop();
            }
        }
        inner.await_running().await;
        tracing::info!("Scheduler stopped");
    }
}

/// State shared by the handle, the triggers and the runner.
pub(crate) struct Inner<S: Storage> {
    pub(crate) store: Arc<S>,
    pub(crate) dispatcher: Arc<ActionDispatcher>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) notifier: Option<Arc<dyn NotificationSink>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: SchedulerSettings,
    triggers: RwLock<HashMap<TaskId, Trigger>>,
    #[allow(clippy::type_complexity)]
    running: RwLock<HashMap<u64, (TaskId, JoinHandle<()>)>>,
    trigger_seq: AtomicU64,
    run_seq: AtomicU64,
    pub(crate) shutdown: CancellationToken,
}

impl<S: Storage + 'static> Inner<S> {
    async fn load_task(&self, id: &TaskId) -> Result<ScheduledTask, SchedulerError> {
        self.store.get_task(id).await.map_err(|e| match e {
            StorageError::NotFound(_) => SchedulerError::NotFound(id.clone()),
            other => SchedulerError::Storage(other),
        })
    }

    /// Mark executions left `Running` by a previous process as cancelled.
    async fn recover(&self) -> Result<usize, SchedulerError> {
        let interrupted = self.store.get_running_task_executions().await?;
        let now = self.clock.now();
        let count = interrupted.len();
        for mut execution in interrupted {
            execution.mark_cancelled(now);
            if let Err(e) = self.store.update_task_execution(&execution).await {
                tracing::warn!(
                    task_id = %execution.task_id,
                    execution_id = %execution.execution_id,
                    error = %e,
                    "Failed to cancel interrupted execution"
                );
            }
        }
        Ok(count)
    }

    /// Start triggers for every persisted enabled task.
    async fn load_tasks(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let tasks = self.store.list_tasks().await?;
        let now = self.clock.now();
        let mut triggers = self.triggers.write().await;
        let mut started = 0usize;

        for mut task in tasks.into_iter().filter(|t| t.enabled) {
            match Schedule::parse(task.task_type, &task.schedule, self.settings.timezone, now) {
                Ok(schedule) => {
                    self.start_trigger(&mut triggers, &task, schedule);
                    started += 1;
                }
                Err(crate::core::schedule::ScheduleError::PastSchedule { at }) => {
                    tracing::warn!(
                        task_id = %task.id,
                        name = %task.name,
                        scheduled_for = %at,
                        "One-shot task missed its time while stopped, disabling"
                    );
                    task.enabled = false;
                    task.next_run = None;
                    task.updated_at = now;
                    if let Err(e) = self.store.update_task(&task).await {
                        tracing::warn!(task_id = %task.id, error = %e, "Failed to disable task");
                        continue;
                    }
                    self.event_bus.emit(Event::task_disabled(task.id.clone())).await;
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        error = %e,
                        "Skipping task with invalid schedule"
                    );
                }
            }
        }

        tracing::info!(triggers = started, "Scheduler started");
        Ok(())
    }

    /// Replace the task's trigger. Callers hold the registry lock.
    fn start_trigger(
        self: &Arc<Self>,
        triggers: &mut HashMap<TaskId, Trigger>,
        task: &ScheduledTask,
        schedule: Schedule,
    ) {
        if let Some(old) = triggers.remove(&task.id) {
            old.stop();
        }
        let generation = self.trigger_seq.fetch_add(1, Ordering::Relaxed);
        let trigger = trigger::spawn(self, task.id.clone(), schedule, generation);
        triggers.insert(task.id.clone(), trigger);
    }

    /// Start a run of the task if it exists and is enabled.
    ///
    /// Returns a receiver for the outcome, or `None` when nothing was started.
    pub(crate) async fn fire(
        self: &Arc<Self>,
        task_id: &TaskId,
        fired_at: DateTime<Utc>,
    ) -> Option<oneshot::Receiver<ExecutionOutcome>> {
        if self.shutdown.is_cancelled() {
            tracing::debug!(task_id = %task_id, "Ignoring firing during shutdown");
            return None;
        }

        let task = match self.store.get_task(task_id).await {
            Ok(task) if task.enabled => task,
            Ok(_) => {
                tracing::debug!(task_id = %task_id, "Task is disabled, skipping");
                return None;
            }
            Err(e) => {
                tracing::debug!(task_id = %task_id, error = %e, "Task not loadable, skipping");
                return None;
            }
        };

        let mut running = self.running.write().await;
        running.retain(|_, (_, handle)| !handle.is_finished());

        if self.settings.overlap_policy == OverlapPolicy::Skip
            && running.values().any(|(id, _)| id == task_id)
        {
            tracing::warn!(
                task_id = %task_id,
                name = %task.name,
                "Previous execution still running, skipping firing"
            );
            return None;
        }

        let key = self.run_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = runner::run(&inner, task, fired_at).await;
            let _ = tx.send(outcome);
            inner.running.write().await.remove(&key);
        });
        running.insert(key, (task_id.clone(), handle));
        Some(rx)
    }

    /// Disable a one-shot task after its firing, unless its trigger was
    /// replaced or stopped in the meantime.
    pub(crate) async fn complete_once(&self, task_id: &TaskId, generation: u64) {
        let mut triggers = self.triggers.write().await;
        if !triggers
            .get(task_id)
            .is_some_and(|t| t.generation == generation)
        {
            return;
        }
        triggers.remove(task_id);

        let mut task = match self.store.get_task(task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Failed to load one-shot task");
                return;
            }
        };
        task.enabled = false;
        task.next_run = None;
        task.updated_at = self.clock.now();
        if let Err(e) = self.store.update_task(&task).await {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to disable one-shot task");
            return;
        }
        drop(triggers);

        tracing::info!(task_id = %task_id, "One-shot task fired, disabled");
        self.event_bus.emit(Event::task_disabled(task_id.clone())).await;
    }

    /// Persist a trigger's next fire time unless the trigger was stopped.
    ///
    /// The registry read lock orders this write against enable, disable and
    /// update, which stop the trigger and write the row under the write lock.
    pub(crate) async fn record_next_run(
        &self,
        task_id: &TaskId,
        next_run: Option<DateTime<Utc>>,
        token: &CancellationToken,
    ) {
        let _registry = self.triggers.read().await;
        if token.is_cancelled() {
            return;
        }
        if let Err(e) = self.store.set_next_run(task_id, next_run).await {
            tracing::debug!(task_id = %task_id, error = %e, "Failed to record next run");
        }
    }

    pub(crate) async fn notify(&self, notification: Notification) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let title = notification.title.clone();
        if let Err(e) = notifier.notify(notification).await {
            tracing::warn!(title = %title, error = %e, "Failed to send notification");
        }
    }

    async fn running_count(&self) -> usize {
        let mut running = self.running.write().await;
        running.retain(|_, (_, handle)| !handle.is_finished());
        running.len()
    }

    /// Wait for all running executions to complete with a timeout.
    async fn await_running(&self) {
        let running_count = self.running_count().await;

        if running_count == 0 {
            tracing::info!("No running executions to wait for during shutdown");
            return;
        }

        let timeout = self.settings.shutdown_timeout;
        tracing::info!(
            running = running_count,
            timeout = ?timeout,
            "Graceful shutdown: waiting for running executions"
        );

        let start = tokio::time::Instant::now();
        let deadline = start + timeout;

        loop {
            let remaining = self.running_count().await;
            if remaining == 0 {
                tracing::info!(elapsed = ?start.elapsed(), "All running executions completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    remaining,
                    timeout = ?timeout,
                    "Graceful shutdown timeout exceeded with executions still running"
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Notification data shared by success and error alerts.
pub(crate) fn notification_data(
    task: &ScheduledTask,
    extra: serde_json::Value,
) -> serde_json::Value {
    let mut data = json!({ "task_id": task.id, "name": task.name });
    if let (Some(map), serde_json::Value::Object(extra)) = (data.as_object_mut(), extra) {
        map.extend(extra);
    }
    data
}
