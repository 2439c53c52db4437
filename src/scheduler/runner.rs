//! Execution runner.
//!
//! Runs one logical firing of a task: every attempt gets its own history
//! row, failed attempts are retried after the task's fixed delay, and only
//! the final outcome raises `task:error` and the error notification.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;

use super::engine::{Inner, notification_data};
use super::types::ExecutionOutcome;
use crate::actions::collaborators::{Notification, NotificationPriority};
use crate::core::retry::RetryState;
use crate::core::task::ScheduledTask;
use crate::events::Event;
use crate::storage::{Storage, TaskExecution};

/// Drive the retry state machine for one firing of `task`.
pub(crate) async fn run<S: Storage + 'static>(
    inner: &Arc<Inner<S>>,
    task: ScheduledTask,
    fired_at: DateTime<Utc>,
) -> ExecutionOutcome {
    let policy = task.retry_policy();
    let mut state = RetryState::Pending;

    loop {
        state = state.start();
        let retry_count = state.retry_count();
        let mut execution = TaskExecution::start(task.id.clone(), retry_count, inner.clock.now());

        match inner.store.insert_task_execution(&execution).await {
            Ok(id) => execution.id = id,
            Err(e) => tracing::warn!(
                task_id = %task.id,
                execution_id = %execution.execution_id,
                error = %e,
                "Failed to record execution start"
            ),
        }

        let last_run = if retry_count == 0 {
            fired_at
        } else {
            execution.started_at
        };
        if let Err(e) = inner.store.set_last_run(&task.id, last_run).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to record last run");
        }

        tracing::info!(
            task_id = %task.id,
            execution_id = %execution.execution_id,
            action = %task.action,
            retry_count,
            "Task execution started"
        );
        inner
            .event_bus
            .emit(Event::task_started(
                task.id.clone(),
                execution.execution_id.clone(),
                retry_count,
            ))
            .await;

        let started = Instant::now();
        let result = inner
            .dispatcher
            .execute(&task.action, task.parameters.clone())
            .await;
        let duration = started.elapsed();

        match result {
            Ok(value) => {
                state = state.succeed();
                execution.mark_success(value.clone(), inner.clock.now());
                finish_attempt(inner, &task, &execution).await;

                tracing::info!(
                    task_id = %task.id,
                    execution_id = %execution.execution_id,
                    duration_ms = duration.as_millis() as u64,
                    "Task execution completed"
                );
                inner
                    .event_bus
                    .emit(Event::task_completed(
                        task.id.clone(),
                        execution.execution_id.clone(),
                        duration,
                        value.clone(),
                    ))
                    .await;

                if task.notify_on_success {
                    inner
                        .notify(Notification {
                            priority: NotificationPriority::Success,
                            category: "task".to_string(),
                            title: format!("Task completed: {}", task.name),
                            message: format!(
                                "Task '{}' completed in {}ms",
                                task.name,
                                duration.as_millis()
                            ),
                            data: notification_data(
                                &task,
                                json!({
                                    "execution_id": execution.execution_id,
                                    "duration": duration.as_millis() as u64,
                                    "result": value,
                                }),
                            ),
                        })
                        .await;
                }

                return ExecutionOutcome::Success {
                    execution_id: execution.execution_id,
                    retry_count: state.retry_count(),
                    result: value,
                };
            }
            Err(e) => {
                let error = e.to_string();
                execution.mark_error(&error, inner.clock.now());
                finish_attempt(inner, &task, &execution).await;
                state = state.fail(&policy);

                if let RetryState::Retrying { retry_count: next } = state {
                    tracing::warn!(
                        task_id = %task.id,
                        execution_id = %execution.execution_id,
                        error = %error,
                        retry = next,
                        max_retries = policy.max_retries,
                        "Task execution failed, retrying"
                    );
                    inner
                        .event_bus
                        .emit(Event::task_retrying(
                            task.id.clone(),
                            execution.execution_id.clone(),
                            &error,
                            next,
                            policy.max_retries,
                            policy.delay,
                        ))
                        .await;

                    tokio::select! {
                        _ = inner.shutdown.cancelled() => {
                            tracing::info!(task_id = %task.id, "Retry cancelled by shutdown");
                            return ExecutionOutcome::Cancelled {
                                retry_count: next,
                                reason: "scheduler shutting down".to_string(),
                            };
                        }
                        _ = tokio::time::sleep(policy.delay) => {}
                    }

                    match inner.store.get_task(&task.id).await {
                        Ok(current) if current.enabled => continue,
                        Ok(_) => {
                            tracing::info!(task_id = %task.id, "Task disabled, abandoning retries");
                            return ExecutionOutcome::Cancelled {
                                retry_count: next,
                                reason: "task was disabled".to_string(),
                            };
                        }
                        Err(e) => {
                            tracing::info!(
                                task_id = %task.id,
                                error = %e,
                                "Task gone, abandoning retries"
                            );
                            return ExecutionOutcome::Cancelled {
                                retry_count: next,
                                reason: "task was deleted".to_string(),
                            };
                        }
                    }
                }

                tracing::error!(
                    task_id = %task.id,
                    execution_id = %execution.execution_id,
                    error = %error,
                    retry_count,
                    "Task execution failed"
                );
                inner
                    .event_bus
                    .emit(Event::task_error(
                        task.id.clone(),
                        execution.execution_id.clone(),
                        &error,
                        retry_count,
                    ))
                    .await;

                if task.notify_on_error {
                    inner
                        .notify(Notification {
                            priority: NotificationPriority::Error,
                            category: "task".to_string(),
                            title: format!("Task failed: {}", task.name),
                            message: error.clone(),
                            data: notification_data(
                                &task,
                                json!({
                                    "execution_id": execution.execution_id,
                                    "error": error,
                                    "retry_count": retry_count,
                                }),
                            ),
                        })
                        .await;
                }

                return ExecutionOutcome::Error {
                    execution_id: execution.execution_id,
                    retry_count,
                    error,
                };
            }
        }
    }
}

/// Persist the finished attempt and trim old history.
async fn finish_attempt<S: Storage>(
    inner: &Inner<S>,
    task: &ScheduledTask,
    execution: &TaskExecution,
) {
    if let Err(e) = inner.store.update_task_execution(execution).await {
        tracing::warn!(
            task_id = %task.id,
            execution_id = %execution.execution_id,
            error = %e,
            "Failed to record execution result"
        );
    }

    match inner
        .store
        .prune_task_executions(&task.id, inner.settings.max_history_per_task)
        .await
    {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(task_id = %task.id, removed, "Pruned execution history"),
        Err(e) => {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to prune execution history")
        }
    }
}
