//! Lifecycle events and event handling.
//!
//! This module provides event emission for task and workflow lifecycle
//! events. Every event has a stable wire name (`task:started`,
//! `workflow:step-completed`, ...) returned by [`Event::name`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::types::{ExecutionId, TaskId, WorkflowId};
use crate::core::workflow::StepResult;

/// Lifecycle events emitted by the scheduler and the workflow engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A task was registered and its trigger started.
    TaskScheduled {
        task_id: TaskId,
        name: String,
        next_run: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// An execution attempt has started.
    TaskStarted {
        task_id: TaskId,
        execution_id: ExecutionId,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// An execution attempt succeeded.
    TaskCompleted {
        task_id: TaskId,
        execution_id: ExecutionId,
        duration: Duration,
        result: Value,
        timestamp: DateTime<Utc>,
    },

    /// The last allowed attempt failed.
    TaskError {
        task_id: TaskId,
        execution_id: ExecutionId,
        error: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// An attempt failed and another one will follow after `delay`.
    ///
    /// Emitted immediately before the retry delay.
    TaskRetrying {
        task_id: TaskId,
        /// The attempt that just failed.
        execution_id: ExecutionId,
        error: String,
        /// Retry count of the upcoming attempt.
        retry_count: u32,
        max_retries: u32,
        delay: Duration,
        timestamp: DateTime<Utc>,
    },

    /// A task definition changed.
    TaskUpdated {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },

    /// A task was disabled, explicitly or after its single firing.
    TaskDisabled {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },

    /// A task and its history were deleted.
    TaskDeleted {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },

    WorkflowCreated {
        workflow_id: WorkflowId,
        name: String,
        timestamp: DateTime<Utc>,
    },

    WorkflowStarted {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        total_steps: usize,
        timestamp: DateTime<Utc>,
    },

    WorkflowStepCompleted {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        /// 1-indexed step number.
        step: usize,
        name: String,
        result: Value,
        timestamp: DateTime<Utc>,
    },

    /// A non-critical step failed; the workflow continues.
    WorkflowStepFailed {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        step: usize,
        name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    WorkflowCompleted {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        results: Vec<StepResult>,
        duration: Duration,
        timestamp: DateTime<Utc>,
    },

    /// A critical step failed and the workflow was aborted.
    WorkflowError {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        step: usize,
        error: String,
        timestamp: DateTime<Utc>,
    },

    WorkflowDeleted {
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::TaskScheduled { .. } => "task:scheduled",
            Event::TaskStarted { .. } => "task:started",
            Event::TaskCompleted { .. } => "task:completed",
            Event::TaskError { .. } => "task:error",
            Event::TaskRetrying { .. } => "task:retrying",
            Event::TaskUpdated { .. } => "task:updated",
            Event::TaskDisabled { .. } => "task:disabled",
            Event::TaskDeleted { .. } => "task:deleted",
            Event::WorkflowCreated { .. } => "workflow:created",
            Event::WorkflowStarted { .. } => "workflow:started",
            Event::WorkflowStepCompleted { .. } => "workflow:step-completed",
            Event::WorkflowStepFailed { .. } => "workflow:step-failed",
            Event::WorkflowCompleted { .. } => "workflow:completed",
            Event::WorkflowError { .. } => "workflow:error",
            Event::WorkflowDeleted { .. } => "workflow:deleted",
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::TaskScheduled { timestamp, .. }
            | Event::TaskStarted { timestamp, .. }
            | Event::TaskCompleted { timestamp, .. }
            | Event::TaskError { timestamp, .. }
            | Event::TaskRetrying { timestamp, .. }
            | Event::TaskUpdated { timestamp, .. }
            | Event::TaskDisabled { timestamp, .. }
            | Event::TaskDeleted { timestamp, .. }
            | Event::WorkflowCreated { timestamp, .. }
            | Event::WorkflowStarted { timestamp, .. }
            | Event::WorkflowStepCompleted { timestamp, .. }
            | Event::WorkflowStepFailed { timestamp, .. }
            | Event::WorkflowCompleted { timestamp, .. }
            | Event::WorkflowError { timestamp, .. }
            | Event::WorkflowDeleted { timestamp, .. } => *timestamp,
        }
    }

    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskScheduled { task_id, .. }
            | Event::TaskStarted { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskError { task_id, .. }
            | Event::TaskRetrying { task_id, .. }
            | Event::TaskUpdated { task_id, .. }
            | Event::TaskDisabled { task_id, .. }
            | Event::TaskDeleted { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// The workflow this event concerns, if any.
    pub fn workflow_id(&self) -> Option<&WorkflowId> {
        match self {
            Event::WorkflowCreated { workflow_id, .. }
            | Event::WorkflowStarted { workflow_id, .. }
            | Event::WorkflowStepCompleted { workflow_id, .. }
            | Event::WorkflowStepFailed { workflow_id, .. }
            | Event::WorkflowCompleted { workflow_id, .. }
            | Event::WorkflowError { workflow_id, .. }
            | Event::WorkflowDeleted { workflow_id, .. } => Some(workflow_id),
            _ => None,
        }
    }

    /// Create a TaskScheduled event.
    pub fn task_scheduled(
        task_id: TaskId,
        name: impl Into<String>,
        next_run: Option<DateTime<Utc>>,
    ) -> Self {
        Event::TaskScheduled {
            task_id,
            name: name.into(),
            next_run,
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(task_id: TaskId, execution_id: ExecutionId, retry_count: u32) -> Self {
        Event::TaskStarted {
            task_id,
            execution_id,
            retry_count,
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(
        task_id: TaskId,
        execution_id: ExecutionId,
        duration: Duration,
        result: Value,
    ) -> Self {
        Event::TaskCompleted {
            task_id,
            execution_id,
            duration,
            result,
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskError event.
    pub fn task_error(
        task_id: TaskId,
        execution_id: ExecutionId,
        error: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Event::TaskError {
            task_id,
            execution_id,
            error: error.into(),
            retry_count,
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskRetrying event.
    pub fn task_retrying(
        task_id: TaskId,
        execution_id: ExecutionId,
        error: impl Into<String>,
        retry_count: u32,
        max_retries: u32,
        delay: Duration,
    ) -> Self {
        Event::TaskRetrying {
            task_id,
            execution_id,
            error: error.into(),
            retry_count,
            max_retries,
            delay,
            timestamp: Utc::now(),
        }
    }

    pub fn task_updated(task_id: TaskId) -> Self {
        Event::TaskUpdated {
            task_id,
            timestamp: Utc::now(),
        }
    }

    pub fn task_disabled(task_id: TaskId) -> Self {
        Event::TaskDisabled {
            task_id,
            timestamp: Utc::now(),
        }
    }

    pub fn task_deleted(task_id: TaskId) -> Self {
        Event::TaskDeleted {
            task_id,
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_created(workflow_id: WorkflowId, name: impl Into<String>) -> Self {
        Event::WorkflowCreated {
            workflow_id,
            name: name.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_started(
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        total_steps: usize,
    ) -> Self {
        Event::WorkflowStarted {
            workflow_id,
            execution_id,
            total_steps,
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_step_completed(
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        step: usize,
        name: impl Into<String>,
        result: Value,
    ) -> Self {
        Event::WorkflowStepCompleted {
            workflow_id,
            execution_id,
            step,
            name: name.into(),
            result,
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_step_failed(
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        step: usize,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Event::WorkflowStepFailed {
            workflow_id,
            execution_id,
            step,
            name: name.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_completed(
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        results: Vec<StepResult>,
        duration: Duration,
    ) -> Self {
        Event::WorkflowCompleted {
            workflow_id,
            execution_id,
            results,
            duration,
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_error(
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        step: usize,
        error: impl Into<String>,
    ) -> Self {
        Event::WorkflowError {
            workflow_id,
            execution_id,
            step,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_deleted(workflow_id: WorkflowId) -> Self {
        Event::WorkflowDeleted {
            workflow_id,
            timestamp: Utc::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
