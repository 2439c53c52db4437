//! Storage abstraction for task and workflow definitions and their history.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::core::context::WorkflowContext;
use crate::core::task::ScheduledTask;
use crate::core::types::{ExecutionId, TaskId, WorkflowId};
use crate::core::workflow::{StepResult, Workflow};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Status of one task execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The attempt is executing.
    Running,
    /// The action returned a result.
    Success,
    /// The action failed.
    Error,
    /// The process stopped before the attempt finished.
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "success" => Some(ExecutionStatus::Success),
            "error" => Some(ExecutionStatus::Error),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowRunStatus {
    Running,
    Success,
    Error,
}

impl WorkflowRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowRunStatus::Running => "running",
            WorkflowRunStatus::Success => "success",
            WorkflowRunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(WorkflowRunStatus::Running),
            "success" => Some(WorkflowRunStatus::Success),
            "error" => Some(WorkflowRunStatus::Error),
            _ => None,
        }
    }
}

/// One execution attempt of a scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Store-assigned sequence number (0 until inserted).
    pub id: i64,
    /// Task the attempt belongs to.
    pub task_id: TaskId,
    /// Unique identifier of this attempt.
    pub execution_id: ExecutionId,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempt status.
    pub status: ExecutionStatus,
    /// Action result on success.
    pub result: Option<Value>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Zero-based attempt number within the run.
    pub retry_count: u32,
}

impl TaskExecution {
    /// Create a `Running` attempt.
    pub fn start(task_id: TaskId, retry_count: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            task_id,
            execution_id: ExecutionId::new(),
            started_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            result: None,
            error: None,
            retry_count,
        }
    }

    /// Mark the attempt as succeeded.
    pub fn mark_success(&mut self, result: Value, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Success;
        self.result = Some(result);
        self.completed_at = Some(at);
    }

    /// Mark the attempt as failed.
    pub fn mark_error(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Error;
        self.error = Some(error.into());
        self.completed_at = Some(at);
    }

    /// Mark the attempt as cancelled.
    pub fn mark_cancelled(&mut self, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(at);
    }

    /// Wall-clock duration, once finished.
    pub fn duration(&self) -> Option<Duration> {
        self.completed_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}

/// One execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Store-assigned sequence number (0 until inserted).
    pub id: i64,
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: WorkflowRunStatus,
    /// 1-indexed step in progress; 0 before the first step starts.
    pub current_step: usize,
    pub total_steps: usize,
    pub context: WorkflowContext,
    pub results: Vec<StepResult>,
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Create a `Running` execution.
    pub fn start(
        workflow_id: WorkflowId,
        total_steps: usize,
        context: WorkflowContext,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            workflow_id,
            execution_id: ExecutionId::new(),
            started_at,
            completed_at: None,
            status: WorkflowRunStatus::Running,
            current_step: 0,
            total_steps,
            context,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn mark_success(&mut self, at: DateTime<Utc>) {
        self.status = WorkflowRunStatus::Success;
        self.completed_at = Some(at);
    }

    pub fn mark_error(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = WorkflowRunStatus::Error;
        self.error = Some(error.into());
        self.completed_at = Some(at);
    }

    pub fn duration(&self) -> Option<Duration> {
        self.completed_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}

/// Aggregate counts over an execution table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: u64,
    pub running: u64,
    pub success: u64,
    pub error: u64,
    pub cancelled: u64,
    /// Mean duration of finished executions.
    pub average_duration_ms: Option<f64>,
}

impl ExecutionStats {
    /// Fold a sequence of `(status, duration_ms)` pairs.
    pub(crate) fn collect<'a>(rows: impl IntoIterator<Item = (&'a str, Option<i64>)>) -> Self {
        let mut stats = ExecutionStats::default();
        let mut total_ms = 0i64;
        let mut finished = 0i64;
        for (status, duration_ms) in rows {
            stats.total += 1;
            match status {
                "running" => stats.running += 1,
                "success" => stats.success += 1,
                "error" => stats.error += 1,
                "cancelled" => stats.cancelled += 1,
                _ => {}
            }
            if let Some(ms) = duration_ms {
                total_ms += ms;
                finished += 1;
            }
        }
        if finished > 0 {
            stats.average_duration_ms = Some(total_ms as f64 / finished as f64);
        }
        stats
    }
}

/// Storage trait for persisting scheduler and workflow state.
#[async_trait]
pub trait Storage: Send + Sync {
    // Task operations

    /// Save a new task definition.
    async fn create_task(&self, task: &ScheduledTask) -> Result<(), StorageError>;

    /// Get a task by ID.
    async fn get_task(&self, id: &TaskId) -> Result<ScheduledTask, StorageError>;

    /// List all tasks ordered by creation time.
    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, StorageError>;

    /// Replace a task definition.
    ///
    /// The stored `last_run` is kept as is; only `set_last_run` writes it.
    async fn update_task(&self, task: &ScheduledTask) -> Result<(), StorageError>;

    /// Delete a task and all of its executions.
    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError>;

    /// Record the tick time of the latest firing.
    async fn set_last_run(&self, id: &TaskId, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Record the next planned firing.
    async fn set_next_run(
        &self,
        id: &TaskId,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    // Task execution operations

    /// Insert an execution attempt, returning its sequence number.
    async fn insert_task_execution(&self, execution: &TaskExecution) -> Result<i64, StorageError>;

    /// Update an execution attempt, matched by `execution_id`.
    async fn update_task_execution(&self, execution: &TaskExecution) -> Result<(), StorageError>;

    /// List executions for a task, newest first.
    /// Returns at most `limit` executions.
    async fn list_task_executions(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<TaskExecution>, StorageError>;

    /// Delete all but the newest `keep` executions of a task.
    /// Returns the number of rows removed.
    async fn prune_task_executions(&self, task_id: &TaskId, keep: usize)
    -> Result<u64, StorageError>;

    /// Get every execution still marked `Running`.
    async fn get_running_task_executions(&self) -> Result<Vec<TaskExecution>, StorageError>;

    /// Aggregate counts over all task executions.
    async fn task_execution_stats(&self) -> Result<ExecutionStats, StorageError>;

    // Workflow operations

    /// Save a new workflow definition.
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StorageError>;

    /// Get a workflow by ID.
    async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, StorageError>;

    /// List all workflows ordered by creation time.
    async fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError>;

    /// Delete a workflow and all of its executions.
    async fn delete_workflow(&self, id: &WorkflowId) -> Result<(), StorageError>;

    // Workflow execution operations

    /// Insert a workflow execution, returning its sequence number.
    async fn insert_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<i64, StorageError>;

    /// Update a workflow execution, matched by `execution_id`.
    async fn update_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StorageError>;

    /// List executions for a workflow, newest first.
    async fn list_workflow_executions(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StorageError>;

    /// Get every workflow execution still marked `Running`.
    async fn get_running_workflow_executions(
        &self,
    ) -> Result<Vec<WorkflowExecution>, StorageError>;

    /// Aggregate counts over all workflow executions.
    async fn workflow_execution_stats(&self) -> Result<ExecutionStats, StorageError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_strings() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Error,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_stats_collect() {
        let stats = ExecutionStats::collect([
            ("success", Some(100)),
            ("error", Some(300)),
            ("running", None),
        ]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.average_duration_ms, Some(200.0));
    }

    #[test]
    fn test_execution_duration() {
        let start = Utc::now();
        let mut exec = TaskExecution::start(TaskId::new(), 0, start);
        assert_eq!(exec.duration(), None);
        exec.mark_success(Value::Null, start + chrono::Duration::milliseconds(250));
        assert_eq!(exec.duration(), Some(Duration::from_millis(250)));
    }
}
