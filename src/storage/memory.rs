//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{
    ExecutionStats, ExecutionStatus, Storage, StorageError, TaskExecution, WorkflowExecution,
    WorkflowRunStatus,
};
use crate::core::task::ScheduledTask;
use crate::core::types::{TaskId, WorkflowId};
use crate::core::workflow::Workflow;

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    tasks: RwLock<HashMap<TaskId, ScheduledTask>>,
    task_executions: RwLock<Vec<TaskExecution>>,
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    workflow_executions: RwLock<Vec<WorkflowExecution>>,
    task_execution_seq: AtomicI64,
    workflow_execution_seq: AtomicI64,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            task_executions: RwLock::new(Vec::new()),
            workflows: RwLock::new(HashMap::new()),
            workflow_executions: RwLock::new(Vec::new()),
            task_execution_seq: AtomicI64::new(0),
            workflow_execution_seq: AtomicI64::new(0),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_ms(started: DateTime<Utc>, completed: Option<DateTime<Utc>>) -> Option<i64> {
    completed.map(|end| (end - started).num_milliseconds())
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_task(&self, task: &ScheduledTask) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        if tasks.contains_key(&task.id) {
            return Err(StorageError::DuplicateKey(format!("task: {}", task.id)));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<ScheduledTask, StorageError> {
        let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))
    }

    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, StorageError> {
        let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = tasks.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        let slot = tasks
            .get_mut(&task.id)
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", task.id)))?;
        let last_run = slot.last_run;
        *slot = task.clone();
        slot.last_run = last_run;
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError> {
        {
            let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
            tasks
                .remove(id)
                .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))?;
        }
        let mut executions = self
            .task_executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        executions.retain(|e| &e.task_id != id);
        Ok(())
    }

    async fn set_last_run(&self, id: &TaskId, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))?;
        task.last_run = Some(at);
        Ok(())
    }

    async fn set_next_run(
        &self,
        id: &TaskId,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))?;
        task.next_run = at;
        Ok(())
    }

    async fn insert_task_execution(&self, execution: &TaskExecution) -> Result<i64, StorageError> {
        {
            let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
            if !tasks.contains_key(&execution.task_id) {
                return Err(StorageError::NotFound(format!("task: {}", execution.task_id)));
            }
        }
        let mut executions = self
            .task_executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if executions
            .iter()
            .any(|e| e.execution_id == execution.execution_id)
        {
            return Err(StorageError::DuplicateKey(format!(
                "execution: {}",
                execution.execution_id
            )));
        }
        let id = self.task_execution_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut row = execution.clone();
        row.id = id;
        executions.push(row);
        Ok(id)
    }

    async fn update_task_execution(&self, execution: &TaskExecution) -> Result<(), StorageError> {
        let mut executions = self
            .task_executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let row = executions
            .iter_mut()
            .find(|e| e.execution_id == execution.execution_id)
            .ok_or_else(|| {
                StorageError::NotFound(format!("execution: {}", execution.execution_id))
            })?;
        let id = row.id;
        *row = execution.clone();
        row.id = id;
        Ok(())
    }

    async fn list_task_executions(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<TaskExecution>, StorageError> {
        let executions = self
            .task_executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        // Rows are kept in insertion order, so newest first is a reverse scan
        Ok(executions
            .iter()
            .rev()
            .filter(|e| &e.task_id == task_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn prune_task_executions(
        &self,
        task_id: &TaskId,
        keep: usize,
    ) -> Result<u64, StorageError> {
        let mut executions = self
            .task_executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let total = executions.iter().filter(|e| &e.task_id == task_id).count();
        let mut excess = total.saturating_sub(keep);
        let removed = excess as u64;
        executions.retain(|e| {
            if excess > 0 && &e.task_id == task_id {
                excess -= 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn get_running_task_executions(&self) -> Result<Vec<TaskExecution>, StorageError> {
        let executions = self
            .task_executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }

    async fn task_execution_stats(&self) -> Result<ExecutionStats, StorageError> {
        let executions = self
            .task_executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(ExecutionStats::collect(executions.iter().map(|e| {
            (e.status.as_str(), duration_ms(e.started_at, e.completed_at))
        })))
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StorageError> {
        let mut workflows = self
            .workflows
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if workflows.contains_key(&workflow.id) {
            return Err(StorageError::DuplicateKey(format!(
                "workflow: {}",
                workflow.id
            )));
        }
        workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, StorageError> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        workflows
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("workflow: {}", id)))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = workflows.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> Result<(), StorageError> {
        {
            let mut workflows = self
                .workflows
                .write()
                .map_err(|_| StorageError::LockPoisoned)?;
            workflows
                .remove(id)
                .ok_or_else(|| StorageError::NotFound(format!("workflow: {}", id)))?;
        }
        let mut executions = self
            .workflow_executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        executions.retain(|e| &e.workflow_id != id);
        Ok(())
    }

    async fn insert_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<i64, StorageError> {
        let mut executions = self
            .workflow_executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if executions
            .iter()
            .any(|e| e.execution_id == execution.execution_id)
        {
            return Err(StorageError::DuplicateKey(format!(
                "workflow execution: {}",
                execution.execution_id
            )));
        }
        let id = self.workflow_execution_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut row = execution.clone();
        row.id = id;
        executions.push(row);
        Ok(id)
    }

    async fn update_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StorageError> {
        let mut executions = self
            .workflow_executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let row = executions
            .iter_mut()
            .find(|e| e.execution_id == execution.execution_id)
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "workflow execution: {}",
                    execution.execution_id
                ))
            })?;
        let id = row.id;
        *row = execution.clone();
        row.id = id;
        Ok(())
    }

    async fn list_workflow_executions(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StorageError> {
        let executions = self
            .workflow_executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(executions
            .iter()
            .rev()
            .filter(|e| &e.workflow_id == workflow_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_running_workflow_executions(
        &self,
    ) -> Result<Vec<WorkflowExecution>, StorageError> {
        let executions = self
            .workflow_executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(executions
            .iter()
            .filter(|e| e.status == WorkflowRunStatus::Running)
            .cloned()
            .collect())
    }

    async fn workflow_execution_stats(&self) -> Result<ExecutionStats, StorageError> {
        let executions = self
            .workflow_executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(ExecutionStats::collect(executions.iter().map(|e| {
            (e.status.as_str(), duration_ms(e.started_at, e.completed_at))
        })))
    }
}
