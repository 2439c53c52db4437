//! API response types.

use serde::Serialize;

use crate::core::task::ScheduledTask;
use crate::core::workflow::Workflow;
use crate::scheduler::SchedulerStats;
use crate::storage::{TaskExecution, WorkflowExecution};
use crate::workflow::{WorkflowStats, WorkflowTemplate};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Combined engine statistics.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub scheduler: SchedulerStats,
    pub workflows: WorkflowStats,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<ScheduledTask>,
    pub count: usize,
}

impl From<Vec<ScheduledTask>> for TaskListResponse {
    fn from(tasks: Vec<ScheduledTask>) -> Self {
        let count = tasks.len();
        Self { tasks, count }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskHistoryResponse {
    pub executions: Vec<TaskExecution>,
    pub count: usize,
}

impl From<Vec<TaskExecution>> for TaskHistoryResponse {
    fn from(executions: Vec<TaskExecution>) -> Self {
        let count = executions.len();
        Self { executions, count }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<Workflow>,
    pub count: usize,
}

impl From<Vec<Workflow>> for WorkflowListResponse {
    fn from(workflows: Vec<Workflow>) -> Self {
        let count = workflows.len();
        Self { workflows, count }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkflowHistoryResponse {
    pub executions: Vec<WorkflowExecution>,
    pub count: usize,
}

impl From<Vec<WorkflowExecution>> for WorkflowHistoryResponse {
    fn from(executions: Vec<WorkflowExecution>) -> Self {
        let count = executions.len();
        Self { executions, count }
    }
}

/// Template summary; steps are included so clients can preview them.
#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub templates: Vec<WorkflowTemplate>,
    pub count: usize,
}

/// Generic message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
