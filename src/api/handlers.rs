//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::context::WorkflowContext;
use crate::core::task::{ScheduledTask, TaskConfig, TaskFilter, TaskPatch};
use crate::core::types::{Params, TaskId, WorkflowId};
use crate::core::workflow::{Workflow, WorkflowConfig};
use crate::scheduler::{ExecutionOutcome, SchedulerHandle};
use crate::storage::{Storage, WorkflowExecution};
use crate::workflow::{TemplateOverrides, WorkflowEngine};

use super::errors::ApiError;
use super::responses::{
    HealthResponse, MessageResponse, StatsResponse, TaskHistoryResponse, TaskListResponse,
    TemplateListResponse, WorkflowHistoryResponse, WorkflowListResponse,
};

/// Shared application state for API handlers.
pub struct ApiState<S: Storage> {
    pub scheduler: SchedulerHandle<S>,
    pub workflows: Arc<WorkflowEngine<S>>,
}

impl<S: Storage> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            workflows: Arc::clone(&self.workflows),
        }
    }
}

/// Query parameters for history endpoints.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Body of `POST /api/workflows/from-template`.
#[derive(Debug, Deserialize)]
pub struct FromTemplateRequest {
    pub template: String,
    #[serde(flatten)]
    pub overrides: TemplateOverrides,
}

/// Body of `POST /api/workflows/{id}/execute`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteWorkflowRequest {
    pub context: Params,
}

fn task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("invalid task id: {}", raw)))
}

fn workflow_id(raw: &str) -> Result<WorkflowId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("invalid workflow id: {}", raw)))
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

pub async fn stats<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(StatsResponse {
        scheduler: state.scheduler.stats().await?,
        workflows: state.workflows.stats().await?,
    }))
}

// Tasks

pub async fn list_tasks<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let tasks = state.scheduler.list_tasks(&filter).await?;
    Ok(Json(tasks.into()))
}

pub async fn schedule_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Json(config): Json<TaskConfig>,
) -> Result<(StatusCode, Json<ScheduledTask>), ApiError> {
    let task = state.scheduler.schedule_task(config).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let task = state.scheduler.get_task(&task_id(&id)?).await?;
    Ok(Json(task))
}

pub async fn update_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let task = state.scheduler.update_task(&task_id(&id)?, patch).await?;
    Ok(Json(task))
}

pub async fn delete_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.scheduler.delete_task(&task_id(&id)?).await?;
    Ok(Json(MessageResponse {
        message: format!("task '{}' deleted", id),
    }))
}

pub async fn enable_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let task = state.scheduler.enable_task(&task_id(&id)?).await?;
    Ok(Json(task))
}

pub async fn disable_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let task = state.scheduler.disable_task(&task_id(&id)?).await?;
    Ok(Json(task))
}

/// Run a task now and wait for the outcome.
pub async fn run_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionOutcome>, ApiError> {
    let id = task_id(&id)?;
    // Distinguish a missing task from one that is merely disabled
    state.scheduler.get_task(&id).await?;
    Ok(Json(state.scheduler.execute_task(&id).await))
}

pub async fn task_history<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<TaskHistoryResponse>, ApiError> {
    let history = state
        .scheduler
        .get_task_history(&task_id(&id)?, query.limit)
        .await?;
    Ok(Json(history.into()))
}

// Workflows

pub async fn list_workflows<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<WorkflowListResponse>, ApiError> {
    let workflows = state.workflows.list_workflows().await?;
    Ok(Json(workflows.into()))
}

pub async fn create_workflow<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Json(config): Json<WorkflowConfig>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let workflow = state.workflows.create_workflow(config).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn create_from_template<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Json(request): Json<FromTemplateRequest>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let workflow = state
        .workflows
        .create_from_template(&request.template, request.overrides)
        .await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn get_workflow<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let workflow = state.workflows.get_workflow(&workflow_id(&id)?).await?;
    Ok(Json(workflow))
}

pub async fn delete_workflow<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.workflows.delete_workflow(&workflow_id(&id)?).await?;
    Ok(Json(MessageResponse {
        message: format!("workflow '{}' deleted", id),
    }))
}

/// Execute a workflow and wait for it to finish.
pub async fn execute_workflow<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let execution = state
        .workflows
        .execute_workflow(&workflow_id(&id)?, WorkflowContext::from(request.context))
        .await?;
    Ok(Json(execution))
}

pub async fn workflow_history<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<WorkflowHistoryResponse>, ApiError> {
    let history = state
        .workflows
        .get_workflow_history(&workflow_id(&id)?, query.limit)
        .await?;
    Ok(Json(history.into()))
}

pub async fn list_templates<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Json<TemplateListResponse> {
    let templates = state.workflows.list_templates().to_vec();
    let count = templates.len();
    Json(TemplateListResponse { templates, count })
}
