//! Workflow engine implementation.
//!
//! Steps run strictly in order against the action dispatcher. Each step's
//! parameters are resolved against the execution context first, and its
//! result may be stored back into the context for later steps.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::templates::{TemplateOverrides, WorkflowTemplate, builtin_templates};
use crate::actions::{Action, ActionDispatcher, ActionError};
use crate::core::context::WorkflowContext;
use crate::core::task::ValidationError;
use crate::core::types::{Params, WorkflowId};
use crate::core::workflow::{StepResult, Workflow, WorkflowConfig, WorkflowStep, validate_steps};
use crate::events::{Event, EventBus};
use crate::scheduler::{Clock, DEFAULT_HISTORY_LIMIT, SystemClock};
use crate::storage::{ExecutionStats, Storage, StorageError, WorkflowExecution};

/// Errors that can occur in the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The definition was rejected.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("workflow is disabled: {0}")]
    Disabled(WorkflowId),

    /// A critical step failed; later steps did not run.
    #[error("workflow aborted at step {step} ({step_name}): {error}")]
    Aborted {
        step: usize,
        step_name: String,
        error: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Snapshot of workflow engine state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowStats {
    pub total_workflows: u64,
    pub enabled_workflows: u64,
    pub templates: u64,
    pub executions: ExecutionStats,
}

/// Builder for [`WorkflowEngine`].
pub struct WorkflowEngineBuilder<S: Storage> {
    store: Arc<S>,
    dispatcher: Arc<ActionDispatcher>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl<S: Storage + 'static> WorkflowEngineBuilder<S> {
    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the engine and register it as the `workflow` action.
    pub fn build(self) -> Arc<WorkflowEngine<S>> {
        Arc::new_cyclic(|weak: &Weak<WorkflowEngine<S>>| {
            self.dispatcher.register(
                "workflow",
                Arc::new(WorkflowAction {
                    engine: weak.clone(),
                }),
            );
            WorkflowEngine {
                store: self.store,
                dispatcher: self.dispatcher,
                event_bus: self.event_bus,
                clock: self.clock,
                templates: builtin_templates(),
                workflows: RwLock::new(HashMap::new()),
            }
        })
    }
}

/// Executes ordered multi-step workflows.
pub struct WorkflowEngine<S: Storage> {
    store: Arc<S>,
    dispatcher: Arc<ActionDispatcher>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    templates: Vec<WorkflowTemplate>,
    /// Definitions known to this process.
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl<S: Storage + 'static> WorkflowEngine<S> {
    /// Start building an engine.
    pub fn builder(store: Arc<S>, dispatcher: Arc<ActionDispatcher>) -> WorkflowEngineBuilder<S> {
        WorkflowEngineBuilder {
            store,
            dispatcher,
            event_bus: Arc::new(EventBus::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Load persisted enabled workflows and fail executions a previous
    /// process left running. Returns the number of workflows loaded.
    pub async fn start(&self) -> Result<usize, WorkflowError> {
        let now = self.clock.now();
        for mut execution in self.store.get_running_workflow_executions().await? {
            execution.mark_error("interrupted by restart", now);
            if let Err(e) = self.store.update_workflow_execution(&execution).await {
                tracing::warn!(
                    workflow_id = %execution.workflow_id,
                    execution_id = %execution.execution_id,
                    error = %e,
                    "Failed to mark interrupted workflow execution"
                );
            }
        }

        let mut workflows = self.workflows.write().await;
        for workflow in self.store.list_workflows().await? {
            if workflow.enabled {
                workflows.insert(workflow.id.clone(), workflow);
            }
        }
        tracing::info!(workflows = workflows.len(), "Workflow engine started");
        Ok(workflows.len())
    }

    /// Validate and persist a workflow.
    pub async fn create_workflow(&self, config: WorkflowConfig) -> Result<Workflow, WorkflowError> {
        config.validate()?;
        let now = self.clock.now();
        let workflow = Workflow {
            id: WorkflowId::new(),
            name: config.name,
            description: config.description,
            steps: config.steps,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        self.store.create_workflow(&workflow).await?;
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());

        tracing::info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "Workflow created"
        );
        self.event_bus
            .emit(Event::workflow_created(workflow.id.clone(), &workflow.name))
            .await;
        Ok(workflow)
    }

    /// Instantiate a built-in template.
    pub async fn create_from_template(
        &self,
        template: &str,
        overrides: TemplateOverrides,
    ) -> Result<Workflow, WorkflowError> {
        let config = self
            .templates
            .iter()
            .find(|t| t.id == template)
            .ok_or_else(|| WorkflowError::TemplateNotFound(template.to_string()))?
            .instantiate(overrides);
        self.create_workflow(config).await
    }

    /// Get a workflow by ID.
    pub async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, WorkflowError> {
        if let Some(workflow) = self.workflows.read().await.get(id) {
            return Ok(workflow.clone());
        }
        self.store.get_workflow(id).await.map_err(|e| match e {
            StorageError::NotFound(_) => WorkflowError::NotFound(id.clone()),
            other => WorkflowError::Storage(other),
        })
    }

    /// List workflows in creation order.
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, WorkflowError> {
        Ok(self.store.list_workflows().await?)
    }

    /// Built-in templates.
    pub fn list_templates(&self) -> &[WorkflowTemplate] {
        &self.templates
    }

    /// Delete a workflow and its execution history.
    pub async fn delete_workflow(&self, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.store.delete_workflow(id).await.map_err(|e| match e {
            StorageError::NotFound(_) => WorkflowError::NotFound(id.clone()),
            other => WorkflowError::Storage(other),
        })?;
        self.workflows.write().await.remove(id);

        tracing::info!(workflow_id = %id, "Workflow deleted");
        self.event_bus.emit(Event::workflow_deleted(id.clone())).await;
        Ok(())
    }

    /// Execution history, newest first. `limit` defaults to 20.
    pub async fn get_workflow_history(
        &self,
        id: &WorkflowId,
        limit: Option<usize>,
    ) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        self.get_workflow(id).await?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        Ok(self.store.list_workflow_executions(id, limit).await?)
    }

    pub async fn stats(&self) -> Result<WorkflowStats, WorkflowError> {
        let workflows = self.store.list_workflows().await?;
        Ok(WorkflowStats {
            total_workflows: workflows.len() as u64,
            enabled_workflows: workflows.iter().filter(|w| w.enabled).count() as u64,
            templates: self.templates.len() as u64,
            executions: self.store.workflow_execution_stats().await?,
        })
    }

    /// Run a stored workflow to completion.
    ///
    /// The initial context is copied; the returned execution carries the
    /// final context and per-step results. A failed critical step returns
    /// [`WorkflowError::Aborted`] after the execution is recorded as an error.
    pub async fn execute_workflow(
        &self,
        id: &WorkflowId,
        context: WorkflowContext,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let workflow = self.get_workflow(id).await?;
        if !workflow.enabled {
            return Err(WorkflowError::Disabled(id.clone()));
        }
        self.run(&workflow.id, &workflow.name, &workflow.steps, context, true)
            .await
    }

    /// Run an ad-hoc step list without persisting anything.
    pub async fn execute_inline(
        &self,
        steps: &[WorkflowStep],
        context: WorkflowContext,
    ) -> Result<WorkflowExecution, WorkflowError> {
        validate_steps(steps)?;
        self.run(&WorkflowId::new(), "inline", steps, context, false)
            .await
    }

    async fn run(
        &self,
        workflow_id: &WorkflowId,
        name: &str,
        steps: &[WorkflowStep],
        context: WorkflowContext,
        persist: bool,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let mut execution =
            WorkflowExecution::start(workflow_id.clone(), steps.len(), context, self.clock.now());
        if persist {
            execution.id = self.store.insert_workflow_execution(&execution).await?;
        }
        let started = Instant::now();

        tracing::info!(
            workflow_id = %workflow_id,
            execution_id = %execution.execution_id,
            name = %name,
            steps = steps.len(),
            "Workflow started"
        );
        self.event_bus
            .emit(Event::workflow_started(
                workflow_id.clone(),
                execution.execution_id.clone(),
                steps.len(),
            ))
            .await;

        for (index, step) in steps.iter().enumerate() {
            let number = index + 1;
            execution.current_step = number;
            if persist {
                self.save(&execution).await;
            }

            tracing::debug!(
                execution_id = %execution.execution_id,
                step = number,
                total = steps.len(),
                name = %step.name,
                "Running workflow step"
            );
            let params = execution.context.resolve(&step.parameters);

            match self.dispatcher.execute(&step.action, params).await {
                Ok(result) => {
                    if let Some(var) = &step.output_variable {
                        execution.context.set(var.clone(), result.clone());
                    }
                    execution
                        .results
                        .push(StepResult::succeeded(number, &step.name, result.clone()));
                    self.event_bus
                        .emit(Event::workflow_step_completed(
                            workflow_id.clone(),
                            execution.execution_id.clone(),
                            number,
                            &step.name,
                            result,
                        ))
                        .await;
                }
                Err(e) => {
                    let error = e.to_string();
                    execution
                        .results
                        .push(StepResult::failed(number, &step.name, &error));

                    if step.is_critical() {
                        let aborted = WorkflowError::Aborted {
                            step: number,
                            step_name: step.name.clone(),
                            error: error.clone(),
                        };
                        execution.mark_error(aborted.to_string(), self.clock.now());
                        if persist {
                            self.save(&execution).await;
                        }

                        tracing::error!(
                            workflow_id = %workflow_id,
                            execution_id = %execution.execution_id,
                            step = number,
                            error = %error,
                            "Workflow aborted"
                        );
                        self.event_bus
                            .emit(Event::workflow_error(
                                workflow_id.clone(),
                                execution.execution_id.clone(),
                                number,
                                &error,
                            ))
                            .await;
                        return Err(aborted);
                    }

                    tracing::warn!(
                        execution_id = %execution.execution_id,
                        step = number,
                        error = %error,
                        "Non-critical workflow step failed, continuing"
                    );
                    self.event_bus
                        .emit(Event::workflow_step_failed(
                            workflow_id.clone(),
                            execution.execution_id.clone(),
                            number,
                            &step.name,
                            &error,
                        ))
                        .await;
                }
            }
        }

        execution.mark_success(self.clock.now());
        if persist {
            self.save(&execution).await;
        }

        let duration = started.elapsed();
        tracing::info!(
            workflow_id = %workflow_id,
            execution_id = %execution.execution_id,
            duration_ms = duration.as_millis() as u64,
            "Workflow completed"
        );
        self.event_bus
            .emit(Event::workflow_completed(
                workflow_id.clone(),
                execution.execution_id.clone(),
                execution.results.clone(),
                duration,
            ))
            .await;
        Ok(execution)
    }

    async fn save(&self, execution: &WorkflowExecution) {
        if let Err(e) = self.store.update_workflow_execution(execution).await {
            tracing::warn!(
                execution_id = %execution.execution_id,
                error = %e,
                "Failed to persist workflow execution"
            );
        }
    }
}

/// The `workflow` action: runs a stored workflow (`workflow_id`, optional
/// `context`) or an inline `steps` list.
struct WorkflowAction<S: Storage> {
    engine: Weak<WorkflowEngine<S>>,
}

#[async_trait]
impl<S: Storage + 'static> Action for WorkflowAction<S> {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| ActionError::unavailable("workflow engine"))?;

        let context = match params.get("context") {
            None | Some(Value::Null) => WorkflowContext::new(),
            Some(Value::Object(map)) => WorkflowContext::from(map.clone()),
            Some(_) => return Err(ActionError::invalid_parameter("context", "an object")),
        };

        let execution = if let Some(steps) = params.get("steps") {
            let steps: Vec<WorkflowStep> = serde_json::from_value(steps.clone())
                .map_err(|e| ActionError::ActionExecution(format!("invalid steps: {}", e)))?;
            engine.execute_inline(&steps, context).await
        } else {
            let id = crate::actions::required_str(&params, "workflow_id")?
                .parse::<WorkflowId>()
                .map_err(|_| ActionError::invalid_parameter("workflow_id", "a workflow UUID"))?;
            engine.execute_workflow(&id, context).await
        }
        .map_err(|e| ActionError::ActionExecution(e.to_string()))?;

        serde_json::to_value(&execution).map_err(|e| ActionError::ActionExecution(e.to_string()))
    }
}
