//! Runtime wiring from YAML configuration.
//!
//! Converts a [`CadenceConfig`] into scheduler settings and registers its
//! seed tasks and workflows with running engines.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::error::ConfigError;
use super::types::{CadenceConfig, WorkflowSeed};
use crate::core::schedule::parse_timezone;
use crate::core::task::TaskFilter;
use crate::scheduler::{SchedulerError, SchedulerHandle, SchedulerSettings};
use crate::storage::Storage;
use crate::workflow::{WorkflowEngine, WorkflowError};

/// What [`ConfigBuilder::seed`] registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub tasks_created: usize,
    pub workflows_created: usize,
    /// Names already present in storage, left untouched.
    pub skipped: Vec<String>,
}

/// Builds runtime state from configuration.
pub struct ConfigBuilder;

impl ConfigBuilder {
    /// Scheduler settings, with defaults for everything not configured.
    pub fn scheduler_settings(config: &CadenceConfig) -> Result<SchedulerSettings, ConfigError> {
        let mut settings = SchedulerSettings::default();

        if let Some(tz) = &config.timezone {
            settings.timezone =
                parse_timezone(tz).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        }
        if let Some(retries) = config.default_max_retries {
            settings.default_max_retries = retries;
        }
        if let Some(ms) = config.default_retry_delay_ms {
            settings.default_retry_delay = Duration::from_millis(ms);
        }
        if let Some(limit) = config.max_history_per_task {
            settings.max_history_per_task = limit;
        }
        if let Some(policy) = config.overlap_policy {
            settings.overlap_policy = policy;
        }
        if let Some(secs) = config.shutdown_timeout_secs {
            settings.shutdown_timeout = Duration::from_secs(secs);
        }

        Ok(settings)
    }

    /// Register seed tasks and workflows.
    ///
    /// Entries whose name already exists in storage are skipped, so seeding
    /// a persistent store on every start does not duplicate definitions. A
    /// one-shot task whose time has passed is skipped with a warning.
    pub async fn seed<S: Storage + 'static>(
        config: &CadenceConfig,
        scheduler: &SchedulerHandle<S>,
        workflows: &Arc<WorkflowEngine<S>>,
    ) -> Result<SeedReport, ConfigError> {
        let mut report = SeedReport::default();

        let existing: HashSet<String> = scheduler
            .list_tasks(&TaskFilter::default())
            .await
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?
            .into_iter()
            .map(|t| t.name)
            .collect();

        for task in &config.tasks {
            if existing.contains(&task.name) {
                report.skipped.push(task.name.clone());
                continue;
            }
            match scheduler.schedule_task(task.clone()).await {
                Ok(created) => {
                    tracing::info!(task_id = %created.id, name = %created.name, "Seeded task");
                    report.tasks_created += 1;
                }
                Err(SchedulerError::PastSchedule { at }) => {
                    tracing::warn!(
                        name = %task.name,
                        at = %at,
                        "Skipping one-shot task in the past"
                    );
                    report.skipped.push(task.name.clone());
                }
                Err(e) => {
                    return Err(ConfigError::InvalidTask {
                        name: task.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let existing: HashSet<String> = workflows
            .list_workflows()
            .await
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?
            .into_iter()
            .map(|w| w.name)
            .collect();

        for seed in &config.workflows {
            let result = match seed {
                WorkflowSeed::Template {
                    template,
                    overrides,
                } => {
                    let name = match &overrides.name {
                        Some(name) => Some(name.clone()),
                        None => workflows
                            .list_templates()
                            .iter()
                            .find(|t| t.id == template.as_str())
                            .map(|t| t.name.clone()),
                    };
                    if let Some(name) = name.filter(|n| existing.contains(n)) {
                        report.skipped.push(name);
                        continue;
                    }
                    workflows
                        .create_from_template(template, overrides.clone())
                        .await
                }
                WorkflowSeed::Definition(definition) => {
                    if existing.contains(&definition.name) {
                        report.skipped.push(definition.name.clone());
                        continue;
                    }
                    workflows.create_workflow(definition.clone()).await
                }
            };

            match result {
                Ok(created) => {
                    tracing::info!(
                        workflow_id = %created.id,
                        name = %created.name,
                        "Seeded workflow"
                    );
                    report.workflows_created += 1;
                }
                Err(WorkflowError::TemplateNotFound(name)) => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "unknown workflow template: {}",
                        name
                    )));
                }
                Err(e) => {
                    return Err(ConfigError::InvalidWorkflow {
                        name: seed.name().unwrap_or("template").to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}
