//! YAML configuration parsing.
//!
//! Parses the configuration file and checks everything that can be checked
//! without a running scheduler: timezone, storage, task shapes and
//! schedules, workflow steps and template names.

use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{CadenceConfig, StorageConfig, WorkflowSeed};
use crate::core::schedule::{Schedule, ScheduleError, parse_timezone};
use crate::workflow::find_template;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load and validate configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<CadenceConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_config(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<CadenceConfig, ConfigError> {
        let config: CadenceConfig = serde_yaml::from_str(yaml)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    fn validate_config(config: &CadenceConfig) -> Result<(), ConfigError> {
        let tz = match &config.timezone {
            Some(name) => {
                parse_timezone(name).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?
            }
            None => chrono_tz::Tz::UTC,
        };

        if let StorageConfig::Sqlite { path } = &config.storage
            && path.trim().is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "storage.path cannot be empty".into(),
            ));
        }

        if config.api.port == 0 {
            return Err(ConfigError::InvalidConfig("api.port cannot be zero".into()));
        }

        if config.max_history_per_task == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_history_per_task cannot be zero".into(),
            ));
        }

        let now = Utc::now();
        let mut task_names = HashSet::new();
        for task in &config.tasks {
            let invalid = |message: String| ConfigError::InvalidTask {
                name: task.name.clone(),
                message,
            };

            let (task_type, spec) = task.validate().map_err(|e| invalid(e.to_string()))?;
            match Schedule::parse(task_type, spec, tz, now) {
                // A one-shot time that already passed is handled at seed time
                Ok(_) | Err(ScheduleError::PastSchedule { .. }) => {}
                Err(e) => return Err(invalid(e.to_string())),
            }

            if !task_names.insert(task.name.as_str()) {
                return Err(invalid("duplicate task name".into()));
            }
        }

        let mut workflow_names = HashSet::new();
        for seed in &config.workflows {
            match seed {
                WorkflowSeed::Template {
                    template,
                    overrides,
                } => {
                    let found = find_template(template).ok_or_else(|| {
                        ConfigError::InvalidConfig(format!("unknown workflow template: {}", template))
                    })?;
                    let instance = found.instantiate(overrides.clone());
                    instance.validate().map_err(|e| ConfigError::InvalidWorkflow {
                        name: instance.name.clone(),
                        message: e.to_string(),
                    })?;
                }
                WorkflowSeed::Definition(definition) => {
                    definition.validate().map_err(|e| ConfigError::InvalidWorkflow {
                        name: definition.name.clone(),
                        message: e.to_string(),
                    })?;
                }
            }

            if let Some(name) = seed.name()
                && !workflow_names.insert(name)
            {
                return Err(ConfigError::InvalidWorkflow {
                    name: name.to_string(),
                    message: "duplicate workflow name".into(),
                });
            }
        }

        Ok(())
    }
}
