//! Scheduled task definitions.
//!
//! [`TaskConfig`] is what a caller registers, [`ScheduledTask`] is the
//! persisted definition, and [`TaskPatch`] describes a partial update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::retry::RetryPolicy;
use super::schedule::{ScheduleSpec, TaskType};
use super::types::{Params, TaskId};

/// A definition was rejected before it reached storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Offending field.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl ValidationError {
    /// A required field was missing or empty.
    pub fn missing(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: "is required".to_string(),
        }
    }

    /// A field had an invalid value.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Registration request for a new task.
///
/// Omitted retry settings fall back to the scheduler defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub schedule: Option<ScheduleSpec>,
    pub action: String,
    #[serde(default)]
    pub parameters: Params,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub notify_on_success: bool,
    #[serde(default = "default_true")]
    pub notify_on_error: bool,
}

fn default_true() -> bool {
    true
}

impl TaskConfig {
    /// Start a config with the required fields.
    pub fn new(
        name: impl Into<String>,
        task_type: TaskType,
        schedule: impl Into<ScheduleSpec>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            task_type: Some(task_type),
            schedule: Some(schedule.into()),
            action: action.into(),
            parameters: Params::new(),
            enabled: true,
            max_retries: None,
            retry_delay_ms: None,
            notify_on_success: false,
            notify_on_error: true,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the action parameters.
    pub fn with_parameters(mut self, parameters: Params) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.max_retries = Some(policy.max_retries);
        self.retry_delay_ms = Some(policy.delay.as_millis() as u64);
        self
    }

    /// Set whether a successful run sends a notification.
    pub fn with_notify_on_success(mut self, notify: bool) -> Self {
        self.notify_on_success = notify;
        self
    }

    /// Set whether a final failure sends a notification.
    pub fn with_notify_on_error(mut self, notify: bool) -> Self {
        self.notify_on_error = notify;
        self
    }

    /// Register the task disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check the required fields, returning the type and schedule.
    pub fn validate(&self) -> Result<(TaskType, &ScheduleSpec), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::missing("name"));
        }
        let task_type = self.task_type.ok_or_else(|| ValidationError::missing("type"))?;
        let schedule = self
            .schedule
            .as_ref()
            .ok_or_else(|| ValidationError::missing("schedule"))?;
        if matches!(schedule, ScheduleSpec::Expression(s) if s.trim().is_empty()) {
            return Err(ValidationError::missing("schedule"));
        }
        if self.action.trim().is_empty() {
            return Err(ValidationError::missing("action"));
        }
        Ok((task_type, schedule))
    }
}

/// A persisted task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub schedule: ScheduleSpec,
    pub action: String,
    pub parameters: Params,
    pub enabled: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub notify_on_success: bool,
    pub notify_on_error: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    /// The retry policy for this task.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    /// Check whether the task passes a list filter.
    pub fn matches(&self, filter: &TaskFilter) -> bool {
        filter.enabled.is_none_or(|enabled| self.enabled == enabled)
            && filter.task_type.is_none_or(|t| self.task_type == t)
            && filter
                .action
                .as_deref()
                .is_none_or(|action| self.action == action)
    }

    /// Apply a patch's descriptive fields in place.
    ///
    /// Schedule and enabled changes are applied by the scheduler, which must
    /// also restart or stop the trigger.
    pub(crate) fn apply_fields(&mut self, patch: &TaskPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(action) = &patch.action {
            self.action = action.clone();
        }
        if let Some(parameters) = &patch.parameters {
            self.parameters = parameters.clone();
        }
        if let Some(max_retries) = patch.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(retry_delay_ms) = patch.retry_delay_ms {
            self.retry_delay_ms = retry_delay_ms;
        }
        if let Some(notify) = patch.notify_on_success {
            self.notify_on_success = notify;
        }
        if let Some(notify) = patch.notify_on_error {
            self.notify_on_error = notify;
        }
    }
}

/// Partial update of a task; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub schedule: Option<ScheduleSpec>,
    pub action: Option<String>,
    pub parameters: Option<Params>,
    pub enabled: Option<bool>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub notify_on_success: Option<bool>,
    pub notify_on_error: Option<bool>,
}

impl TaskPatch {
    /// Whether the patch changes when the task fires.
    pub fn changes_schedule(&self, task: &ScheduledTask) -> bool {
        self.task_type.is_some_and(|t| t != task.task_type)
            || self.schedule.as_ref().is_some_and(|s| *s != task.schedule)
    }

    /// Reject patches that blank out required fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ValidationError::missing("name"));
        }
        if self.action.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(ValidationError::missing("action"));
        }
        Ok(())
    }
}

/// Filter for listing tasks; `None` fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFilter {
    pub enabled: Option<bool>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub action: Option<String>,
}
