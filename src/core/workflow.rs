//! Workflow definitions.
//!
//! A workflow is an ordered list of [`WorkflowStep`]s. Each step names an
//! action, may read earlier results through `${name}` parameter references
//! and may publish its own result under `output_variable`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::ValidationError;
use super::types::{Params, WorkflowId};

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Params,
    /// Whether a failure aborts the workflow. Absent means critical.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<bool>,
    /// Context key the step's result is stored under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

impl WorkflowStep {
    /// Create a critical step with no parameters.
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            parameters: Params::new(),
            critical: None,
            output_variable: None,
        }
    }

    /// Set the step parameters.
    pub fn with_parameters(mut self, parameters: Params) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set whether a failure aborts the workflow.
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = Some(critical);
        self
    }

    /// Store the step result in the context under `name`.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output_variable = Some(name.into());
        self
    }

    /// Only an explicit `false` makes a step non-critical.
    pub fn is_critical(&self) -> bool {
        self.critical != Some(false)
    }
}

/// Check a step list: at least one step, each with a name and an action.
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<(), ValidationError> {
    if steps.is_empty() {
        return Err(ValidationError::invalid("steps", "at least one step is required"));
    }
    for (i, step) in steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(ValidationError::missing(format!("steps[{}].name", i)));
        }
        if step.action.trim().is_empty() {
            return Err(ValidationError::missing(format!("steps[{}].action", i)));
        }
    }
    Ok(())
}

/// Request to create a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowConfig {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::missing("name"));
        }
        validate_steps(&self.steps)
    }
}

/// A persisted workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-indexed position of the step.
    pub step: usize,
    pub name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn succeeded(step: usize, name: impl Into<String>, result: Value) -> Self {
        Self {
            step,
            name: name.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(step: usize, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step,
            name: name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_critical_defaults_to_true() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "name": "index",
            "action": "reindex-code",
        }))
        .unwrap();
        assert_eq!(step.critical, None);
        assert!(step.is_critical());
        assert!(WorkflowStep::new("a", "b").with_critical(true).is_critical());
        assert!(!WorkflowStep::new("a", "b").with_critical(false).is_critical());
    }

    #[test]
    fn test_config_validation() {
        let empty = WorkflowConfig::new("wf", vec![]);
        assert_eq!(empty.validate().unwrap_err().field, "steps");

        let unnamed = WorkflowConfig::new("", vec![WorkflowStep::new("a", "b")]);
        assert_eq!(unnamed.validate().unwrap_err().field, "name");

        let no_action = WorkflowConfig::new("wf", vec![WorkflowStep::new("a", " ")]);
        assert_eq!(no_action.validate().unwrap_err().field, "steps[0].action");

        let ok = WorkflowConfig::new("wf", vec![WorkflowStep::new("a", "b")]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_step_result_serialization_omits_absent_fields() {
        let ok = serde_json::to_value(StepResult::succeeded(1, "a", json!(5))).unwrap();
        assert_eq!(ok, json!({ "step": 1, "name": "a", "success": true, "result": 5 }));

        let err = serde_json::to_value(StepResult::failed(2, "b", "boom")).unwrap();
        assert_eq!(
            err,
            json!({ "step": 2, "name": "b", "success": false, "error": "boom" })
        );
    }
}
