//! Built-in workflow templates.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::actions::builtin::DEFAULT_CLEANUP_AGE_MS;
use crate::core::types::Params;
use crate::core::workflow::{WorkflowConfig, WorkflowStep};

/// A named preset step list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowTemplate {
    /// Lookup key, e.g. `daily-maintenance`.
    pub id: &'static str,
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
}

/// Replacements applied when instantiating a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOverrides {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<WorkflowStep>>,
}

impl WorkflowTemplate {
    /// Build a concrete workflow config, applying overrides.
    pub fn instantiate(&self, overrides: TemplateOverrides) -> WorkflowConfig {
        WorkflowConfig {
            name: overrides.name.unwrap_or_else(|| self.name.clone()),
            description: Some(
                overrides
                    .description
                    .unwrap_or_else(|| self.description.clone()),
            ),
            steps: overrides.steps.unwrap_or_else(|| self.steps.clone()),
        }
    }
}

fn params(value: serde_json::Value) -> Params {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Params::new(),
    }
}

fn agent_step(name: &str, task: &str) -> WorkflowStep {
    WorkflowStep::new(name, "autonomous-task").with_parameters(params(json!({ "task": task })))
}

/// Every built-in template, in a stable order.
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate {
            id: "daily-maintenance",
            name: "Daily Maintenance".to_string(),
            description: "Daily project maintenance".to_string(),
            steps: vec![
                WorkflowStep::new("Reindex code", "reindex-code"),
                WorkflowStep::new("Clean up old notifications", "cleanup-notifications")
                    .with_parameters(params(json!({ "older_than_ms": DEFAULT_CLEANUP_AGE_MS }))),
                agent_step("Generate health report", "Generate a project health report"),
            ],
        },
        WorkflowTemplate {
            id: "code-quality-check",
            name: "Code Quality Check".to_string(),
            description: "Analyze and document the project's code".to_string(),
            steps: vec![
                WorkflowStep::new("Find undocumented files", "find-undocumented"),
                WorkflowStep::new("Generate missing documentation", "generate-docs")
                    .with_parameters(params(json!({ "auto_fix": true }))),
                WorkflowStep::new("Find complex functions", "find-complex-functions")
                    .with_parameters(params(json!({ "threshold": 20 }))),
                WorkflowStep::new("Notify results", "notify-results"),
            ],
        },
        WorkflowTemplate {
            id: "backup-project",
            name: "Project Backup".to_string(),
            description: "Create a full project backup".to_string(),
            steps: vec![
                WorkflowStep::new("Create backup commit", "git-commit")
                    .with_parameters(params(json!({ "message": "Automatic backup" }))),
                WorkflowStep::new("Generate full documentation", "generate-project-docs"),
                WorkflowStep::new("Compress files", "compress-files")
                    .with_parameters(params(json!({ "output": "backup.zip" }))),
            ],
        },
        WorkflowTemplate {
            id: "onboarding-new-developer",
            name: "New Developer Onboarding".to_string(),
            description: "Prepare documentation and resources for a new developer".to_string(),
            steps: vec![
                WorkflowStep::new("Generate project documentation", "generate-project-docs"),
                agent_step(
                    "Create quick start guide",
                    "Create a QUICK_START.md file with instructions for setting up the project",
                ),
                agent_step(
                    "List dependencies and requirements",
                    "Document every dependency and system requirement",
                ),
                agent_step(
                    "Create architecture guide",
                    "Create an ARCHITECTURE.md document explaining the system architecture",
                ),
            ],
        },
    ]
}

/// Look up a built-in template by id.
pub fn find_template(id: &str) -> Option<WorkflowTemplate> {
    builtin_templates().into_iter().find(|t| t.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_ids() {
        let ids: Vec<_> = builtin_templates().iter().map(|t| t.id).collect();
        assert_eq!(
            ids,
            vec![
                "daily-maintenance",
                "code-quality-check",
                "backup-project",
                "onboarding-new-developer"
            ]
        );
    }

    #[test]
    fn test_templates_are_valid() {
        for template in builtin_templates() {
            assert!(
                template.instantiate(TemplateOverrides::default()).validate().is_ok(),
                "{} is invalid",
                template.id
            );
        }
    }

    #[test]
    fn test_daily_maintenance_step_order() {
        let template = find_template("daily-maintenance").unwrap();
        let actions: Vec<_> = template.steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["reindex-code", "cleanup-notifications", "autonomous-task"]
        );
        assert_eq!(
            template.steps[1].parameters["older_than_ms"],
            json!(604_800_000u64)
        );
    }

    #[test]
    fn test_overrides_replace_fields() {
        let template = find_template("backup-project").unwrap();
        let config = template.instantiate(TemplateOverrides {
            name: Some("Nightly backup".into()),
            description: None,
            steps: Some(vec![WorkflowStep::new("only", "git-commit")]),
        });

        assert_eq!(config.name, "Nightly backup");
        assert_eq!(config.description.as_deref(), Some("Create a full project backup"));
        assert_eq!(config.steps.len(), 1);
    }

    #[test]
    fn test_unknown_template() {
        assert!(find_template("nope").is_none());
    }
}
