//! Configuration type definitions.
//!
//! A single YAML file carries the scheduler settings, storage and API
//! sections, and the tasks and workflows to seed on startup.

use serde::{Deserialize, Serialize};

use crate::core::task::TaskConfig;
use crate::core::workflow::WorkflowConfig;
use crate::scheduler::OverlapPolicy;
use crate::workflow::TemplateOverrides;

/// Top-level configuration (cadence.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// IANA timezone cron expressions are evaluated in. Defaults to UTC.
    pub timezone: Option<String>,
    /// Retries for tasks that do not set `max_retries`.
    pub default_max_retries: Option<u32>,
    /// Retry delay for tasks that do not set `retry_delay_ms`.
    pub default_retry_delay_ms: Option<u64>,
    /// Execution rows kept per task.
    pub max_history_per_task: Option<usize>,
    pub overlap_policy: Option<OverlapPolicy>,
    /// How long shutdown waits for running executions.
    pub shutdown_timeout_secs: Option<u64>,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    /// Tasks registered on startup.
    pub tasks: Vec<TaskConfig>,
    /// Workflows created on startup.
    pub workflows: Vec<WorkflowSeed>,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// HTTP API listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

/// A workflow to create on startup: either a built-in template with
/// optional overrides, or a full definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowSeed {
    Template {
        template: String,
        #[serde(flatten)]
        overrides: TemplateOverrides,
    },
    Definition(WorkflowConfig),
}

impl WorkflowSeed {
    /// Name the seeded workflow will carry, when known up front.
    pub fn name(&self) -> Option<&str> {
        match self {
            WorkflowSeed::Template { overrides, .. } => overrides.name.as_deref(),
            WorkflowSeed::Definition(config) => Some(&config.name),
        }
    }
}
