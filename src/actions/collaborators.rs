//! Contracts for the external services built-in actions delegate to.
//!
//! None of these are implemented here beyond [`ProcessCommandRunner`]
//! (see `command.rs`); the host injects real implementations and tests use
//! the fakes in [`crate::testing`].
//!
//! [`ProcessCommandRunner`]: super::ProcessCommandRunner

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::ActionError;
use crate::core::types::Params;

/// Runs a free-form task through an autonomous agent.
#[async_trait]
pub trait AutonomousAgent: Send + Sync {
    /// Execute `task`; `params` carries the full action parameters.
    async fn execute_task(&self, task: &str, params: &Params) -> Result<Value, ActionError>;
}

/// A program invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Kill the process after this long.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, -1 when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes external programs.
///
/// Implementations return `Err` only when the program could not be run to
/// completion (spawn failure, timeout); a non-zero exit is a normal output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, ActionError>;
}

/// Source code analysis.
#[async_trait]
pub trait CodeIndexer: Send + Sync {
    /// Rebuild the index, returning summary statistics.
    async fn reindex(&self) -> Result<Value, ActionError>;

    /// Files that define functions but carry no documentation.
    async fn find_undocumented(&self) -> Result<Value, ActionError>;

    /// Functions whose complexity exceeds `threshold`.
    async fn find_complex_functions(&self, threshold: u32) -> Result<Value, ActionError>;
}

/// Documentation generation.
#[async_trait]
pub trait DocGenerator: Send + Sync {
    async fn generate_docs(&self, files: &[String], auto_fix: bool)
    -> Result<Value, ActionError>;

    async fn generate_project_docs(&self, params: &Params) -> Result<Value, ActionError>;
}

/// Notification urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Info,
    Success,
    Warning,
    Error,
}

/// A message pushed to the notification system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub priority: NotificationPriority,
    pub category: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// Receives notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), ActionError>;

    /// Remove notifications older than `older_than`, returning how many went.
    async fn cleanup(&self, older_than: Duration) -> Result<u64, ActionError>;
}
