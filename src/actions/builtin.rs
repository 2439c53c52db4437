//! Built-in actions.
//!
//! Every built-in delegates to one collaborator from [`Collaborators`]. When
//! that collaborator is absent the action is still registered, and invoking
//! it fails with `"<collaborator> not available"`.
//!
//! | Action | Collaborator | Parameters |
//! |---|---|---|
//! | `autonomous-task` | [`AutonomousAgent`] | `task` |
//! | `command` | [`CommandRunner`] | `command`, `args`, `working_dir`, `env`, `timeout_ms` |
//! | `reindex-code` | [`CodeIndexer`] | |
//! | `find-undocumented` | [`CodeIndexer`] | |
//! | `find-complex-functions` | [`CodeIndexer`] | `threshold` (10) |
//! | `generate-docs` | [`DocGenerator`] | `files`, `auto_fix` |
//! | `generate-project-docs` | [`DocGenerator`] | passed through |
//! | `cleanup-notifications` | [`NotificationSink`] | `older_than_ms` (7 days) |
//! | `notify-results` | [`NotificationSink`] | `title`, `message` |
//! | `git-commit` | [`CommandRunner`] | `message`, `working_dir` |
//! | `compress-files` | [`CommandRunner`] | `output`, `files`, `working_dir` |
//!
//! The `workflow` action is registered by the workflow engine itself.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::collaborators::{
    AutonomousAgent, CodeIndexer, CommandOutput, CommandRequest, CommandRunner, DocGenerator,
    Notification, NotificationPriority, NotificationSink,
};
use super::{
    Action, ActionDispatcher, ActionError, bool_param, required_str, str_param, string_list,
    u64_param,
};
use crate::core::types::Params;

/// Default age for `cleanup-notifications`: one week.
pub const DEFAULT_CLEANUP_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Default threshold for `find-complex-functions`.
pub const DEFAULT_COMPLEXITY_THRESHOLD: u32 = 10;

/// External services the built-in actions delegate to.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub agent: Option<Arc<dyn AutonomousAgent>>,
    pub commands: Option<Arc<dyn CommandRunner>>,
    pub indexer: Option<Arc<dyn CodeIndexer>>,
    pub docs: Option<Arc<dyn DocGenerator>>,
    pub notifier: Option<Arc<dyn NotificationSink>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: Arc<dyn AutonomousAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_commands(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn CodeIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_docs(mut self, docs: Arc<dyn DocGenerator>) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

pub(super) fn register_all(dispatcher: &ActionDispatcher, c: Collaborators) {
    dispatcher.register(
        "autonomous-task",
        Arc::new(AutonomousTaskAction {
            agent: c.agent.clone(),
        }),
    );
    dispatcher.register(
        "command",
        Arc::new(CommandAction {
            runner: c.commands.clone(),
        }),
    );
    dispatcher.register(
        "reindex-code",
        Arc::new(ReindexCodeAction {
            indexer: c.indexer.clone(),
        }),
    );
    dispatcher.register(
        "find-undocumented",
        Arc::new(FindUndocumentedAction {
            indexer: c.indexer.clone(),
        }),
    );
    dispatcher.register(
        "find-complex-functions",
        Arc::new(FindComplexFunctionsAction {
            indexer: c.indexer.clone(),
        }),
    );
    dispatcher.register(
        "generate-docs",
        Arc::new(GenerateDocsAction {
            docs: c.docs.clone(),
        }),
    );
    dispatcher.register(
        "generate-project-docs",
        Arc::new(GenerateProjectDocsAction {
            docs: c.docs.clone(),
        }),
    );
    dispatcher.register(
        "cleanup-notifications",
        Arc::new(CleanupNotificationsAction {
            notifier: c.notifier.clone(),
        }),
    );
    dispatcher.register(
        "notify-results",
        Arc::new(NotifyResultsAction {
            notifier: c.notifier.clone(),
        }),
    );
    dispatcher.register(
        "git-commit",
        Arc::new(GitCommitAction {
            runner: c.commands.clone(),
        }),
    );
    dispatcher.register(
        "compress-files",
        Arc::new(CompressFilesAction { runner: c.commands }),
    );
}

fn require<'a, T: ?Sized>(
    collaborator: &'a Option<Arc<T>>,
    name: &str,
) -> Result<&'a Arc<T>, ActionError> {
    collaborator
        .as_ref()
        .ok_or_else(|| ActionError::unavailable(name))
}

/// Run a command and fail on a non-zero exit code.
async fn run_checked(
    runner: &dyn CommandRunner,
    request: CommandRequest,
) -> Result<CommandOutput, ActionError> {
    let program = request.program.clone();
    let output = runner.run(request).await?;
    if output.success() {
        Ok(output)
    } else {
        let detail = output.stderr.trim();
        Err(ActionError::ActionExecution(if detail.is_empty() {
            format!("{} exited with code {}", program, output.exit_code)
        } else {
            format!("{} exited with code {}: {}", program, output.exit_code, detail)
        }))
    }
}

struct AutonomousTaskAction {
    agent: Option<Arc<dyn AutonomousAgent>>,
}

#[async_trait]
impl Action for AutonomousTaskAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let agent = require(&self.agent, "autonomous agent")?;
        let task = required_str(&params, "task")?;
        agent.execute_task(task, &params).await
    }
}

struct CommandAction {
    runner: Option<Arc<dyn CommandRunner>>,
}

#[async_trait]
impl Action for CommandAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let runner = require(&self.runner, "command runner")?;
        let program = required_str(&params, "command")?;
        let args = string_list(&params, "args")?;

        let mut request = CommandRequest::new(program).args(args.clone());
        if let Some(dir) = str_param(&params, "working_dir")? {
            request = request.working_dir(dir);
        }
        if let Some(ms) = u64_param(&params, "timeout_ms")? {
            request = request.timeout(Duration::from_millis(ms));
        }
        match params.get("env") {
            None | Some(Value::Null) => {}
            Some(Value::Object(vars)) => {
                let mut env = HashMap::with_capacity(vars.len());
                for (key, value) in vars {
                    let value = value
                        .as_str()
                        .ok_or_else(|| ActionError::invalid_parameter("env", "a map of strings"))?;
                    env.insert(key.clone(), value.to_string());
                }
                request.env = env;
            }
            Some(_) => return Err(ActionError::invalid_parameter("env", "a map of strings")),
        }

        let output = run_checked(runner.as_ref(), request).await?;
        Ok(json!({
            "command": program,
            "args": args,
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        }))
    }
}

struct ReindexCodeAction {
    indexer: Option<Arc<dyn CodeIndexer>>,
}

#[async_trait]
impl Action for ReindexCodeAction {
    async fn execute(&self, _params: Params) -> Result<Value, ActionError> {
        let indexer = require(&self.indexer, "code indexer")?;
        let stats = indexer.reindex().await?;
        Ok(json!({ "action": "reindex-code", "stats": stats }))
    }
}

struct FindUndocumentedAction {
    indexer: Option<Arc<dyn CodeIndexer>>,
}

#[async_trait]
impl Action for FindUndocumentedAction {
    async fn execute(&self, _params: Params) -> Result<Value, ActionError> {
        let indexer = require(&self.indexer, "code indexer")?;
        let files = indexer.find_undocumented().await?;
        Ok(json!({ "action": "find-undocumented", "files": files }))
    }
}

struct FindComplexFunctionsAction {
    indexer: Option<Arc<dyn CodeIndexer>>,
}

#[async_trait]
impl Action for FindComplexFunctionsAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let indexer = require(&self.indexer, "code indexer")?;
        let threshold = match u64_param(&params, "threshold")? {
            Some(t) => u32::try_from(t)
                .map_err(|_| ActionError::invalid_parameter("threshold", "a 32-bit integer"))?,
            None => DEFAULT_COMPLEXITY_THRESHOLD,
        };
        let functions = indexer.find_complex_functions(threshold).await?;
        Ok(json!({
            "action": "find-complex-functions",
            "threshold": threshold,
            "functions": functions,
        }))
    }
}

struct GenerateDocsAction {
    docs: Option<Arc<dyn DocGenerator>>,
}

#[async_trait]
impl Action for GenerateDocsAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let docs = require(&self.docs, "documentation generator")?;
        let files = string_list(&params, "files")?;
        let auto_fix = bool_param(&params, "auto_fix")?.unwrap_or(false);
        let result = docs.generate_docs(&files, auto_fix).await?;
        Ok(json!({ "action": "generate-docs", "auto_fix": auto_fix, "result": result }))
    }
}

struct GenerateProjectDocsAction {
    docs: Option<Arc<dyn DocGenerator>>,
}

#[async_trait]
impl Action for GenerateProjectDocsAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let docs = require(&self.docs, "documentation generator")?;
        let result = docs.generate_project_docs(&params).await?;
        Ok(json!({ "action": "generate-project-docs", "result": result }))
    }
}

struct CleanupNotificationsAction {
    notifier: Option<Arc<dyn NotificationSink>>,
}

#[async_trait]
impl Action for CleanupNotificationsAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let notifier = require(&self.notifier, "notification system")?;
        let older_than_ms = u64_param(&params, "older_than_ms")?.unwrap_or(DEFAULT_CLEANUP_AGE_MS);
        let removed = notifier
            .cleanup(Duration::from_millis(older_than_ms))
            .await?;
        Ok(json!({
            "action": "cleanup-notifications",
            "older_than_ms": older_than_ms,
            "removed": removed,
        }))
    }
}

struct NotifyResultsAction {
    notifier: Option<Arc<dyn NotificationSink>>,
}

#[async_trait]
impl Action for NotifyResultsAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let notifier = require(&self.notifier, "notification system")?;
        let title = str_param(&params, "title")?
            .unwrap_or("Workflow results")
            .to_string();
        let message = str_param(&params, "message")?
            .unwrap_or("Workflow completed")
            .to_string();

        notifier
            .notify(Notification {
                priority: NotificationPriority::Info,
                category: "workflow".to_string(),
                title: title.clone(),
                message,
                data: Value::Object(params),
            })
            .await?;
        Ok(json!({ "action": "notify-results", "title": title, "notified": true }))
    }
}

struct GitCommitAction {
    runner: Option<Arc<dyn CommandRunner>>,
}

#[async_trait]
impl Action for GitCommitAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let runner = require(&self.runner, "command runner")?;
        let message = str_param(&params, "message")?.unwrap_or("Automated commit");
        let dir = str_param(&params, "working_dir")?;

        let in_dir = |req: CommandRequest| match dir {
            Some(d) => req.working_dir(d),
            None => req,
        };

        run_checked(
            runner.as_ref(),
            in_dir(CommandRequest::new("git").args(["add", "-A"])),
        )
        .await?;
        let output = run_checked(
            runner.as_ref(),
            in_dir(CommandRequest::new("git").args(["commit", "-m", message])),
        )
        .await?;

        Ok(json!({
            "action": "git-commit",
            "message": message,
            "output": output.stdout.trim(),
        }))
    }
}

struct CompressFilesAction {
    runner: Option<Arc<dyn CommandRunner>>,
}

#[async_trait]
impl Action for CompressFilesAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        let runner = require(&self.runner, "command runner")?;
        let output = str_param(&params, "output")?.unwrap_or("backup.zip");
        let mut files = string_list(&params, "files")?;
        if files.is_empty() {
            files.push(".".to_string());
        }

        let mut request = CommandRequest::new("zip")
            .args(["-r", output])
            .args(files.iter().cloned());
        if let Some(dir) = str_param(&params, "working_dir")? {
            request = request.working_dir(dir);
        }
        run_checked(runner.as_ref(), request).await?;

        Ok(json!({ "action": "compress-files", "output": output, "files": files }))
    }
}
