//! Process-backed [`CommandRunner`].
//!
//! [`ProcessCommandRunner`] spawns the program with `tokio::process`,
//! captures stdout and stderr and reports the exit code.
//!
//! **Process Termination**: when a timeout occurs the child is killed as the
//! underlying command future is dropped, without time for graceful shutdown.
//!
//! This runner does not sandbox anything: the program runs with the
//! scheduler's own privileges.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;

use super::ActionError;
use super::collaborators::{CommandOutput, CommandRequest, CommandRunner};

/// Runs commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessCommandRunner;

impl ProcessCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, ActionError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);

        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        if let Some(ref dir) = request.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match request.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| {
                    ActionError::ActionExecution(format!(
                        "{} timed out after {:?}",
                        request.program, duration
                    ))
                })?
                .map_err(|e| {
                    ActionError::ActionExecution(format!("{}: {}", request.program, e))
                })?,
            None => cmd.output().await.map_err(|e| {
                ActionError::ActionExecution(format!("{}: {}", request.program, e))
            })?,
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
