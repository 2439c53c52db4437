//! Testing utilities for users of the cadence library.
//!
//! This module provides in-process stand-ins for everything the scheduler
//! and workflow engine talk to:
//!
//! - [`ManualClock`]: a clock whose "now" only moves when told to
//! - [`ScriptedAction`]: an action that succeeds, fails, or fails N times
//! - [`RecordingHandler`]: an event handler that remembers what it saw
//! - Fakes for every external collaborator of the built-in actions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::actions::collaborators::{
    AutonomousAgent, CodeIndexer, CommandOutput, CommandRequest, CommandRunner, DocGenerator,
    Notification, NotificationSink,
};
use crate::actions::{Action, ActionError};
use crate::core::types::Params;
use crate::events::{Event, EventHandler};
use crate::scheduler::Clock;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A clock that only moves when told to.
///
/// Timers still run on tokio's clock; this controls the wall-clock value
/// the scheduler uses to compute cron occurrences and timestamps.
///
/// # Example
///
/// ```
/// use cadence::testing::ManualClock;
/// use cadence::scheduler::Clock;
/// use chrono::{TimeZone, Utc};
///
/// let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
/// clock.advance(chrono::Duration::minutes(5));
/// assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap());
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(at),
        }
    }

    /// Jump to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[derive(Debug)]
enum Script {
    Succeed(Value),
    Fail(String),
    /// Fail `remaining` more times, then succeed with the value.
    FailTimes { remaining: u32, value: Value },
}

/// An action with a fixed behavior that counts its calls.
#[derive(Debug)]
pub struct ScriptedAction {
    script: Mutex<Script>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Params>>,
}

impl ScriptedAction {
    fn with_script(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always return `value`.
    pub fn succeeding(value: Value) -> Arc<Self> {
        Self::with_script(Script::Succeed(value))
    }

    /// Always fail with `message`.
    pub fn failing(message: &str) -> Arc<Self> {
        Self::with_script(Script::Fail(message.to_string()))
    }

    /// Fail `times` times with "scripted failure", then return `value`.
    pub fn failing_times(times: u32, value: Value) -> Arc<Self> {
        Self::with_script(Script::FailTimes {
            remaining: times,
            value,
        })
    }

    /// Sleep this long before answering.
    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *lock(&self.delay) = Some(delay);
        self
    }

    /// Number of times the action was executed.
    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Parameters of the most recent call.
    pub fn last_params(&self) -> Option<Params> {
        lock(&self.calls).last().cloned()
    }
}

#[async_trait]
impl Action for ScriptedAction {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        lock(&self.calls).push(params);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // Check-and-decrement happens under one lock so concurrent calls
        // consume the failure budget exactly once each
        let mut script = lock(&self.script);
        match &mut *script {
            Script::Succeed(value) => Ok(value.clone()),
            Script::Fail(message) => Err(ActionError::ActionExecution(message.clone())),
            Script::FailTimes { remaining, value } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(ActionError::ActionExecution("scripted failure".to_string()))
                } else {
                    Ok(value.clone())
                }
            }
        }
    }
}

/// Event handler that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Wire names of the received events, in order.
    pub async fn names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(Event::name).collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Notification sink that records instead of delivering.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    notifications: Mutex<Vec<Notification>>,
    cleanups: Mutex<Vec<Duration>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    /// Ages passed to each cleanup call.
    pub fn cleanups(&self) -> Vec<Duration> {
        lock(&self.cleanups).clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<(), ActionError> {
        lock(&self.notifications).push(notification);
        Ok(())
    }

    async fn cleanup(&self, older_than: Duration) -> Result<u64, ActionError> {
        lock(&self.cleanups).push(older_than);
        Ok(0)
    }
}

/// Command runner with canned per-program responses.
///
/// Programs without a response exit 0 with empty output.
#[derive(Debug, Default)]
pub struct FakeCommandRunner {
    responses: HashMap<String, CommandOutput>,
    calls: Mutex<Vec<CommandRequest>>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every invocation of `program` with this output.
    pub fn respond(
        mut self,
        program: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        self.responses.insert(
            program.into(),
            CommandOutput {
                exit_code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, ActionError> {
        let output = self
            .responses
            .get(&request.program)
            .cloned()
            .unwrap_or(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        lock(&self.calls).push(request);
        Ok(output)
    }
}

/// Agent that echoes the task back.
#[derive(Debug, Default)]
pub struct FakeAgent {
    tasks: Mutex<Vec<String>>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<String> {
        lock(&self.tasks).clone()
    }
}

#[async_trait]
impl AutonomousAgent for FakeAgent {
    async fn execute_task(&self, task: &str, _params: &Params) -> Result<Value, ActionError> {
        lock(&self.tasks).push(task.to_string());
        Ok(json!({ "task": task, "completed": true }))
    }
}

/// Code indexer returning empty analyses.
#[derive(Debug, Default)]
pub struct FakeCodeIndexer {
    reindexed: Mutex<u32>,
    thresholds: Mutex<Vec<u32>>,
}

impl FakeCodeIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reindex_count(&self) -> u32 {
        *lock(&self.reindexed)
    }

    /// Thresholds passed to each complexity query.
    pub fn thresholds(&self) -> Vec<u32> {
        lock(&self.thresholds).clone()
    }
}

#[async_trait]
impl CodeIndexer for FakeCodeIndexer {
    async fn reindex(&self) -> Result<Value, ActionError> {
        *lock(&self.reindexed) += 1;
        Ok(json!({ "files": 0, "functions": 0 }))
    }

    async fn find_undocumented(&self) -> Result<Value, ActionError> {
        Ok(json!([]))
    }

    async fn find_complex_functions(&self, threshold: u32) -> Result<Value, ActionError> {
        lock(&self.thresholds).push(threshold);
        Ok(json!([]))
    }
}

/// Documentation generator that records its inputs.
#[derive(Debug, Default)]
pub struct FakeDocGenerator {
    calls: Mutex<Vec<(Vec<String>, bool)>>,
}

impl FakeDocGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(files, auto_fix)` of each `generate_docs` call.
    pub fn calls(&self) -> Vec<(Vec<String>, bool)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl DocGenerator for FakeDocGenerator {
    async fn generate_docs(&self, files: &[String], auto_fix: bool) -> Result<Value, ActionError> {
        lock(&self.calls).push((files.to_vec(), auto_fix));
        Ok(json!({ "documented": files.len() }))
    }

    async fn generate_project_docs(&self, _params: &Params) -> Result<Value, ActionError> {
        Ok(json!({ "generated": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[tokio::test]
    async fn test_failing_times_then_succeeds() {
        let action = ScriptedAction::failing_times(2, json!("ok"));

        assert!(action.execute(Params::new()).await.is_err());
        assert!(action.execute(Params::new()).await.is_err());
        assert_eq!(action.execute(Params::new()).await.unwrap(), json!("ok"));
        assert_eq!(action.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_times_under_concurrency() {
        let action = ScriptedAction::failing_times(3, json!(1));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let action = action.clone();
                tokio::spawn(async move { action.execute(Params::new()).await })
            })
            .collect();

        let mut failures = 0;
        for handle in handles {
            if handle.await.unwrap().is_err() {
                failures += 1;
            }
        }
        assert_eq!(failures, 3);
    }

    #[tokio::test]
    async fn test_last_params_recorded() {
        let action = ScriptedAction::succeeding(Value::Null);
        let mut params = Params::new();
        params.insert("k".into(), json!(1));
        action.execute(params.clone()).await.unwrap();

        assert_eq!(action.last_params(), Some(params));
    }

    #[tokio::test]
    async fn test_fake_command_runner_default_response() {
        let runner = FakeCommandRunner::new().respond("false", 1, "", "nope");

        let ok = runner.run(CommandRequest::new("true")).await.unwrap();
        assert!(ok.success());
        let failed = runner.run(CommandRequest::new("false")).await.unwrap();
        assert_eq!(failed.exit_code, 1);
        assert_eq!(runner.calls().len(), 2);
    }
}
