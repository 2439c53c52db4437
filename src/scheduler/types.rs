//! Scheduler type definitions.
//!
//! This module contains the error type, runtime settings and the result
//! types returned by the scheduler handle.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::core::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::core::schedule::ScheduleError;
use crate::core::task::ValidationError;
use crate::core::types::{ExecutionId, TaskId};
use crate::storage::{ExecutionStats, StorageError};

/// Default number of execution rows kept per task.
pub const DEFAULT_MAX_HISTORY_PER_TASK: usize = 50;

/// Default number of rows returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A required field was missing or invalid.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The schedule could not be parsed for the task type.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A one-shot schedule is not in the future.
    #[error("scheduled time {at} has already passed")]
    PastSchedule { at: chrono::DateTime<chrono::Utc> },

    /// An interval is below the minimum period.
    #[error("interval of {interval_ms}ms is below the 1000ms minimum")]
    IntervalTooSmall { interval_ms: i64 },

    /// Task not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ScheduleError> for SchedulerError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::PastSchedule { at } => SchedulerError::PastSchedule { at },
            ScheduleError::IntervalTooSmall { interval_ms } => {
                SchedulerError::IntervalTooSmall { interval_ms }
            }
            ScheduleError::InvalidSchedule(msg) => SchedulerError::InvalidSchedule(msg),
            e @ ScheduleError::InvalidTimezone(_) => SchedulerError::InvalidSchedule(e.to_string()),
        }
    }
}

/// What happens when a task fires while a previous execution of the same
/// task is still in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Run both executions concurrently.
    #[default]
    Allow,
    /// Skip the new firing with a warning.
    Skip,
}

/// Runtime knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Timezone cron expressions are evaluated in.
    pub timezone: Tz,
    /// Retries for tasks registered without `max_retries`.
    pub default_max_retries: u32,
    /// Delay for tasks registered without `retry_delay_ms`.
    pub default_retry_delay: Duration,
    /// Execution rows kept per task.
    pub max_history_per_task: usize,
    pub overlap_policy: OverlapPolicy,
    /// How long `shutdown` waits for in-flight executions.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            default_max_retries: DEFAULT_MAX_RETRIES,
            default_retry_delay: DEFAULT_RETRY_DELAY,
            max_history_per_task: DEFAULT_MAX_HISTORY_PER_TASK,
            overlap_policy: OverlapPolicy::Allow,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of one logical run of a task, across all of its attempts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// An attempt succeeded.
    Success {
        execution_id: ExecutionId,
        retry_count: u32,
        result: Value,
    },
    /// The last allowed attempt failed.
    Error {
        execution_id: ExecutionId,
        retry_count: u32,
        error: String,
    },
    /// Nothing ran.
    Skipped { reason: String },
    /// Retries were abandoned after a failed attempt.
    Cancelled { retry_count: u32, reason: String },
}

impl ExecutionOutcome {
    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        ExecutionOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }
}

/// Snapshot of scheduler state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub total_tasks: u64,
    pub enabled_tasks: u64,
    pub tasks_by_type: BTreeMap<String, u64>,
    pub tasks_by_action: BTreeMap<String, u64>,
    /// Live runtime triggers.
    pub active_triggers: u64,
    /// Executions currently in flight in this process.
    pub running_executions: u64,
    pub executions: ExecutionStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_schedule_errors_convert() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            SchedulerError::from(ScheduleError::PastSchedule { at }),
            SchedulerError::PastSchedule { at: a } if a == at
        ));
        assert!(matches!(
            SchedulerError::from(ScheduleError::IntervalTooSmall { interval_ms: 10 }),
            SchedulerError::IntervalTooSmall { interval_ms: 10 }
        ));
        assert!(matches!(
            SchedulerError::from(ScheduleError::InvalidTimezone("Mars/Base".into())),
            SchedulerError::InvalidSchedule(msg) if msg.contains("Mars/Base")
        ));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = ExecutionOutcome::skipped("task is disabled");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "task is disabled");
    }

    #[test]
    fn test_default_settings() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.default_max_retries, 3);
        assert_eq!(settings.default_retry_delay, Duration::from_millis(5000));
        assert_eq!(settings.max_history_per_task, 50);
        assert_eq!(settings.overlap_policy, OverlapPolicy::Allow);
    }
}
