//! Schedule parsing and next occurrence calculation.
//!
//! A task fires on one of three kinds of schedule:
//! - `cron`: standard 5-field cron, extended 6-field cron (with seconds) or a
//!   shortcut (`@daily`, `@hourly`, ...), evaluated in a configurable timezone
//! - `once`: a single future instant given as epoch milliseconds (or RFC 3339)
//! - `interval`: a fixed period in milliseconds, at least [`MIN_INTERVAL_MS`]

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Smallest accepted interval period.
pub const MIN_INTERVAL_MS: i64 = 1000;

/// Largest accepted interval period (100 years).
pub const MAX_INTERVAL_MS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Errors that can occur when parsing or validating schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The schedule could not be parsed for its task type.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A one-shot schedule points at an instant that is not in the future.
    #[error("scheduled time {at} has already passed")]
    PastSchedule { at: DateTime<Utc> },

    /// An interval schedule is below the minimum period.
    #[error("interval of {interval_ms}ms is below the 1000ms minimum")]
    IntervalTooSmall { interval_ms: i64 },

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// The kind of trigger a task uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Fires on every matching wall-clock tick.
    Cron,
    /// Fires a single time, then disables itself.
    Once,
    /// Fires every fixed period, measured from registration.
    Interval,
}

impl TaskType {
    /// Lowercase name used in storage and filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Cron => "cron",
            TaskType::Once => "once",
            TaskType::Interval => "interval",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cron" => Ok(TaskType::Cron),
            "once" => Ok(TaskType::Once),
            "interval" => Ok(TaskType::Interval),
            other => Err(ScheduleError::InvalidSchedule(format!(
                "unknown task type: {}",
                other
            ))),
        }
    }
}

/// The raw schedule value as supplied by a caller or stored on disk.
///
/// Cron tasks carry an expression; once and interval tasks usually carry
/// milliseconds, but numeric strings are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSpec {
    /// Epoch milliseconds (once) or a period in milliseconds (interval).
    Millis(i64),
    /// A cron expression, or a textual timestamp/period.
    Expression(String),
}

impl ScheduleSpec {
    /// Parse a stored text column back into a spec.
    pub fn from_stored(text: &str) -> Self {
        match text.parse::<i64>() {
            Ok(ms) => ScheduleSpec::Millis(ms),
            Err(_) => ScheduleSpec::Expression(text.to_string()),
        }
    }

    fn as_millis(&self) -> Option<i64> {
        match self {
            ScheduleSpec::Millis(ms) => Some(*ms),
            ScheduleSpec::Expression(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSpec::Millis(ms) => write!(f, "{}", ms),
            ScheduleSpec::Expression(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ScheduleSpec {
    fn from(s: &str) -> Self {
        ScheduleSpec::Expression(s.to_string())
    }
}

impl From<i64> for ScheduleSpec {
    fn from(ms: i64) -> Self {
        ScheduleSpec::Millis(ms)
    }
}

/// A validated, ready-to-trigger schedule.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Wall-clock cron schedule.
    Cron(CronExpr),
    /// A single instant.
    Once(DateTime<Utc>),
    /// A fixed period.
    Interval(Duration),
}

/// A parsed cron expression bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronExpr {
    timezone: Tz,
    schedule: Box<CronSchedule>,
}

impl Schedule {
    /// Validate a raw schedule for the given task type.
    ///
    /// `now` is the reference instant for one-shot schedules; anything at or
    /// before it is rejected.
    pub fn parse(
        task_type: TaskType,
        spec: &ScheduleSpec,
        timezone: Tz,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        match task_type {
            TaskType::Cron => match spec {
                ScheduleSpec::Expression(expr) => Self::cron(expr, timezone),
                ScheduleSpec::Millis(ms) => Err(ScheduleError::InvalidSchedule(format!(
                    "cron schedule must be an expression, got {}",
                    ms
                ))),
            },
            TaskType::Once => {
                let at = match spec.as_millis() {
                    Some(ms) => Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
                        ScheduleError::InvalidSchedule(format!("timestamp out of range: {}", ms))
                    })?,
                    None => DateTime::parse_from_rfc3339(&spec.to_string())
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| ScheduleError::InvalidSchedule(e.to_string()))?,
                };
                Self::once(at, now)
            }
            TaskType::Interval => {
                let ms = spec.as_millis().ok_or_else(|| {
                    ScheduleError::InvalidSchedule(format!(
                        "interval must be a number of milliseconds, got '{}'",
                        spec
                    ))
                })?;
                Self::interval(ms)
            }
        }
    }

    /// Create a cron schedule.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    pub fn cron(expression: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.starts_with('@') {
            Self::expand_shortcut(trimmed)?
        } else {
            trimmed.to_string()
        };

        let fields: Vec<&str> = normalized.split_whitespace().collect();
        let cron_expr = match fields.len() {
            // Standard 5-field cron, add seconds field
            5 => format!("0 {}", normalized),
            6 => normalized.clone(),
            n => {
                return Err(ScheduleError::InvalidSchedule(format!(
                    "expected 5 or 6 cron fields, got {}",
                    n
                )));
            }
        };

        let schedule = CronSchedule::from_str(&cron_expr)
            .map_err(|e| ScheduleError::InvalidSchedule(format!("{}: {}", trimmed, e)))?;

        Ok(Schedule::Cron(CronExpr {
            timezone,
            schedule: Box::new(schedule),
        }))
    }

    /// Create a one-shot schedule; `at` must be strictly after `now`.
    pub fn once(at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self, ScheduleError> {
        if at <= now {
            return Err(ScheduleError::PastSchedule { at });
        }
        Ok(Schedule::Once(at))
    }

    /// Create an interval schedule from a period in milliseconds.
    ///
    /// Periods above [`MAX_INTERVAL_MS`] are rejected so the next fire time
    /// always stays within the representable date range.
    pub fn interval(interval_ms: i64) -> Result<Self, ScheduleError> {
        if interval_ms < MIN_INTERVAL_MS {
            return Err(ScheduleError::IntervalTooSmall { interval_ms });
        }
        if interval_ms > MAX_INTERVAL_MS {
            return Err(ScheduleError::InvalidSchedule(format!(
                "interval of {}ms exceeds the {}ms maximum",
                interval_ms, MAX_INTERVAL_MS
            )));
        }
        Ok(Schedule::Interval(Duration::from_millis(interval_ms as u64)))
    }

    fn expand_shortcut(expression: &str) -> Result<String, ScheduleError> {
        let expanded = match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * SUN",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            _ => {
                return Err(ScheduleError::InvalidSchedule(format!(
                    "unknown shortcut: {}",
                    expression
                )));
            }
        };
        Ok(expanded.to_string())
    }

    /// Get the next occurrence strictly after the given time.
    ///
    /// Returns `None` once a one-shot schedule has passed.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(cron) => {
                // Convert to timezone, find next, convert back to UTC
                let local_time = after.with_timezone(&cron.timezone);
                cron.schedule
                    .after(&local_time)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            Schedule::Once(at) => (*at > after).then_some(*at),
            Schedule::Interval(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
        }
    }

    /// Get up to N occurrences after the given time.
    pub fn next_n_after(&self, after: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let mut results = Vec::with_capacity(n);
        let mut current = after;
        while results.len() < n {
            match self.next_after(current) {
                Some(next) => {
                    results.push(next);
                    current = next;
                }
                None => break,
            }
        }
        results
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}
