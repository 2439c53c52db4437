//! Task scheduler.
//!
//! This module keeps one runtime trigger per enabled task, runs firings
//! through the action dispatcher with retries, and recovers executions
//! interrupted by a previous process.

mod clock;
mod engine;
mod runner;
mod trigger;
mod types;

pub use clock::{Clock, SystemClock};
pub use engine::{SchedulerHandle, TaskScheduler};
pub use types::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_HISTORY_PER_TASK, ExecutionOutcome, OverlapPolicy,
    SchedulerError, SchedulerSettings, SchedulerStats,
};
