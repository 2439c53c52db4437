//! Core domain types: identifiers, schedules, retry, task and workflow models.

pub mod context;
pub mod retry;
pub mod schedule;
pub mod task;
pub mod types;
pub mod workflow;
