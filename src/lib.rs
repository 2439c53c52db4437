//! cadence: a task scheduler and workflow engine.
//!
//! Tasks fire on cron expressions, at a single instant, or on a fixed
//! interval, and run a named action with retries. Workflows chain actions
//! into ordered steps that share a context. Both keep their definitions and
//! execution history in a pluggable [`Storage`] backend.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cadence::{ActionDispatcher, Collaborators, InMemoryStorage, TaskConfig, TaskScheduler, TaskType};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStorage::new());
//! let dispatcher = Arc::new(ActionDispatcher::with_builtins(Collaborators::new()));
//! let scheduler = TaskScheduler::new(store, dispatcher).start().await?;
//!
//! scheduler
//!     .schedule_task(TaskConfig::new("reindex", TaskType::Cron, "0 3 * * *", "reindex-code"))
//!     .await?;
//! # scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod api;
pub mod config;
pub mod core;
pub mod events;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod workflow;

pub use actions::{Action, ActionDispatcher, ActionError, Collaborators, ProcessCommandRunner};
pub use config::{CadenceConfig, ConfigBuilder, ConfigError, YamlLoader};
pub use core::context::WorkflowContext;
pub use core::retry::RetryPolicy;
pub use core::schedule::{Schedule, ScheduleError, ScheduleSpec, TaskType};
pub use core::task::{ScheduledTask, TaskConfig, TaskFilter, TaskPatch, ValidationError};
pub use core::types::{ExecutionId, Params, TaskId, WorkflowId};
pub use core::workflow::{StepResult, Workflow, WorkflowConfig, WorkflowStep};
pub use events::{Event, EventBus, EventHandler};
pub use scheduler::{
    Clock, ExecutionOutcome, OverlapPolicy, SchedulerError, SchedulerHandle, SchedulerSettings,
    SystemClock, TaskScheduler,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{InMemoryStorage, Storage, StorageError, TaskExecution, WorkflowExecution};
pub use workflow::{TemplateOverrides, WorkflowEngine, WorkflowError, WorkflowTemplate};
