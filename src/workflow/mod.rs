//! Workflow engine.
//!
//! Workflows are ordered step lists run against the action dispatcher.
//! The engine also registers itself as the `workflow` action so scheduled
//! tasks can launch workflows.

mod engine;
mod templates;

pub use engine::{WorkflowEngine, WorkflowEngineBuilder, WorkflowError, WorkflowStats};
pub use templates::{TemplateOverrides, WorkflowTemplate, builtin_templates, find_template};
