//! Action dispatch.
//!
//! Tasks and workflow steps name an action; the [`ActionDispatcher`]
//! resolves that name to an [`Action`] and runs it with the step's
//! parameters. The registry is open: hosts can register their own actions
//! next to the built-ins in [`builtin`].
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use cadence::{Action, ActionDispatcher, ActionError, Params};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Action for Echo {
//!     async fn execute(&self, params: Params) -> Result<Value, ActionError> {
//!         Ok(Value::Object(params))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let dispatcher = ActionDispatcher::new();
//! dispatcher.register("echo", Arc::new(Echo));
//!
//! let params = json!({ "n": 5 }).as_object().cloned().unwrap();
//! let result = dispatcher.execute("echo", params).await.unwrap();
//! assert_eq!(result["n"], 5);
//! # }
//! ```

pub mod builtin;
pub mod collaborators;
mod command;

pub use builtin::Collaborators;
pub use command::ProcessCommandRunner;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use crate::core::types::Params;

/// Errors that can occur when dispatching an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// No action is registered under this name.
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// The action ran and failed.
    #[error("{0}")]
    ActionExecution(String),
}

impl ActionError {
    /// A built-in whose collaborator was not configured.
    pub fn unavailable(collaborator: &str) -> Self {
        ActionError::ActionExecution(format!("{} not available", collaborator))
    }

    /// A required parameter was missing or had the wrong type.
    pub fn invalid_parameter(name: &str, expected: &str) -> Self {
        ActionError::ActionExecution(format!("parameter '{}' must be {}", name, expected))
    }
}

/// A named unit of work.
///
/// Implementations receive the already-resolved parameters and return a
/// JSON result.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, params: Params) -> Result<Value, ActionError>;
}

/// Name-to-action registry.
pub struct ActionDispatcher {
    actions: RwLock<HashMap<String, Arc<dyn Action>>>,
}

impl ActionDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a dispatcher with every built-in action registered.
    ///
    /// Built-ins whose collaborator is `None` stay registered and fail with
    /// "... not available" when invoked.
    pub fn with_builtins(collaborators: Collaborators) -> Self {
        let dispatcher = Self::new();
        builtin::register_all(&dispatcher, collaborators);
        dispatcher
    }

    /// Register an action, replacing any previous one with the same name.
    pub fn register(&self, name: impl Into<String>, action: Arc<dyn Action>) {
        // The map is never left half-written, so a poisoned lock is still usable
        let mut actions = self.actions.write().unwrap_or_else(PoisonError::into_inner);
        actions.insert(name.into(), action);
    }

    /// Check whether an action is registered.
    pub fn contains(&self, name: &str) -> bool {
        let actions = self.actions.read().unwrap_or_else(PoisonError::into_inner);
        actions.contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn action_names(&self) -> Vec<String> {
        let actions = self.actions.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the named action.
    pub async fn execute(&self, name: &str, params: Params) -> Result<Value, ActionError> {
        let action = {
            let actions = self.actions.read().unwrap_or_else(PoisonError::into_inner);
            actions
                .get(name)
                .cloned()
                .ok_or_else(|| ActionError::UnsupportedAction(name.to_string()))?
        };
        tracing::debug!(action = name, "dispatching action");
        action.execute(params).await
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Read an optional string parameter.
pub(crate) fn str_param<'a>(
    params: &'a Params,
    name: &str,
) -> Result<Option<&'a str>, ActionError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ActionError::invalid_parameter(name, "a string")),
    }
}

/// Read a required, non-empty string parameter.
pub(crate) fn required_str<'a>(params: &'a Params, name: &str) -> Result<&'a str, ActionError> {
    str_param(params, name)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ActionError::invalid_parameter(name, "a non-empty string"))
}

/// Read an optional list of strings.
pub(crate) fn string_list(params: &Params, name: &str) -> Result<Vec<String>, ActionError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ActionError::invalid_parameter(name, "a list of strings"))
            })
            .collect(),
        Some(_) => Err(ActionError::invalid_parameter(name, "a list of strings")),
    }
}

/// Read an optional non-negative integer parameter.
pub(crate) fn u64_param(params: &Params, name: &str) -> Result<Option<u64>, ActionError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| ActionError::invalid_parameter(name, "a non-negative integer")),
    }
}

/// Read an optional boolean parameter.
pub(crate) fn bool_param(params: &Params, name: &str) -> Result<Option<bool>, ActionError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ActionError::invalid_parameter(name, "a boolean")),
    }
}
