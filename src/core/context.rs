//! Workflow execution context and parameter resolution.
//!
//! A [`WorkflowContext`] is the key-value map threaded through one workflow
//! execution. Steps read from it through `${name}` parameter references and
//! write to it through their `output_variable`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::Params;

/// Mutable key-value context for a single workflow execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowContext {
    values: Params,
}

impl WorkflowContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Check if a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the context is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolve `${name}` references in step parameters against this context.
    ///
    /// A parameter whose value is a string of exactly the form `${name}` is
    /// replaced by `context[name]` (JSON `null` when absent). Every other
    /// value, including strings that merely contain a reference and nested
    /// objects, passes through unchanged.
    pub fn resolve(&self, parameters: &Params) -> Params {
        parameters
            .iter()
            .map(|(key, value)| {
                let resolved = match reference_name(value) {
                    Some(name) => self.values.get(name).cloned().unwrap_or(Value::Null),
                    None => value.clone(),
                };
                (key.clone(), resolved)
            })
            .collect()
    }
}

impl From<Params> for WorkflowContext {
    fn from(values: Params) -> Self {
        Self { values }
    }
}

/// Extract `name` from a value of the exact form `"${name}"`.
fn reference_name(value: &Value) -> Option<&str> {
    value
        .as_str()?
        .strip_prefix("${")?
        .strip_suffix('}')
}
