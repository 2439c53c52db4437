//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for scheduler settings,
//! storage, the HTTP API, and the tasks and workflows seeded on startup.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{ConfigBuilder, SeedReport};
pub use error::ConfigError;
pub use types::{ApiConfig, CadenceConfig, StorageConfig, WorkflowSeed};
pub use yaml::YamlLoader;
