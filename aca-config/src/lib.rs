//! Spawner configuration.
//!
//! Every recognized option is listed in [`OPTIONS`] with its source variable, default and
//! effect. Configuration is resolved once, at process start, into a [`SpawnerConfig`]
//! (optional YAML file, then environment overrides). Consumers receive the struct and
//! never consult the process environment themselves.

pub mod config;
pub mod error;
pub mod options;

#[cfg(test)]
mod config_tests;

pub use config::SpawnerConfig;
pub use error::{ConfigError, Result};
pub use options::{ConfigField, ConfigOption, OPTIONS};
