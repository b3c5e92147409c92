use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value the current operation needs was never configured.
    #[error("Missing configuration: {field} (set {env})")]
    Missing {
        field: &'static str,
        env: &'static str,
    },

    #[error("Invalid value '{value}' for {env}: {reason}")]
    InvalidValue {
        env: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
}
