//! Lifecycle controller errors.

use aca_config::ConfigError;
use aca_provider::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpawnerError>;

#[derive(Error, Debug)]
pub enum SpawnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A remote call for `name` failed.
    #[error("Container app {name}: {source}")]
    Provider {
        name: String,
        #[source]
        source: ProviderError,
    },

    /// The workload was created but no ingress host appeared in time. The app still
    /// exists and stays tracked.
    #[error("Container app {name} created but ingress not ready after {attempts} attempts")]
    IngressNotReady { name: String, attempts: u32 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("State file {path}: {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is not valid JSON: {source}")]
    StateFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SpawnerError {
    pub(crate) fn provider(name: &str, source: ProviderError) -> Self {
        match source {
            ProviderError::Config(e) => Self::Config(e),
            source => Self::Provider {
                name: name.to_string(),
                source,
            },
        }
    }

    /// The workload exists but is not reachable yet; keep polling instead of recreating.
    pub fn is_provisioning_incomplete(&self) -> bool {
        matches!(self, Self::IngressNotReady { .. })
    }
}
