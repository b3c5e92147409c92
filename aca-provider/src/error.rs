//! Error types for remote workload operations.

use aca_config::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error document.
    #[error("Request rejected ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Container app not found: {0}")]
    NotFound(String),

    /// A long-running operation reached a terminal state other than success.
    #[error("Operation {operation} ended with status {status}: {message}")]
    OperationFailed {
        operation: String,
        status: String,
        message: String,
    },

    /// The credential source is not configured in this environment.
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Client error: {0}")]
    Client(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
            || matches!(self, Self::Api { status: 404, .. })
    }
}
