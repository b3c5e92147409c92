//! Environment injected into the single-user container.

use aca_config::{ConfigError, SpawnerConfig};
use aca_provider::EnvironmentVar;
use std::collections::BTreeMap;
use tracing::info;

pub const API_URL: &str = "JUPYTERHUB_API_URL";
pub const API_TOKEN: &str = "JUPYTERHUB_API_TOKEN";
pub const CLIENT_ID: &str = "JUPYTERHUB_CLIENT_ID";
pub const SERVICE_PREFIX: &str = "JUPYTERHUB_SERVICE_PREFIX";

/// Session variables from the hub, with `JUPYTERHUB_API_URL` pointed at the hub connect
/// URL, followed by the forwarded controller variables.
///
/// A forwarded variable replaces a session variable of the same name so the container
/// never sees duplicates.
pub fn workload_env(
    config: &SpawnerConfig,
    session_env: &BTreeMap<String, String>,
) -> Result<Vec<EnvironmentVar>, ConfigError> {
    let api_url = config.hub_api_url()?;
    info!("Setting {} to: {}", API_URL, api_url);

    let mut hub_env = session_env.clone();
    hub_env.insert(API_URL.to_string(), api_url);

    for key in [API_URL, API_TOKEN, CLIENT_ID] {
        if let Some(value) = hub_env.get(key) {
            if key == API_TOKEN {
                info!("Environment variable {} set (length: {})", key, value.len());
            } else {
                info!("Environment variable {}: {}", key, value);
            }
        }
    }

    let mut env: Vec<EnvironmentVar> = hub_env
        .into_iter()
        .filter(|(name, _)| !config.forwarded_env.contains_key(name))
        .map(|(name, value)| EnvironmentVar { name, value })
        .collect();
    env.extend(config.forwarded_env.iter().map(|(name, value)| EnvironmentVar {
        name: name.clone(),
        value: value.clone(),
    }));
    Ok(env)
}

/// `--ServerApp.base_url` for the notebook server.
pub fn service_prefix(session_env: &BTreeMap<String, String>) -> &str {
    session_env
        .get(SERVICE_PREFIX)
        .map(String::as_str)
        .unwrap_or("/")
}
