use crate::error::{ConfigError, Result};
use crate::options::{self, ConfigField, OPTIONS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Resolved spawner configuration.
///
/// Scope values (`subscription_id`, `resource_group`, ...) stay optional here; the
/// accessor for each one reports [`ConfigError::Missing`] when an operation actually
/// needs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpawnerConfig {
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub environment_name: Option<String>,
    pub region: String,
    pub acr_server: Option<String>,
    pub acr_identity: Option<String>,
    pub app_name: Option<String>,
    pub image: Option<String>,
    pub hub_version: String,
    pub cmd: Vec<String>,
    pub cpu: f64,
    pub memory: String,
    pub target_port: u16,
    pub external_port: u16,
    pub hub_connect_url: Option<String>,
    pub forward_prefix: String,
    pub arm_endpoint: String,
    pub authority_host: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
    pub operation_poll_secs: u64,
    pub operation_timeout_secs: u64,

    /// Controller variables carrying `forward_prefix`, captured at load time.
    #[serde(skip)]
    pub forwarded_env: BTreeMap<String, String>,

    /// Service principal and workload identity variables for the controller's own
    /// credential, captured regardless of `forward_prefix`.
    #[serde(skip)]
    pub credential_env: BTreeMap<String, String>,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            subscription_id: None,
            resource_group: None,
            environment_name: None,
            region: options::DEFAULT_REGION.to_string(),
            acr_server: None,
            acr_identity: None,
            app_name: None,
            image: None,
            hub_version: options::DEFAULT_HUB_VERSION.to_string(),
            cmd: vec![options::DEFAULT_CMD.to_string()],
            cpu: options::DEFAULT_CPU,
            memory: options::DEFAULT_MEMORY.to_string(),
            target_port: options::DEFAULT_TARGET_PORT,
            external_port: options::DEFAULT_EXTERNAL_PORT,
            hub_connect_url: None,
            forward_prefix: options::DEFAULT_FORWARD_PREFIX.to_string(),
            arm_endpoint: options::DEFAULT_ARM_ENDPOINT.to_string(),
            authority_host: options::DEFAULT_AUTHORITY_HOST.to_string(),
            api_version: options::DEFAULT_API_VERSION.to_string(),
            request_timeout_secs: options::DEFAULT_REQUEST_TIMEOUT_SECS,
            operation_poll_secs: options::DEFAULT_OPERATION_POLL_SECS,
            operation_timeout_secs: options::DEFAULT_OPERATION_TIMEOUT_SECS,
            forwarded_env: BTreeMap::new(),
            credential_env: BTreeMap::new(),
        }
    }
}

impl SpawnerConfig {
    /// Loads configuration from the process environment only.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Loads an optional YAML file, then applies the process environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::load_with(path, &vars)
    }

    /// Same as [`SpawnerConfig::load`] with an explicit variable set.
    pub fn load_with(path: Option<&Path>, vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(vars)?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        Self::load_with(None, &vars)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded spawner configuration from {}", path.display());
        Ok(config)
    }

    /// Overrides fields from `vars` and captures the forwarded variables.
    ///
    /// Variables that are absent leave the current value untouched. Empty ones do too,
    /// except for fields where empty is meaningful (`ACA_CMD` clears the override).
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        for option in OPTIONS {
            let Some(raw) = vars.get(option.env) else {
                continue;
            };
            if raw.trim().is_empty() && !option.field.accepts_empty() {
                continue;
            }
            self.set_field(option.field, raw)?;
        }

        self.forwarded_env = if self.forward_prefix.is_empty() {
            BTreeMap::new()
        } else {
            vars.iter()
                .filter(|(k, _)| k.starts_with(&self.forward_prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        self.credential_env = options::CREDENTIAL_VARS
            .iter()
            .filter_map(|key| vars.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();
        Ok(())
    }

    pub fn subscription_id(&self) -> Result<&str> {
        require(&self.subscription_id, ConfigField::SubscriptionId)
    }

    pub fn resource_group(&self) -> Result<&str> {
        require(&self.resource_group, ConfigField::ResourceGroup)
    }

    pub fn environment_name(&self) -> Result<&str> {
        require(&self.environment_name, ConfigField::EnvironmentName)
    }

    pub fn acr_server(&self) -> Result<&str> {
        require(&self.acr_server, ConfigField::AcrServer)
    }

    pub fn acr_identity(&self) -> Result<&str> {
        require(&self.acr_identity, ConfigField::AcrIdentity)
    }

    pub fn hub_connect_url(&self) -> Result<&str> {
        require(&self.hub_connect_url, ConfigField::HubConnectUrl)
    }

    /// Resource id of the managed environment new apps are placed in.
    pub fn managed_environment_id(&self) -> Result<String> {
        Ok(format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.App/managedEnvironments/{}",
            self.subscription_id()?,
            self.resource_group()?,
            self.environment_name()?
        ))
    }

    /// Hub API URL as seen from inside the workload.
    pub fn hub_api_url(&self) -> Result<String> {
        Ok(format!(
            "{}/hub/api",
            self.hub_connect_url()?.trim_end_matches('/')
        ))
    }

    /// Image reference for the single-user container.
    pub fn image_ref(&self) -> Result<String> {
        match self.image.as_deref().filter(|s| !s.is_empty()) {
            Some(image) => Ok(image.to_string()),
            None => Ok(format!(
                "{}/jupyterhub/singleuser:{}",
                self.acr_server()?,
                self.hub_version
            )),
        }
    }

    /// Command override, or `None` to keep the image entrypoint.
    pub fn command(&self) -> Option<Vec<String>> {
        (!self.cmd.is_empty()).then(|| self.cmd.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn operation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.operation_poll_secs)
    }

    /// Upper bound on waiting for one long-running operation.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn require<'a>(value: &'a Option<String>, field: ConfigField) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing {
            field: field.name(),
            env: field.env(),
        })
}
