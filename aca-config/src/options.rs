//! The recognized option table and the environment overlay built from it.

use crate::config::SpawnerConfig;
use crate::error::{ConfigError, Result};

/// Identifies one configurable field of [`SpawnerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    SubscriptionId,
    ResourceGroup,
    EnvironmentName,
    Region,
    AcrServer,
    AcrIdentity,
    AppName,
    Image,
    HubVersion,
    Cmd,
    Cpu,
    Memory,
    TargetPort,
    ExternalPort,
    HubConnectUrl,
    ForwardPrefix,
    ArmEndpoint,
    AuthorityHost,
    ApiVersion,
    RequestTimeoutSecs,
    OperationPollSecs,
    OperationTimeoutSecs,
}

/// One row of the option table: `{field, source variable, default, effect}`.
#[derive(Debug, Clone, Copy)]
pub struct ConfigOption {
    pub field: ConfigField,
    pub name: &'static str,
    pub env: &'static str,
    pub default: Option<&'static str>,
    pub effect: &'static str,
}

pub const DEFAULT_REGION: &str = "swedencentral";
pub const DEFAULT_HUB_VERSION: &str = "5.3";
pub const DEFAULT_CMD: &str = "start-notebook.py";
pub const DEFAULT_CPU: f64 = 1.0;
pub const DEFAULT_MEMORY: &str = "2Gi";
pub const DEFAULT_TARGET_PORT: u16 = 8888;
pub const DEFAULT_EXTERNAL_PORT: u16 = 80;
pub const DEFAULT_FORWARD_PREFIX: &str = "AZURE_";
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_API_VERSION: &str = "2024-03-01";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_OPERATION_POLL_SECS: u64 = 5;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 600;

/// Variables read by the controller's own credential chain.
pub const CREDENTIAL_VARS: &[&str] = &[
    "AZURE_TENANT_ID",
    "AZURE_CLIENT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_FEDERATED_TOKEN_FILE",
];

pub const OPTIONS: &[ConfigOption] = &[
    ConfigOption {
        field: ConfigField::SubscriptionId,
        name: "subscription_id",
        env: "AZURE_SUBSCRIPTION_ID",
        default: None,
        effect: "Subscription the resource manager client is bound to",
    },
    ConfigOption {
        field: ConfigField::ResourceGroup,
        name: "resource_group",
        env: "AZURE_RESOURCE_GROUP",
        default: None,
        effect: "Resource group that holds the session container apps",
    },
    ConfigOption {
        field: ConfigField::EnvironmentName,
        name: "environment_name",
        env: "AZURE_ACA_ENVIRONMENT_NAME",
        default: None,
        effect: "Managed environment the container apps join",
    },
    ConfigOption {
        field: ConfigField::Region,
        name: "region",
        env: "AZURE_REGION",
        default: Some(DEFAULT_REGION),
        effect: "Location of new container apps",
    },
    ConfigOption {
        field: ConfigField::AcrServer,
        name: "acr_server",
        env: "AZURE_ACR_SERVER",
        default: None,
        effect: "Registry server images are pulled from",
    },
    ConfigOption {
        field: ConfigField::AcrIdentity,
        name: "acr_identity",
        env: "AZURE_ACR_IDENTITY",
        default: None,
        effect: "Managed identity used to authenticate against the registry",
    },
    ConfigOption {
        field: ConfigField::AppName,
        name: "app_name",
        env: "ACA_NAME",
        default: None,
        effect: "Fixed container app name; generated per session when unset",
    },
    ConfigOption {
        field: ConfigField::Image,
        name: "image",
        env: "ACA_IMAGE",
        default: None,
        effect: "Single-user image; defaults to <acr_server>/jupyterhub/singleuser:<hub_version>",
    },
    ConfigOption {
        field: ConfigField::HubVersion,
        name: "hub_version",
        env: "JUPYTERHUB_VERSION",
        default: Some(DEFAULT_HUB_VERSION),
        effect: "Tag of the default single-user image",
    },
    ConfigOption {
        field: ConfigField::Cmd,
        name: "cmd",
        env: "ACA_CMD",
        default: Some(DEFAULT_CMD),
        effect: "Command override for the container; set but empty keeps the image entrypoint",
    },
    ConfigOption {
        field: ConfigField::Cpu,
        name: "cpu",
        env: "ACA_CPU",
        default: Some("1.0"),
        effect: "CPU cores allocated to the container",
    },
    ConfigOption {
        field: ConfigField::Memory,
        name: "memory",
        env: "ACA_MEMORY",
        default: Some(DEFAULT_MEMORY),
        effect: "Memory allocated to the container",
    },
    ConfigOption {
        field: ConfigField::TargetPort,
        name: "target_port",
        env: "ACA_TARGET_PORT",
        default: Some("8888"),
        effect: "Port the notebook server listens on; ingress targets it",
    },
    ConfigOption {
        field: ConfigField::ExternalPort,
        name: "external_port",
        env: "ACA_EXTERNAL_PORT",
        default: Some("80"),
        effect: "Public ingress port (informational for HTTP ingress)",
    },
    ConfigOption {
        field: ConfigField::HubConnectUrl,
        name: "hub_connect_url",
        env: "JUPYTERHUB_HUB_CONNECT_URL",
        default: None,
        effect: "Hub base URL reachable from the container; required by start",
    },
    ConfigOption {
        field: ConfigField::ForwardPrefix,
        name: "forward_prefix",
        env: "ACA_FORWARD_PREFIX",
        default: Some(DEFAULT_FORWARD_PREFIX),
        effect: "Controller variables with this prefix are forwarded into the container",
    },
    ConfigOption {
        field: ConfigField::ArmEndpoint,
        name: "arm_endpoint",
        env: "AZURE_RESOURCE_MANAGER_ENDPOINT",
        default: Some(DEFAULT_ARM_ENDPOINT),
        effect: "Resource manager base URL",
    },
    ConfigOption {
        field: ConfigField::AuthorityHost,
        name: "authority_host",
        env: "AZURE_AUTHORITY_HOST",
        default: Some(DEFAULT_AUTHORITY_HOST),
        effect: "Identity platform base URL used to obtain tokens",
    },
    ConfigOption {
        field: ConfigField::ApiVersion,
        name: "api_version",
        env: "ACA_API_VERSION",
        default: Some(DEFAULT_API_VERSION),
        effect: "Microsoft.App REST API version",
    },
    ConfigOption {
        field: ConfigField::RequestTimeoutSecs,
        name: "request_timeout_secs",
        env: "ACA_REQUEST_TIMEOUT",
        default: Some("60"),
        effect: "Timeout of a single HTTP request, in seconds",
    },
    ConfigOption {
        field: ConfigField::OperationPollSecs,
        name: "operation_poll_secs",
        env: "ACA_OPERATION_POLL_INTERVAL",
        default: Some("5"),
        effect: "Long-running operation poll interval when the service sends no Retry-After",
    },
    ConfigOption {
        field: ConfigField::OperationTimeoutSecs,
        name: "operation_timeout_secs",
        env: "ACA_OPERATION_TIMEOUT",
        default: Some("600"),
        effect: "Give up on a create or delete operation after this many seconds",
    },
];

impl ConfigField {
    pub fn option(self) -> &'static ConfigOption {
        OPTIONS
            .iter()
            .find(|o| o.field == self)
            .unwrap_or(&OPTIONS[0])
    }

    pub fn env(self) -> &'static str {
        self.option().env
    }

    pub fn name(self) -> &'static str {
        self.option().name
    }

    /// Whether a set-but-empty variable is a value rather than "unset".
    pub fn accepts_empty(self) -> bool {
        matches!(self, Self::Cmd)
    }
}

fn parse_number<T>(option: &ConfigOption, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            env: option.env,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl SpawnerConfig {
    /// Sets one field from its raw string form, as found in the environment.
    pub fn set_field(&mut self, field: ConfigField, raw: &str) -> Result<()> {
        let option = field.option();
        match field {
            ConfigField::SubscriptionId => self.subscription_id = non_empty(raw),
            ConfigField::ResourceGroup => self.resource_group = non_empty(raw),
            ConfigField::EnvironmentName => self.environment_name = non_empty(raw),
            ConfigField::Region => {
                self.region = non_empty(raw).unwrap_or_else(|| DEFAULT_REGION.to_string())
            }
            ConfigField::AcrServer => self.acr_server = non_empty(raw),
            ConfigField::AcrIdentity => self.acr_identity = non_empty(raw),
            ConfigField::AppName => self.app_name = non_empty(raw),
            ConfigField::Image => self.image = non_empty(raw),
            ConfigField::HubVersion => {
                self.hub_version =
                    non_empty(raw).unwrap_or_else(|| DEFAULT_HUB_VERSION.to_string())
            }
            ConfigField::Cmd => {
                self.cmd = raw.split_whitespace().map(str::to_string).collect();
            }
            ConfigField::Cpu => {
                let cpu: f64 = parse_number(option, raw)?;
                if !(cpu.is_finite() && cpu > 0.0) {
                    return Err(ConfigError::InvalidValue {
                        env: option.env,
                        value: raw.to_string(),
                        reason: "CPU must be a positive number".to_string(),
                    });
                }
                self.cpu = cpu;
            }
            ConfigField::Memory => {
                self.memory = non_empty(raw).unwrap_or_else(|| DEFAULT_MEMORY.to_string())
            }
            ConfigField::TargetPort => self.target_port = parse_port(option, raw)?,
            ConfigField::ExternalPort => self.external_port = parse_port(option, raw)?,
            ConfigField::HubConnectUrl => self.hub_connect_url = non_empty(raw),
            ConfigField::ForwardPrefix => self.forward_prefix = raw.trim().to_string(),
            ConfigField::ArmEndpoint => {
                self.arm_endpoint =
                    non_empty(raw).unwrap_or_else(|| DEFAULT_ARM_ENDPOINT.to_string())
            }
            ConfigField::AuthorityHost => {
                self.authority_host =
                    non_empty(raw).unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string())
            }
            ConfigField::ApiVersion => {
                self.api_version =
                    non_empty(raw).unwrap_or_else(|| DEFAULT_API_VERSION.to_string())
            }
            ConfigField::RequestTimeoutSecs => {
                self.request_timeout_secs = parse_number(option, raw)?
            }
            ConfigField::OperationPollSecs => self.operation_poll_secs = parse_number(option, raw)?,
            ConfigField::OperationTimeoutSecs => {
                self.operation_timeout_secs = parse_number(option, raw)?
            }
        }
        Ok(())
    }

    /// Current value of a field rendered for display; `None` when unset.
    pub fn field_value(&self, field: ConfigField) -> Option<String> {
        match field {
            ConfigField::SubscriptionId => self.subscription_id.clone(),
            ConfigField::ResourceGroup => self.resource_group.clone(),
            ConfigField::EnvironmentName => self.environment_name.clone(),
            ConfigField::Region => Some(self.region.clone()),
            ConfigField::AcrServer => self.acr_server.clone(),
            ConfigField::AcrIdentity => self.acr_identity.clone(),
            ConfigField::AppName => self.app_name.clone(),
            ConfigField::Image => self.image.clone(),
            ConfigField::HubVersion => Some(self.hub_version.clone()),
            ConfigField::Cmd => Some(self.cmd.join(" ")),
            ConfigField::Cpu => Some(self.cpu.to_string()),
            ConfigField::Memory => Some(self.memory.clone()),
            ConfigField::TargetPort => Some(self.target_port.to_string()),
            ConfigField::ExternalPort => Some(self.external_port.to_string()),
            ConfigField::HubConnectUrl => self.hub_connect_url.clone(),
            ConfigField::ForwardPrefix => Some(self.forward_prefix.clone()),
            ConfigField::ArmEndpoint => Some(self.arm_endpoint.clone()),
            ConfigField::AuthorityHost => Some(self.authority_host.clone()),
            ConfigField::ApiVersion => Some(self.api_version.clone()),
            ConfigField::RequestTimeoutSecs => Some(self.request_timeout_secs.to_string()),
            ConfigField::OperationPollSecs => Some(self.operation_poll_secs.to_string()),
            ConfigField::OperationTimeoutSecs => Some(self.operation_timeout_secs.to_string()),
        }
    }
}

fn parse_port(option: &ConfigOption, raw: &str) -> Result<u16> {
    let port: u16 = parse_number(option, raw)?;
    if port == 0 {
        return Err(ConfigError::InvalidValue {
            env: option.env,
            value: raw.to_string(),
            reason: "port must be between 1 and 65535".to_string(),
        });
    }
    Ok(port)
}
