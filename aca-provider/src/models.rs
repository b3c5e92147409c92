//! Container app resource models.
//!
//! These mirror the `Microsoft.App/containerApps` resource document closely enough to be
//! sent and received as-is. Read-only fields (`provisioningState`, `runningStatus`,
//! `fqdn`) are optional and skipped when absent.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerApp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub properties: ContainerAppProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerAppProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_environment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Configuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<ProvisioningState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_status: Option<RunningStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<RegistryCredentials>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub target_port: u16,
    #[serde(default)]
    pub allow_insecure: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traffic: Vec<TrafficWeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficWeight {
    pub weight: u32,
    #[serde(default)]
    pub latest_revision: bool,
}

impl TrafficWeight {
    /// All traffic to the newest revision.
    pub fn latest() -> Self {
        Self {
            weight: 100,
            latest_revision: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvironmentVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ContainerResources>,
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

// Values routinely carry tokens; keep them out of debug output.
impl fmt::Debug for EnvironmentVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentVar")
            .field("name", &self.name)
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResources {
    pub cpu: f64,
    pub memory: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    pub min_replicas: u32,
    pub max_replicas: u32,
}

impl Scale {
    /// Exactly one replica; notebook sessions cannot be spread across instances.
    pub fn single_instance() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProvisioningState {
    InProgress,
    Succeeded,
    Failed,
    Canceled,
    Deleting,
    #[serde(other)]
    Unknown,
}

impl ProvisioningState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::Deleting => "Deleting",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunningStatus {
    Running,
    Stopped,
    Progressing,
    Degraded,
    Suspended,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RunningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Progressing => "Progressing",
            Self::Degraded => "Degraded",
            Self::Suspended => "Suspended",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl ContainerApp {
    pub fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.properties.provisioning_state
    }

    pub fn running_status(&self) -> Option<RunningStatus> {
        self.properties.running_status
    }

    /// Externally reachable ingress host name, once the platform has assigned one.
    pub fn ingress_fqdn(&self) -> Option<&str> {
        self.properties
            .configuration
            .as_ref()
            .and_then(|c| c.ingress.as_ref())
            .and_then(|i| i.fqdn.as_deref())
            .filter(|fqdn| !fqdn.is_empty())
    }

    /// Both remote fields report success.
    pub fn is_running(&self) -> bool {
        self.provisioning_state() == Some(ProvisioningState::Succeeded)
            && self.running_status() == Some(RunningStatus::Running)
    }
}
