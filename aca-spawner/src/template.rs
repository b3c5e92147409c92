//! Container app document for one notebook session.

use aca_config::{ConfigError, SpawnerConfig};
use aca_provider::{
    Configuration, Container, ContainerApp, ContainerAppProperties, ContainerResources,
    EnvironmentVar, Ingress, RegistryCredentials, Scale, Template, TrafficWeight,
};

pub const CONTAINER_NAME: &str = "container";

/// Notebook server arguments; the command itself comes from configuration.
pub fn server_args(target_port: u16, base_url: &str) -> Vec<String> {
    vec![
        "--debug".to_string(),
        "--ip=0.0.0.0".to_string(),
        format!("--port={target_port}"),
        "--ServerApp.trust_xheaders=True".to_string(),
        "--ServerApp.allow_remote_access=True".to_string(),
        format!("--ServerApp.base_url={base_url}"),
    ]
}

/// Builds the app: one container, external ingress on the target port with all traffic on
/// the latest revision, a single registry pulled with a managed identity, and exactly one
/// replica.
pub fn build_app(
    config: &SpawnerConfig,
    env: Vec<EnvironmentVar>,
    base_url: &str,
) -> Result<ContainerApp, ConfigError> {
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: config.image_ref()?,
        command: config.command(),
        args: server_args(config.target_port, base_url),
        env,
        resources: Some(ContainerResources {
            cpu: config.cpu,
            memory: config.memory.clone(),
        }),
    };

    Ok(ContainerApp {
        id: None,
        name: None,
        location: config.region.clone(),
        properties: ContainerAppProperties {
            managed_environment_id: Some(config.managed_environment_id()?),
            configuration: Some(Configuration {
                ingress: Some(Ingress {
                    external: true,
                    target_port: config.target_port,
                    allow_insecure: false,
                    traffic: vec![TrafficWeight::latest()],
                    fqdn: None,
                }),
                registries: vec![RegistryCredentials {
                    server: config.acr_server()?.to_string(),
                    identity: Some(config.acr_identity()?.to_string()),
                }],
            }),
            template: Some(Template {
                containers: vec![container],
                scale: Some(Scale::single_instance()),
            }),
            provisioning_state: None,
            running_status: None,
        },
    })
}
