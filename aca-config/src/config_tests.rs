use crate::{ConfigError, ConfigField, SpawnerConfig, OPTIONS};
use std::collections::HashMap;
use std::io::Write;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn load(pairs: &[(&str, &str)]) -> SpawnerConfig {
    SpawnerConfig::load_with(None, &vars(pairs)).expect("config should load")
}

#[test]
fn test_defaults() {
    let config = load(&[]);

    assert_eq!(config.region, "swedencentral");
    assert_eq!(config.cpu, 1.0);
    assert_eq!(config.memory, "2Gi");
    assert_eq!(config.target_port, 8888);
    assert_eq!(config.external_port, 80);
    assert_eq!(config.cmd, vec!["start-notebook.py".to_string()]);
    assert!(config.app_name.is_none());
    assert!(config.hub_connect_url.is_none());
    assert!(config.forwarded_env.is_empty());
}

#[test]
fn test_environment_overrides() {
    let config = load(&[
        ("AZURE_SUBSCRIPTION_ID", "sub1"),
        ("AZURE_RESOURCE_GROUP", "rg1"),
        ("AZURE_ACA_ENVIRONMENT_NAME", "env1"),
        ("AZURE_REGION", "westeurope"),
        ("ACA_CPU", "0.5"),
        ("ACA_MEMORY", "1Gi"),
        ("ACA_TARGET_PORT", "9999"),
        ("ACA_CMD", "jupyterhub-singleuser --allow-root"),
    ]);

    assert_eq!(config.subscription_id().unwrap(), "sub1");
    assert_eq!(config.resource_group().unwrap(), "rg1");
    assert_eq!(config.region, "westeurope");
    assert_eq!(config.cpu, 0.5);
    assert_eq!(config.memory, "1Gi");
    assert_eq!(config.target_port, 9999);
    assert_eq!(
        config.command(),
        Some(vec![
            "jupyterhub-singleuser".to_string(),
            "--allow-root".to_string()
        ])
    );
    assert_eq!(
        config.managed_environment_id().unwrap(),
        "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.App/managedEnvironments/env1"
    );
}

#[test]
fn test_empty_region_keeps_default() {
    let config = load(&[("AZURE_REGION", "")]);
    assert_eq!(config.region, "swedencentral");
}

#[test]
fn test_invalid_numbers_are_rejected() {
    let err = SpawnerConfig::load_with(None, &vars(&[("ACA_TARGET_PORT", "http")])).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidValue {
            env: "ACA_TARGET_PORT",
            ..
        }
    ));

    let err = SpawnerConfig::load_with(None, &vars(&[("ACA_TARGET_PORT", "0")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));

    let err = SpawnerConfig::load_with(None, &vars(&[("ACA_CPU", "-1")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { env: "ACA_CPU", .. }));
}

#[test]
fn test_missing_values_surface_on_use() {
    let config = load(&[]);

    match config.hub_api_url() {
        Err(ConfigError::Missing { field, env }) => {
            assert_eq!(field, "hub_connect_url");
            assert_eq!(env, "JUPYTERHUB_HUB_CONNECT_URL");
        }
        other => panic!("expected missing hub connect url, got {other:?}"),
    }
    assert!(matches!(
        config.managed_environment_id(),
        Err(ConfigError::Missing {
            env: "AZURE_SUBSCRIPTION_ID",
            ..
        })
    ));
}

#[test]
fn test_hub_api_url_strips_trailing_slash() {
    let config = load(&[("JUPYTERHUB_HUB_CONNECT_URL", "https://hub.example.org/")]);
    assert_eq!(
        config.hub_api_url().unwrap(),
        "https://hub.example.org/hub/api"
    );

    let config = load(&[("JUPYTERHUB_HUB_CONNECT_URL", "http://10.0.0.4:8081")]);
    assert_eq!(config.hub_api_url().unwrap(), "http://10.0.0.4:8081/hub/api");
}

#[test]
fn test_image_defaults_to_registry_singleuser() {
    let config = load(&[("AZURE_ACR_SERVER", "myacr.azurecr.io")]);
    assert_eq!(
        config.image_ref().unwrap(),
        "myacr.azurecr.io/jupyterhub/singleuser:5.3"
    );

    let config = load(&[("ACA_IMAGE", "repo/image:tag")]);
    assert_eq!(config.image_ref().unwrap(), "repo/image:tag");

    let config = load(&[]);
    assert!(config.image_ref().is_err());
}

#[test]
fn test_forwarded_env_uses_prefix() {
    let config = load(&[
        ("AZURE_CLIENT_ID", "client"),
        ("AZURE_TENANT_ID", "tenant"),
        ("HOME", "/root"),
    ]);
    assert_eq!(config.forwarded_env.len(), 2);
    assert_eq!(config.forwarded_env["AZURE_CLIENT_ID"], "client");
    assert!(!config.forwarded_env.contains_key("HOME"));

    let config = load(&[
        ("ACA_FORWARD_PREFIX", "NB_"),
        ("NB_USER", "jovyan"),
        ("AZURE_CLIENT_ID", "client"),
    ]);
    assert_eq!(config.forwarded_env.len(), 1);
    assert_eq!(config.forwarded_env["NB_USER"], "jovyan");
}

#[test]
fn test_yaml_file_then_environment() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "subscription_id: sub-from-file\nresource_group: rg-from-file\nmemory: 4Gi\ncmd: []"
    )
    .unwrap();

    let config = SpawnerConfig::load_with(
        Some(file.path()),
        &vars(&[("AZURE_RESOURCE_GROUP", "rg-from-env")]),
    )
    .unwrap();

    assert_eq!(config.subscription_id().unwrap(), "sub-from-file");
    assert_eq!(config.resource_group().unwrap(), "rg-from-env");
    assert_eq!(config.memory, "4Gi");
    assert_eq!(config.region, "swedencentral");
    assert_eq!(config.command(), None);
}

#[test]
fn test_invalid_yaml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "target_port: [not, a, port]").unwrap();

    let err = SpawnerConfig::load_with(Some(file.path()), &HashMap::new()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_option_table_covers_every_field() {
    let config = load(&[]);
    for option in OPTIONS {
        assert_eq!(option.field.env(), option.env);
        if let Some(default) = option.default {
            let value = config.field_value(option.field).unwrap();
            if option.field == ConfigField::Cpu {
                assert_eq!(value.parse::<f64>().unwrap(), 1.0);
            } else {
                assert_eq!(value, default, "default mismatch for {}", option.name);
            }
        }
    }
}

#[test]
fn test_credential_env_ignores_forward_prefix() {
    let config = load(&[
        ("ACA_FORWARD_PREFIX", "NB_"),
        ("AZURE_TENANT_ID", "tenant"),
        ("AZURE_CLIENT_SECRET", "secret"),
    ]);
    assert!(config.forwarded_env.is_empty());
    assert_eq!(config.credential_env.len(), 2);
    assert_eq!(config.credential_env["AZURE_TENANT_ID"], "tenant");
}

#[test]
fn test_empty_cmd_clears_override() {
    assert_eq!(load(&[("ACA_CMD", "")]).command(), None);
    assert_eq!(load(&[("ACA_CMD", "  ")]).command(), None);
    assert_eq!(
        load(&[]).command(),
        Some(vec!["start-notebook.py".to_string()])
    );
    assert_eq!(
        load(&[("ACA_CMD", "jupyterhub-singleuser --debug")]).command(),
        Some(vec![
            "jupyterhub-singleuser".to_string(),
            "--debug".to_string()
        ])
    );
}

#[test]
fn test_empty_variables_keep_defaults() {
    let config = load(&[("ACA_MEMORY", ""), ("ACA_TARGET_PORT", " ")]);
    assert_eq!(config.memory, "2Gi");
    assert_eq!(config.target_port, 8888);
}

#[test]
fn test_operation_timeout() {
    assert_eq!(load(&[]).operation_timeout().as_secs(), 600);
    let config = load(&[("ACA_OPERATION_TIMEOUT", "30")]);
    assert_eq!(config.operation_timeout().as_secs(), 30);
}
