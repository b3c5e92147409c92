// CLI argument parsing and command dispatch

use crate::spawner::{PollOutcome, SessionSpec, WorkloadSpawner};
use crate::state::{SpawnerState, StateFile};
use aca_config::{SpawnerConfig, OPTIONS};
use aca_provider::{AzureClientFactory, ClientFactory};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Parser)]
#[command(name = "aca-spawner")]
#[command(about = "Run a JupyterHub single-user server as an Azure Container App")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// YAML configuration file; environment variables override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Session state file shared between invocations
    #[arg(long, global = true, default_value = "aca-spawner-state.json")]
    pub state: PathBuf,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the container app and wait for its ingress
    Start {
        /// Session variable passed to the server (repeatable)
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Report whether the tracked container app is running (exit code 1 when not)
    Poll,
    /// Delete the tracked container app
    Stop {
        /// Stop immediately
        #[arg(long)]
        now: bool,
    },
    /// Print the stored session state
    State,
    /// Print every configuration option with its resolved value
    Config,
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Executes one command against the state file.
pub async fn run(args: Args) -> Result<ExitCode> {
    let config =
        SpawnerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let factory: Arc<dyn ClientFactory> = Arc::new(AzureClientFactory::from_config(&config));
    run_with(args, config, factory).await
}

/// Same as [`run`] with an already loaded configuration and client factory.
pub async fn run_with(
    args: Args,
    config: SpawnerConfig,
    factory: Arc<dyn ClientFactory>,
) -> Result<ExitCode> {
    let state_file = StateFile::new(&args.state);

    match args.command {
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
        Command::State => {
            let state = state_file.load()?;
            println!("{}", serde_json::to_string_pretty(&state.to_value())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Start { env } => {
            let session = SessionSpec::new(env.into_iter().collect::<BTreeMap<_, _>>());
            let mut spawner = spawner(config, session, factory, &state_file)?;

            let result = spawner.start().await;
            let endpoint = save_after(&state_file, &spawner.get_state(), result)?;

            info!("Session state saved to {}", state_file.path().display());
            println!("{}", endpoint.url);
            println!("https://{}", endpoint.ingress_fqdn);
            Ok(ExitCode::SUCCESS)
        }
        Command::Poll => {
            let mut spawner = spawner(config, SessionSpec::default(), factory, &state_file)?;
            match spawner.poll_detailed().await {
                PollOutcome::Running => {
                    println!("running");
                    Ok(ExitCode::SUCCESS)
                }
                PollOutcome::Stopped {
                    provisioning_state,
                    running_status,
                } => {
                    let describe = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
                    println!(
                        "not running (provisioning: {}, status: {})",
                        describe(provisioning_state.map(|s| s.to_string())),
                        describe(running_status.map(|s| s.to_string()))
                    );
                    Ok(ExitCode::FAILURE)
                }
                PollOutcome::Unreachable { error } => {
                    println!("not running (unreachable: {error})");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Stop { now } => {
            let mut spawner = spawner(config, SessionSpec::default(), factory, &state_file)?;
            let result = spawner.stop(now).await;
            save_after(&state_file, &spawner.get_state(), result)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn spawner(
    config: SpawnerConfig,
    session: SessionSpec,
    factory: Arc<dyn ClientFactory>,
    state_file: &StateFile,
) -> Result<WorkloadSpawner> {
    let mut spawner = WorkloadSpawner::new(config, session, factory);
    spawner.apply_state(state_file.load()?);
    Ok(spawner)
}

/// Saves the state whatever the outcome; an operation error takes precedence over a
/// failed save.
fn save_after<T>(
    state_file: &StateFile,
    state: &SpawnerState,
    result: crate::Result<T>,
) -> Result<T> {
    match (result, state_file.save(state)) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e).context("Failed to save session state"),
        (Err(e), Ok(())) => Err(e.into()),
        (Err(e), Err(save_err)) => {
            error!(
                "Failed to save session state to {}: {}",
                state_file.path().display(),
                save_err
            );
            Err(e.into())
        }
    }
}

fn print_config(config: &SpawnerConfig) {
    println!("{:<22} {:<34} {:<28} EFFECT", "OPTION", "VARIABLE", "VALUE");
    for option in OPTIONS {
        let value = config
            .field_value(option.field)
            .unwrap_or_else(|| "(unset)".to_string());
        println!(
            "{:<22} {:<34} {:<28} {}",
            option.name, option.env, value, option.effect
        );
    }
}
