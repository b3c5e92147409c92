//! Lifecycle controller for one notebook session's container app.

use crate::backoff::Backoff;
use crate::env::{service_prefix, workload_env};
use crate::error::{Result, SpawnerError};
use crate::state::SpawnerState;
use crate::template::build_app;
use aca_config::SpawnerConfig;
use aca_provider::{ClientFactory, ProvisioningState, RunningStatus, WorkloadClient};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const GENERATED_NAME_PREFIX: &str = "aca";
const GENERATED_NAME_LEN: usize = 32;

/// What the hub hands over for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionSpec {
    /// Session variables (`JUPYTERHUB_API_TOKEN`, `JUPYTERHUB_SERVICE_PREFIX`, ...).
    pub env: BTreeMap<String, String>,
}

impl SessionSpec {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self { env }
    }
}

/// Addresses of a started workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEndpoint {
    /// In-environment address the hub proxies to.
    pub url: String,
    /// Public ingress host assigned by the platform.
    pub ingress_fqdn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unprovisioned,
    Provisioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Running,
    /// The app is gone, was never created, or reports an unhealthy state.
    Stopped {
        provisioning_state: Option<ProvisioningState>,
        running_status: Option<RunningStatus>,
    },
    /// The state could not be observed.
    Unreachable { error: String },
}

impl PollOutcome {
    fn gone() -> Self {
        Self::Stopped {
            provisioning_state: None,
            running_status: None,
        }
    }

    pub fn status(&self) -> PollStatus {
        match self {
            Self::Running => PollStatus::Running,
            _ => PollStatus::NotRunning,
        }
    }
}

/// Generated names are `aca` followed by 29 hex characters, within the 32 character limit
/// for app names.
pub fn generate_identity() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}",
        GENERATED_NAME_PREFIX,
        &hex[..GENERATED_NAME_LEN - GENERATED_NAME_PREFIX.len()]
    )
}

/// Provisions, watches and removes one container app.
///
/// `running_name` is the only state that survives a restart: it is set once a create has
/// been confirmed and cleared once the app is deleted (or when a start fails before the
/// app exists).
pub struct WorkloadSpawner {
    config: SpawnerConfig,
    session: SessionSpec,
    factory: Arc<dyn ClientFactory>,
    identity: String,
    running_name: Option<String>,
    backoff: Backoff,
}

impl fmt::Debug for WorkloadSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadSpawner")
            .field("identity", &self.identity)
            .field("running_name", &self.running_name)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl WorkloadSpawner {
    pub fn new(config: SpawnerConfig, session: SessionSpec, factory: Arc<dyn ClientFactory>) -> Self {
        let identity = match config.app_name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => generate_identity(),
        };
        debug!("Session workload name: {}", identity);

        Self {
            config,
            session,
            factory,
            identity,
            running_name: None,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn running_name(&self) -> Option<&str> {
        self.running_name.as_deref()
    }

    pub fn config(&self) -> &SpawnerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        match self.running_name {
            Some(_) => Phase::Provisioned,
            None => Phase::Unprovisioned,
        }
    }

    /// Creates the app and waits until it has an ingress host.
    ///
    /// Failures before the create is confirmed leave no tracked workload. Once it is
    /// confirmed the name stays tracked even if the ingress never shows up; see
    /// [`SpawnerError::is_provisioning_incomplete`].
    #[instrument(skip(self), fields(name = %self.identity))]
    pub async fn start(&mut self) -> Result<WorkloadEndpoint> {
        if let Some(running) = &self.running_name {
            return Err(SpawnerError::InvalidState(format!(
                "container app {running} is already running"
            )));
        }

        let handle = match self.factory.acquire() {
            Ok(handle) => handle,
            Err(e) => {
                self.clear_state();
                error!("Error creating container app {}: {}", self.identity, e);
                return Err(SpawnerError::provider(&self.identity, e));
            }
        };

        let result = match self.create(handle.client()).await {
            Ok(name) => {
                self.running_name = Some(name.clone());
                info!("Container app {} created", name);
                self.wait_for_ingress(handle.client(), &name).await
            }
            Err(e) => {
                self.clear_state();
                error!("Error creating container app {}: {}", self.identity, e);
                Err(e)
            }
        };
        handle.release().await;

        let fqdn = result?;
        Ok(WorkloadEndpoint {
            url: format!("http://{}:{}", self.identity, self.config.target_port),
            ingress_fqdn: fqdn,
        })
    }

    /// Submits the app document and awaits the operation. Returns the created name.
    async fn create(&self, client: &dyn WorkloadClient) -> Result<String> {
        let resource_group = self.config.resource_group()?;
        let environment_id = self.config.managed_environment_id()?;
        info!(
            "Creating container app {} in environment {}",
            self.identity, environment_id
        );

        let env = workload_env(&self.config, &self.session.env)?;
        let app = build_app(&self.config, env, service_prefix(&self.session.env))?;

        let poller = client
            .begin_create_or_update(resource_group, &self.identity, &app)
            .await
            .map_err(|e| SpawnerError::provider(&self.identity, e))?;
        poller
            .result()
            .await
            .map_err(|e| SpawnerError::provider(&self.identity, e))?;
        Ok(self.identity.clone())
    }

    /// The host name is not assigned together with the create result, so re-read the app
    /// a bounded number of times.
    async fn wait_for_ingress(&self, client: &dyn WorkloadClient, name: &str) -> Result<String> {
        let resource_group = self.config.resource_group()?;

        for attempt in 0..self.backoff.attempts {
            let app = client.get(resource_group, name).await.map_err(|e| {
                error!("Error fetching container app {}: {}", name, e);
                SpawnerError::provider(name, e)
            })?;
            if let Some(fqdn) = app.ingress_fqdn() {
                info!("Container app {} reachable at {}", name, fqdn);
                return Ok(fqdn.to_string());
            }

            let delay = self.backoff.delay(attempt);
            debug!(
                "Ingress for {} not assigned yet (attempt {}/{}), retrying in {:?}",
                name,
                attempt + 1,
                self.backoff.attempts,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        error!(
            "Container app {} has no ingress host after {} attempts",
            name, self.backoff.attempts
        );
        Err(SpawnerError::IngressNotReady {
            name: name.to_string(),
            attempts: self.backoff.attempts,
        })
    }

    /// Deletes the tracked app. Nothing tracked means nothing to do.
    ///
    /// `now` is only recorded; deletion is immediate either way.
    #[instrument(skip(self), fields(name = ?self.running_name))]
    pub async fn stop(&mut self, now: bool) -> Result<()> {
        let Some(name) = self.running_name.clone() else {
            debug!("No container app to delete");
            return Ok(());
        };
        let resource_group = self.config.resource_group()?.to_string();

        let handle = self.factory.acquire().map_err(|e| {
            error!("Error deleting container app {}: {}", name, e);
            SpawnerError::provider(&name, e)
        })?;

        info!("Deleting container app {} (now: {})", name, now);
        let result = async {
            handle
                .client()
                .begin_delete(&resource_group, &name)
                .await?
                .result()
                .await
        }
        .await;
        handle.release().await;

        match result {
            Ok(()) => {
                self.clear_state();
                info!("Successfully deleted container app {}", name);
                Ok(())
            }
            Err(e) => {
                error!("Error deleting container app {}: {}", name, e);
                Err(SpawnerError::provider(&name, e))
            }
        }
    }

    /// `Running` only when the app reports both a succeeded provisioning state and a
    /// running status. Never fails.
    pub async fn poll(&mut self) -> PollStatus {
        self.poll_detailed().await.status()
    }

    #[instrument(skip(self), fields(name = ?self.running_name))]
    pub async fn poll_detailed(&mut self) -> PollOutcome {
        let Some(name) = self.running_name.clone() else {
            return PollOutcome::gone();
        };
        let resource_group = match self.config.resource_group() {
            Ok(rg) => rg.to_string(),
            Err(e) => {
                error!("Error polling container app {}: {}", name, e);
                return PollOutcome::Unreachable {
                    error: e.to_string(),
                };
            }
        };

        let handle = match self.factory.acquire() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Error polling container app {}: {}", name, e);
                return PollOutcome::Unreachable {
                    error: e.to_string(),
                };
            }
        };

        info!("Polling container app {}", name);
        let result = handle.client().get(&resource_group, &name).await;
        handle.release().await;

        match result {
            Ok(app) if app.is_running() => PollOutcome::Running,
            Ok(app) => {
                debug!(
                    "Container app {} is {:?}/{:?}",
                    name,
                    app.provisioning_state(),
                    app.running_status()
                );
                PollOutcome::Stopped {
                    provisioning_state: app.provisioning_state(),
                    running_status: app.running_status(),
                }
            }
            Err(e) if e.is_not_found() => {
                warn!("Container app {} no longer exists", name);
                PollOutcome::gone()
            }
            Err(e) => {
                error!("Error polling container app {}: {}", name, e);
                PollOutcome::Unreachable {
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn get_state(&self) -> SpawnerState {
        SpawnerState::new(self.running_name.clone())
    }

    /// Applies a stored document; an absent name keeps the current one.
    pub fn load_state(&mut self, value: &Value) {
        self.apply_state(SpawnerState::from_value(value));
    }

    pub fn apply_state(&mut self, state: SpawnerState) {
        if let Some(name) = state.aca_running_name {
            debug!("Reattached to container app {}", name);
            self.running_name = Some(name);
        }
    }

    pub fn clear_state(&mut self) {
        self.running_name = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity() {
        let a = generate_identity();
        let b = generate_identity();
        assert_eq!(a.len(), 32);
        assert!(a.starts_with("aca"));
        assert!(a[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_poll_outcome_status() {
        assert_eq!(PollOutcome::Running.status(), PollStatus::Running);
        assert_eq!(PollOutcome::gone().status(), PollStatus::NotRunning);
        assert_eq!(
            PollOutcome::Unreachable {
                error: "timeout".to_string()
            }
            .status(),
            PollStatus::NotRunning
        );
    }
}
