//! In-memory doubles for controller tests.

use crate::client::WorkloadClient;
use crate::credential::{AccessToken, TokenCredential};
use crate::error::{ProviderError, Result};
use crate::factory::{ClientFactory, ClientHandle};
use crate::models::{ContainerApp, Ingress, ProvisioningState, RunningStatus};
use crate::poller::Poller;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Create {
        resource_group: String,
        name: String,
        app: Box<ContainerApp>,
    },
    Get {
        resource_group: String,
        name: String,
    },
    Delete {
        resource_group: String,
        name: String,
    },
}

#[derive(Debug)]
struct MockState {
    calls: Vec<MockCall>,
    app: Option<ContainerApp>,
    /// `get` calls after creation that still report no ingress host; `None` never reports one.
    fqdn_after: Option<usize>,
    gets_since_create: usize,
    fqdn: String,
    provisioning: ProvisioningState,
    running: RunningStatus,
    fail_create_request: bool,
    fail_create_operation: bool,
    fail_get: bool,
    fail_delete: bool,
    closes: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            app: None,
            fqdn_after: Some(0),
            gets_since_create: 0,
            fqdn: "aca.example.swedencentral.azurecontainerapps.io".to_string(),
            provisioning: ProvisioningState::Succeeded,
            running: RunningStatus::Running,
            fail_create_request: false,
            fail_create_operation: false,
            fail_get: false,
            fail_delete: false,
            closes: 0,
        }
    }
}

/// Scriptable [`WorkloadClient`]. Clones share state, so a test keeps one clone for
/// assertions while the factory hands out others.
#[derive(Debug, Clone, Default)]
pub struct MockWorkloadClient {
    state: Arc<Mutex<MockState>>,
}

fn remote_error(message: &str) -> ProviderError {
    ProviderError::Api {
        status: 500,
        code: "InternalServerError".to_string(),
        message: message.to_string(),
    }
}

impl MockWorkloadClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ingress host appears on the `n`-th fetch after creation (0 = immediately).
    pub fn fqdn_after(self, n: usize) -> Self {
        self.lock().fqdn_after = Some(n);
        self
    }

    pub fn fqdn_never(self) -> Self {
        self.lock().fqdn_after = None;
        self
    }

    pub fn fail_create_request(self) -> Self {
        self.lock().fail_create_request = true;
        self
    }

    pub fn fail_create_operation(self) -> Self {
        self.lock().fail_create_operation = true;
        self
    }

    pub fn fail_get(self, fail: bool) -> Self {
        self.lock().fail_get = fail;
        self
    }

    pub fn fail_delete(self, fail: bool) -> Self {
        self.lock().fail_delete = fail;
        self
    }

    pub fn with_status(self, provisioning: ProvisioningState, running: RunningStatus) -> Self {
        {
            let mut state = self.lock();
            state.provisioning = provisioning;
            state.running = running;
        }
        self
    }

    /// Pretends `name` already exists remotely, as after a controller restart.
    pub fn seed_app(self, name: &str) -> Self {
        {
            let mut state = self.lock();
            state.app = Some(ContainerApp {
                name: Some(name.to_string()),
                location: "swedencentral".to_string(),
                ..Default::default()
            });
        }
        self
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.lock().fail_get = fail;
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.lock().fail_delete = fail;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn create_calls(&self) -> Vec<ContainerApp> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Create { app, .. } => Some(app.as_ref().clone()),
                _ => None,
            })
            .collect()
    }

    pub fn get_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Get { .. }))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Delete { .. }))
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn exists(&self) -> bool {
        self.lock().app.is_some()
    }

    fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }
}

#[async_trait]
impl WorkloadClient for MockWorkloadClient {
    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        app: &ContainerApp,
    ) -> Result<Poller<ContainerApp>> {
        let operation = format!("create {name}");
        let mut state = self.lock();
        state.calls.push(MockCall::Create {
            resource_group: resource_group.to_string(),
            name: name.to_string(),
            app: Box::new(app.clone()),
        });

        if state.fail_create_request {
            return Err(remote_error("create rejected"));
        }
        if state.fail_create_operation {
            return Ok(Poller::failed(
                operation.clone(),
                ProviderError::OperationFailed {
                    operation,
                    status: "Failed".to_string(),
                    message: "image pull failed".to_string(),
                },
            ));
        }

        let mut created = app.clone();
        created.name = Some(name.to_string());
        created.properties.provisioning_state = Some(state.provisioning);
        created.properties.running_status = Some(state.running);
        state.app = Some(created.clone());
        state.gets_since_create = 0;
        Ok(Poller::done(operation, created))
    }

    async fn get(&self, resource_group: &str, name: &str) -> Result<ContainerApp> {
        let mut state = self.lock();
        state.calls.push(MockCall::Get {
            resource_group: resource_group.to_string(),
            name: name.to_string(),
        });

        if state.fail_get {
            return Err(remote_error("get failed"));
        }
        let Some(mut app) = state.app.clone() else {
            return Err(ProviderError::NotFound(name.to_string()));
        };

        let seen = state.gets_since_create;
        state.gets_since_create += 1;
        let fqdn_ready = state.fqdn_after.is_some_and(|n| seen >= n);

        app.properties.provisioning_state = Some(state.provisioning);
        app.properties.running_status = Some(state.running);
        let configuration = app.properties.configuration.get_or_insert_with(Default::default);
        let ingress = configuration.ingress.get_or_insert_with(Ingress::default);
        ingress.fqdn = fqdn_ready.then(|| state.fqdn.clone());
        Ok(app)
    }

    async fn begin_delete(&self, resource_group: &str, name: &str) -> Result<Poller<()>> {
        let operation = format!("delete {name}");
        let mut state = self.lock();
        state.calls.push(MockCall::Delete {
            resource_group: resource_group.to_string(),
            name: name.to_string(),
        });

        if state.fail_delete {
            return Ok(Poller::failed(
                operation.clone(),
                ProviderError::OperationFailed {
                    operation,
                    status: "Failed".to_string(),
                    message: "delete failed".to_string(),
                },
            ));
        }
        state.app = None;
        Ok(Poller::done(operation, ()))
    }

    async fn close(&self) -> Result<()> {
        self.lock().closes += 1;
        Ok(())
    }
}

/// Hands out a fixed token.
#[derive(Debug, Default)]
pub struct MockCredential;

#[async_trait]
impl TokenCredential for MockCredential {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
        Ok(AccessToken {
            token: "mock-token".to_string(),
            expires_on: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

/// Factory over a shared [`MockWorkloadClient`].
#[derive(Debug, Clone, Default)]
pub struct MockClientFactory {
    client: MockWorkloadClient,
    fail_acquire: Arc<Mutex<bool>>,
    acquired: Arc<AtomicUsize>,
}

impl MockClientFactory {
    pub fn new(client: MockWorkloadClient) -> Self {
        Self {
            client,
            ..Default::default()
        }
    }

    pub fn client(&self) -> &MockWorkloadClient {
        &self.client
    }

    pub fn set_fail_acquire(&self, fail: bool) {
        *self
            .fail_acquire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fail;
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl ClientFactory for MockClientFactory {
    fn acquire(&self) -> Result<ClientHandle> {
        let fail = *self
            .fail_acquire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if fail {
            return Err(ProviderError::CredentialUnavailable(
                "mock credential disabled".to_string(),
            ));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(ClientHandle::new(
            Arc::new(MockCredential),
            Arc::new(self.client.clone()),
        ))
    }
}
