//! Credential and client acquisition.

use crate::arm::{ArmClient, ArmClientOptions};
use crate::client::WorkloadClient;
use crate::credential::{ChainedTokenCredential, CredentialSource, TokenCredential};
use crate::error::Result;
use aca_config::SpawnerConfig;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces a fresh credential/client pair per lifecycle call.
pub trait ClientFactory: Send + Sync {
    fn acquire(&self) -> Result<ClientHandle>;
}

/// A credential and a client bound to one subscription.
///
/// Call [`ClientHandle::release`] when done. A handle dropped without release closes
/// itself on the current tokio runtime, if there is one.
pub struct ClientHandle {
    credential: Arc<dyn TokenCredential>,
    client: Arc<dyn WorkloadClient>,
    released: bool,
}

impl ClientHandle {
    pub fn new(credential: Arc<dyn TokenCredential>, client: Arc<dyn WorkloadClient>) -> Self {
        Self {
            credential,
            client,
            released: false,
        }
    }

    pub fn client(&self) -> &dyn WorkloadClient {
        self.client.as_ref()
    }

    pub fn credential(&self) -> &dyn TokenCredential {
        self.credential.as_ref()
    }

    /// Closes the client, then the credential. Close failures are logged, not returned.
    pub async fn release(mut self) {
        self.released = true;
        close_pair(self.client.clone(), self.credential.clone()).await;
    }
}

async fn close_pair(client: Arc<dyn WorkloadClient>, credential: Arc<dyn TokenCredential>) {
    if let Err(e) = client.close().await {
        warn!("Failed to close workload client: {}", e);
    }
    if let Err(e) = credential.close().await {
        warn!("Failed to close {} credential: {}", credential.name(), e);
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Client handle dropped without release; closing in background");
                runtime.spawn(close_pair(self.client.clone(), self.credential.clone()));
            }
            Err(_) => warn!("Client handle dropped outside a runtime; connections not closed"),
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("credential", &self.credential.name())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Builds [`ArmClient`]s authenticated by a [`ChainedTokenCredential`].
#[derive(Debug, Clone)]
pub struct AzureClientFactory {
    subscription_id: Option<String>,
    authority_host: String,
    sources: Vec<CredentialSource>,
    env: BTreeMap<String, String>,
    options: ArmClientOptions,
}

impl AzureClientFactory {
    pub fn from_config(config: &SpawnerConfig) -> Self {
        Self {
            subscription_id: config.subscription_id.clone(),
            authority_host: config.authority_host.clone(),
            sources: CredentialSource::default_order(),
            env: config.credential_env.clone(),
            options: ArmClientOptions::from_config(config),
        }
    }

    /// Replaces the credential order.
    pub fn with_sources(mut self, sources: Vec<CredentialSource>) -> Self {
        self.sources = sources;
        self
    }
}

impl ClientFactory for AzureClientFactory {
    fn acquire(&self) -> Result<ClientHandle> {
        let subscription_id = self
            .subscription_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(aca_config::ConfigError::Missing {
                field: aca_config::ConfigField::SubscriptionId.name(),
                env: aca_config::ConfigField::SubscriptionId.env(),
            })?;

        let http = ArmClient::http_client(self.options.timeout)?;
        let credential: Arc<dyn TokenCredential> = Arc::new(ChainedTokenCredential::from_sources(
            &self.sources,
            http.clone(),
            &self.authority_host,
            &self.env,
        ));
        let client = ArmClient::new(
            http,
            credential.clone(),
            subscription_id,
            self.options.clone(),
        );

        Ok(ClientHandle::new(credential, Arc::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use aca_config::ConfigError;

    #[test]
    fn test_acquire_requires_subscription() {
        let factory = AzureClientFactory::from_config(&SpawnerConfig::default());
        match factory.acquire() {
            Err(ProviderError::Config(ConfigError::Missing { env, .. })) => {
                assert_eq!(env, "AZURE_SUBSCRIPTION_ID");
            }
            other => panic!("expected missing subscription, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let config = SpawnerConfig::from_vars([(
            "AZURE_SUBSCRIPTION_ID".to_string(),
            "sub1".to_string(),
        )])
        .unwrap();
        let handle = AzureClientFactory::from_config(&config)
            .with_sources(vec![CredentialSource::Environment])
            .acquire()
            .unwrap();
        assert_eq!(handle.credential().name(), "chained");
        handle.release().await;
    }
}
