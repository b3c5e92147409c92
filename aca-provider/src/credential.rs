//! Token credentials for the resource manager.
//!
//! Only headless sources are offered: a service principal secret from the environment and
//! a federated workload identity token file. Interactive, cached and developer-tool
//! credentials have no place in a long-running service and are not implemented.
//!
//! Every source reads its settings from the variable map captured in the spawner
//! configuration, never from the live process environment.

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const AZURE_FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Tokens this close to expiry are refreshed instead of reused.
const EXPIRY_MARGIN_SECS: i64 = 300;

#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self) -> bool {
        self.expires_on - Utc::now() > ChronoDuration::seconds(EXPIRY_MARGIN_SECS)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns a bearer token for `scope` (for example `https://management.azure.com/.default`).
    ///
    /// [`ProviderError::CredentialUnavailable`] means the source is not configured, which a
    /// chain treats as "try the next one".
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Credential sources, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    WorkloadIdentity,
}

impl CredentialSource {
    /// Environment credentials take priority over workload identity.
    pub fn default_order() -> Vec<CredentialSource> {
        vec![CredentialSource::Environment, CredentialSource::WorkloadIdentity]
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

async fn request_token(
    http: &reqwest::Client,
    authority_host: &str,
    tenant_id: &str,
    form: &[(&str, &str)],
) -> Result<AccessToken> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        authority_host.trim_end_matches('/'),
        tenant_id
    );
    let response = http.post(&url).form(form).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let detail: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        return Err(ProviderError::Authentication(format!(
            "token request to {url} returned {status}: {} {}",
            detail.error, detail.error_description
        )));
    }

    let token: TokenResponse = serde_json::from_str(&body)?;
    Ok(AccessToken {
        token: token.access_token,
        expires_on: Utc::now() + ChronoDuration::seconds(token.expires_in as i64),
    })
}

fn lookup(env: &BTreeMap<String, String>, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.trim().is_empty()).cloned()
}

/// Service principal with a client secret (`AZURE_TENANT_ID`, `AZURE_CLIENT_ID`,
/// `AZURE_CLIENT_SECRET`).
pub struct EnvironmentCredential {
    http: reqwest::Client,
    authority_host: String,
    settings: Option<(String, String, String)>,
}

impl EnvironmentCredential {
    pub fn new(
        http: reqwest::Client,
        authority_host: impl Into<String>,
        env: &BTreeMap<String, String>,
    ) -> Self {
        let settings = match (
            lookup(env, AZURE_TENANT_ID),
            lookup(env, AZURE_CLIENT_ID),
            lookup(env, AZURE_CLIENT_SECRET),
        ) {
            (Some(tenant), Some(client), Some(secret)) => Some((tenant, client, secret)),
            _ => None,
        };
        Self {
            http,
            authority_host: authority_host.into(),
            settings,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_some()
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let (tenant, client_id, secret) = self.settings.as_ref().ok_or_else(|| {
            ProviderError::CredentialUnavailable(format!(
                "environment credential needs {AZURE_TENANT_ID}, {AZURE_CLIENT_ID} and {AZURE_CLIENT_SECRET}"
            ))
        })?;

        request_token(
            &self.http,
            &self.authority_host,
            tenant,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", secret),
                ("scope", scope),
            ],
        )
        .await
    }
}

/// Federated token exchange for workloads running with an injected identity token file.
pub struct WorkloadIdentityCredential {
    http: reqwest::Client,
    authority_host: String,
    settings: Option<(String, String, PathBuf)>,
}

impl WorkloadIdentityCredential {
    pub fn new(
        http: reqwest::Client,
        authority_host: impl Into<String>,
        env: &BTreeMap<String, String>,
    ) -> Self {
        let settings = match (
            lookup(env, AZURE_TENANT_ID),
            lookup(env, AZURE_CLIENT_ID),
            lookup(env, AZURE_FEDERATED_TOKEN_FILE),
        ) {
            (Some(tenant), Some(client), Some(file)) => Some((tenant, client, PathBuf::from(file))),
            _ => None,
        };
        Self {
            http,
            authority_host: authority_host.into(),
            settings,
        }
    }
}

#[async_trait]
impl TokenCredential for WorkloadIdentityCredential {
    fn name(&self) -> &'static str {
        "workload-identity"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let (tenant, client_id, token_file) = self.settings.as_ref().ok_or_else(|| {
            ProviderError::CredentialUnavailable(format!(
                "workload identity needs {AZURE_TENANT_ID}, {AZURE_CLIENT_ID} and {AZURE_FEDERATED_TOKEN_FILE}"
            ))
        })?;

        // The file is rotated by the platform; read it on every exchange.
        let assertion = tokio::fs::read_to_string(token_file).await.map_err(|e| {
            ProviderError::CredentialUnavailable(format!(
                "cannot read federated token file {}: {e}",
                token_file.display()
            ))
        })?;

        request_token(
            &self.http,
            &self.authority_host,
            tenant,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                ("client_assertion", assertion.trim()),
                ("scope", scope),
            ],
        )
        .await
    }
}

/// Tries each credential in order and remembers tokens per scope until they near expiry.
pub struct ChainedTokenCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl ChainedTokenCredential {
    pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            sources,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the chain for `order` from the captured environment.
    pub fn from_sources(
        order: &[CredentialSource],
        http: reqwest::Client,
        authority_host: &str,
        env: &BTreeMap<String, String>,
    ) -> Self {
        let sources = order
            .iter()
            .map(|source| -> Arc<dyn TokenCredential> {
                match source {
                    CredentialSource::Environment => Arc::new(EnvironmentCredential::new(
                        http.clone(),
                        authority_host,
                        env,
                    )),
                    CredentialSource::WorkloadIdentity => Arc::new(
                        WorkloadIdentityCredential::new(http.clone(), authority_host, env),
                    ),
                }
            })
            .collect();
        Self::new(sources)
    }
}

#[async_trait]
impl TokenCredential for ChainedTokenCredential {
    fn name(&self) -> &'static str {
        "chained"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(scope).filter(|t| t.is_fresh()) {
            return Ok(token.clone());
        }

        let mut unavailable = Vec::new();
        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    debug!("Acquired token from {} credential", source.name());
                    cache.insert(scope.to_string(), token.clone());
                    return Ok(token);
                }
                Err(ProviderError::CredentialUnavailable(reason)) => {
                    debug!("{} credential unavailable: {}", source.name(), reason);
                    unavailable.push(format!("{}: {}", source.name(), reason));
                }
                Err(e) => {
                    warn!("{} credential failed: {}", source.name(), e);
                    return Err(e);
                }
            }
        }

        Err(ProviderError::CredentialUnavailable(if unavailable.is_empty() {
            "no credential sources configured".to_string()
        } else {
            unavailable.join("; ")
        }))
    }

    async fn close(&self) -> Result<()> {
        self.cache.lock().await.clear();
        for source in &self.sources {
            source.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        outcome: fn() -> Result<AccessToken>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, outcome: fn() -> Result<AccessToken>) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TokenCredential for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn token() -> Result<AccessToken> {
        Ok(AccessToken {
            token: "t0k3n".to_string(),
            expires_on: Utc::now() + ChronoDuration::hours(1),
        })
    }

    fn unavailable() -> Result<AccessToken> {
        Err(ProviderError::CredentialUnavailable("not set".to_string()))
    }

    fn rejected() -> Result<AccessToken> {
        Err(ProviderError::Authentication("invalid_client".to_string()))
    }

    #[tokio::test]
    async fn test_chain_skips_unavailable_sources() {
        let first = Fixed::new("first", unavailable);
        let second = Fixed::new("second", token);
        let chain = ChainedTokenCredential::new(vec![first.clone(), second.clone()]);

        let token = chain.get_token("scope/.default").await.unwrap();
        assert_eq!(token.token, "t0k3n");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);

        // Cached on the second call.
        chain.get_token("scope/.default").await.unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chain_stops_on_authentication_failure() {
        let first = Fixed::new("first", rejected);
        let second = Fixed::new("second", token);
        let chain = ChainedTokenCredential::new(vec![first, second.clone()]);

        let err = chain.get_token("scope/.default").await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_environment() {
        let env = BTreeMap::new();
        let chain = ChainedTokenCredential::from_sources(
            &CredentialSource::default_order(),
            reqwest::Client::new(),
            "https://login.microsoftonline.com",
            &env,
        );

        let err = chain.get_token("scope/.default").await.unwrap_err();
        match err {
            ProviderError::CredentialUnavailable(msg) => {
                assert!(msg.contains("environment"));
                assert!(msg.contains("workload-identity"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partial_environment_is_not_configured() {
        let env: BTreeMap<String, String> = [
            (AZURE_TENANT_ID.to_string(), "tenant".to_string()),
            (AZURE_CLIENT_ID.to_string(), "client".to_string()),
        ]
        .into_iter()
        .collect();
        let credential = EnvironmentCredential::new(reqwest::Client::new(), "https://login", &env);
        assert!(!credential.is_configured());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = token().unwrap();
        assert!(!format!("{token:?}").contains("t0k3n"));
        assert!(token.is_fresh());
    }
}
