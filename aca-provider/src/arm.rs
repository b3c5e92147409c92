//! Resource manager REST client for `Microsoft.App/containerApps`.

use crate::client::WorkloadClient;
use crate::credential::TokenCredential;
use crate::error::{ProviderError, Result};
use crate::models::{ContainerApp, ProvisioningState};
use crate::poller::Poller;
use aca_config::SpawnerConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const ASYNC_OPERATION: &str = "azure-asyncoperation";

#[derive(Debug, Clone)]
pub struct ArmClientOptions {
    pub endpoint: String,
    pub api_version: String,
    /// Delay between operation status checks when the service sends no `Retry-After`.
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Overall limit on waiting for an accepted operation to finish.
    pub operation_timeout: Duration,
}

impl ArmClientOptions {
    pub fn from_config(config: &SpawnerConfig) -> Self {
        Self {
            endpoint: config.arm_endpoint.clone(),
            api_version: config.api_version.clone(),
            poll_interval: config.operation_poll_interval(),
            timeout: config.request_timeout(),
            operation_timeout: config.operation_timeout(),
        }
    }

    /// Token scope for this endpoint.
    pub fn scope(&self) -> String {
        format!("{}/.default", self.endpoint.trim_end_matches('/'))
    }
}

#[derive(Clone)]
pub struct ArmClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    subscription_id: String,
    options: ArmClientOptions,
}

#[derive(Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ErrorBody>,
}

/// Where to look for the outcome of an accepted operation.
enum Tracking {
    AsyncOperation(Url),
    Location(Url),
}

impl ArmClient {
    pub fn new(
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
        subscription_id: impl Into<String>,
        options: ArmClientOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                credential,
                subscription_id: subscription_id.into(),
                options,
            }),
        }
    }

    pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(timeout).build()?)
    }

    pub fn subscription_id(&self) -> &str {
        &self.inner.subscription_id
    }

    pub fn app_url(&self, resource_group: &str, name: &str) -> Result<Url> {
        let options = &self.inner.options;
        let mut url = Url::parse(&format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.App/containerApps/{}",
            options.endpoint.trim_end_matches('/'),
            self.inner.subscription_id,
            resource_group,
            name
        ))?;
        url.query_pairs_mut()
            .append_pair("api-version", &options.api_version);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<&ContainerApp>) -> Result<Response> {
        let token = self
            .inner
            .credential
            .get_token(&self.inner.options.scope())
            .await?;
        let mut request = self
            .inner
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(&token.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        debug!("{} {}", method, url.path());
        Ok(request.send().await?)
    }

    async fn fetch(&self, resource_group: &str, name: &str) -> Result<ContainerApp> {
        let url = self.app_url(resource_group, name)?;
        let response = self.send(Method::GET, url, None).await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(name.to_string())),
            _ => Err(error_from_response(response).await),
        }
    }

    fn retry_delay(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.inner.options.poll_interval)
    }

    fn tracking(&self, headers: &HeaderMap) -> Result<Option<Tracking>> {
        if let Some(value) = header_str(headers, ASYNC_OPERATION) {
            return Ok(Some(Tracking::AsyncOperation(Url::parse(value)?)));
        }
        if let Some(value) = header_str(headers, LOCATION.as_str()) {
            return Ok(Some(Tracking::Location(Url::parse(value)?)));
        }
        Ok(None)
    }

    /// Runs an operation wait under `operation_timeout`.
    async fn bounded<T>(
        &self,
        operation: &str,
        wait: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.inner.options.operation_timeout;
        match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} did not finish within {:?}", operation, limit);
                Err(ProviderError::OperationFailed {
                    operation: operation.to_string(),
                    status: "TimedOut".to_string(),
                    message: format!("no terminal state after {}s", limit.as_secs()),
                })
            }
        }
    }

    /// Polls an `Azure-AsyncOperation` status document until it reaches a terminal status.
    async fn wait_async_operation(&self, operation: &str, url: Url, mut delay: Duration) -> Result<()> {
        loop {
            tokio::time::sleep(delay).await;
            let response = self.send(Method::GET, url.clone(), None).await?;
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            delay = self.retry_delay(response.headers());
            let status: OperationStatus = response.json().await?;
            debug!("{} status: {}", operation, status.status);

            match status.status.as_str() {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" | "Cancelled" => {
                    let message = status.error.map(|e| e.message).unwrap_or_default();
                    return Err(ProviderError::OperationFailed {
                        operation: operation.to_string(),
                        status: status.status,
                        message,
                    });
                }
                _ => continue,
            }
        }
    }

    /// Polls a `Location` URL; 202 means still running, 200/204/404 mean done.
    async fn wait_location(&self, operation: &str, url: Url, mut delay: Duration) -> Result<()> {
        loop {
            tokio::time::sleep(delay).await;
            let response = self.send(Method::GET, url.clone(), None).await?;
            match response.status() {
                StatusCode::ACCEPTED => {
                    delay = self.retry_delay(response.headers());
                    debug!("{} still in progress", operation);
                }
                StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(()),
                _ => return Err(error_from_response(response).await),
            }
        }
    }

    /// Re-reads the app until its provisioning state is terminal.
    async fn wait_provisioned(&self, resource_group: &str, name: &str) -> Result<ContainerApp> {
        loop {
            let app = self.fetch(resource_group, name).await?;
            match app.provisioning_state() {
                Some(ProvisioningState::Succeeded) => return Ok(app),
                Some(state) if state.is_terminal() => {
                    return Err(ProviderError::OperationFailed {
                        operation: format!("create {name}"),
                        status: state.to_string(),
                        message: "provisioning did not succeed".to_string(),
                    });
                }
                state => {
                    debug!("{} provisioning state: {:?}", name, state);
                    tokio::time::sleep(self.inner.options.poll_interval).await;
                }
            }
        }
    }

    /// Re-reads the app until the service no longer knows it.
    async fn wait_gone(&self, resource_group: &str, name: &str) -> Result<()> {
        loop {
            match self.fetch(resource_group, name).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) => tokio::time::sleep(self.inner.options.poll_interval).await,
            }
        }
    }
}

#[async_trait]
impl WorkloadClient for ArmClient {
    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        app: &ContainerApp,
    ) -> Result<Poller<ContainerApp>> {
        let operation = format!("create {name}");
        let url = self.app_url(resource_group, name)?;
        let response = self.send(Method::PUT, url, Some(app)).await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(error_from_response(response).await);
        }
        info!("Create of container app {} accepted ({})", name, status);

        let tracking = self.tracking(response.headers())?;
        let delay = self.retry_delay(response.headers());
        let accepted: ContainerApp = response.json().await?;

        let client = self.clone();
        let resource_group = resource_group.to_string();
        let name = name.to_string();

        let poller = match tracking {
            Some(Tracking::AsyncOperation(status_url)) => {
                Poller::new(operation.clone(), async move {
                    client
                        .bounded(
                            &operation,
                            client.wait_async_operation(&operation, status_url, delay),
                        )
                        .await?;
                    client.fetch(&resource_group, &name).await
                })
            }
            _ => match accepted.provisioning_state() {
                Some(ProvisioningState::Succeeded) => Poller::done(operation, accepted),
                Some(state) if state.is_terminal() => Poller::failed(
                    operation.clone(),
                    ProviderError::OperationFailed {
                        operation,
                        status: state.to_string(),
                        message: "provisioning did not succeed".to_string(),
                    },
                ),
                _ => Poller::new(operation.clone(), async move {
                    client
                        .bounded(&operation, client.wait_provisioned(&resource_group, &name))
                        .await
                }),
            },
        };
        Ok(poller)
    }

    async fn get(&self, resource_group: &str, name: &str) -> Result<ContainerApp> {
        self.fetch(resource_group, name).await
    }

    async fn begin_delete(&self, resource_group: &str, name: &str) -> Result<Poller<()>> {
        let operation = format!("delete {name}");
        let url = self.app_url(resource_group, name)?;
        let response = self.send(Method::DELETE, url, None).await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => {
                info!("Container app {} deleted", name);
                Ok(Poller::done(operation, ()))
            }
            StatusCode::NOT_FOUND => {
                warn!("Container app {} was already gone", name);
                Ok(Poller::done(operation, ()))
            }
            StatusCode::ACCEPTED => {
                info!("Delete of container app {} accepted", name);
                let tracking = self.tracking(response.headers())?;
                let delay = self.retry_delay(response.headers());
                let client = self.clone();
                let resource_group = resource_group.to_string();
                let name = name.to_string();

                Ok(Poller::new(operation.clone(), async move {
                    let wait = async {
                        match tracking {
                            Some(Tracking::AsyncOperation(url)) => {
                                client.wait_async_operation(&operation, url, delay).await
                            }
                            Some(Tracking::Location(url)) => {
                                client.wait_location(&operation, url, delay).await
                            }
                            None => client.wait_gone(&resource_group, &name).await,
                        }
                    };
                    client.bounded(&operation, wait).await
                }))
            }
            _ => Err(error_from_response(response).await),
        }
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing resource manager client");
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Maps a non-success response to [`ProviderError::Api`], reading the standard
/// `{"error": {"code", "message"}}` body when there is one.
pub(crate) async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let envelope: ErrorEnvelope = serde_json::from_str(&body).unwrap_or_default();

    let code = if envelope.error.code.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown")
            .replace(' ', "")
    } else {
        envelope.error.code
    };
    let message = if envelope.error.message.is_empty() {
        body
    } else {
        envelope.error.message
    };

    ProviderError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}
