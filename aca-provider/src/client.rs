use crate::error::Result;
use crate::models::ContainerApp;
use crate::poller::Poller;
use async_trait::async_trait;

/// Remote container app operations, scoped to the subscription the client was built for.
///
/// `begin_*` calls return once the service has accepted the request; the returned
/// [`Poller`] must be awaited before the outcome is inspected. Create/update is
/// idempotent on `name`, and deleting an app that no longer exists succeeds.
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        app: &ContainerApp,
    ) -> Result<Poller<ContainerApp>>;

    async fn get(&self, resource_group: &str, name: &str) -> Result<ContainerApp>;

    async fn begin_delete(&self, resource_group: &str, name: &str) -> Result<Poller<()>>;

    /// Releases connections held by the client.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
