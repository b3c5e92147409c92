//! Container Apps workload provider.
//!
//! This library provides the remote side of the spawner: the [`WorkloadClient`] trait
//! with create/get/delete semantics, a resource manager REST implementation
//! ([`ArmClient`]), headless token credentials, and the factory that pairs a credential
//! with a client for each lifecycle call.

// Re-export common types for convenience
pub use arm::{ArmClient, ArmClientOptions};
pub use client::WorkloadClient;
pub use credential::{
    AccessToken, ChainedTokenCredential, CredentialSource, EnvironmentCredential,
    TokenCredential, WorkloadIdentityCredential,
};
pub use error::{ProviderError, Result};
pub use factory::{AzureClientFactory, ClientFactory, ClientHandle};
pub use models::{
    Configuration, Container, ContainerApp, ContainerAppProperties, ContainerResources,
    EnvironmentVar, Ingress, ProvisioningState, RegistryCredentials, RunningStatus, Scale,
    Template, TrafficWeight,
};
pub use poller::Poller;

pub mod arm;
pub mod client;
pub mod credential;
pub mod error;
pub mod factory;
pub mod models;
pub mod poller;

#[cfg(feature = "test-helpers")]
pub mod mock;
