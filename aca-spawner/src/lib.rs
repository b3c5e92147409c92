//! Container Apps spawner.
//!
//! Runs one JupyterHub single-user server per session as an Azure Container App. The
//! hub calls [`WorkloadSpawner::start`] once, [`WorkloadSpawner::poll`] periodically and
//! [`WorkloadSpawner::stop`] at the end, persisting [`SpawnerState`] in between.

pub mod backoff;
pub mod cli;
pub mod env;
pub mod error;
pub mod spawner;
pub mod state;
pub mod template;

pub use backoff::Backoff;
pub use error::{Result, SpawnerError};
pub use spawner::{
    generate_identity, Phase, PollOutcome, PollStatus, SessionSpec, WorkloadEndpoint,
    WorkloadSpawner,
};
pub use state::{SpawnerState, StateFile};
