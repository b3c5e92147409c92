//! Persisted session state.
//!
//! The only durable fact about a session is the name of the container app it created.
//! The hub stores the serialized document and hands it back after a restart so the
//! controller can reattach instead of provisioning a second workload.

use crate::error::{Result, SpawnerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const RUNNING_NAME_KEY: &str = "aca_running_name";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnerState {
    pub aca_running_name: Option<String>,
}

impl SpawnerState {
    pub fn new(running_name: Option<String>) -> Self {
        Self {
            aca_running_name: running_name.filter(|n| !n.is_empty()),
        }
    }

    /// Reads a stored document.
    ///
    /// Anything that is not an object with a non-empty string under
    /// `aca_running_name` means "no prior resource"; this never fails.
    pub fn from_value(value: &Value) -> Self {
        let name = value
            .as_object()
            .and_then(|map| map.get(RUNNING_NAME_KEY))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        Self {
            aca_running_name: name,
        }
    }

    /// Always `{"aca_running_name": <string|null>}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ RUNNING_NAME_KEY: self.aca_running_name })
    }

    pub fn running_name(&self) -> Option<&str> {
        self.aca_running_name.as_deref()
    }
}

/// JSON file holding one session's state between operator invocations.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing and empty files load as the empty state.
    pub fn load(&self) -> Result<SpawnerState> {
        if !self.path.exists() {
            debug!("No state file at {}", self.path.display());
            return Ok(SpawnerState::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| SpawnerError::StateIo {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(SpawnerState::default());
        }

        let value: Value =
            serde_json::from_str(&content).map_err(|source| SpawnerError::StateFormat {
                path: self.path.clone(),
                source,
            })?;
        Ok(SpawnerState::from_value(&value))
    }

    /// Writes the state atomically (temp file in the same directory, then rename).
    pub fn save(&self, state: &SpawnerState) -> Result<()> {
        let io_err = |source| SpawnerError::StateIo {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(io_err)?;

        let content = serde_json::to_string_pretty(&state.to_value()).map_err(|source| {
            SpawnerError::StateFormat {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut temp_file = tempfile::Builder::new()
            .prefix(".aca-state-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(io_err)?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(io_err)?;
        temp_file
            .persist(&self.path)
            .map_err(|e| io_err(e.error))?;

        debug!("Saved session state to {}", self.path.display());
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => {
                warn!("Failed to remove state file {}: {}", self.path.display(), source);
                Err(SpawnerError::StateIo {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }
}
