// SPDX-License-Identifier: MIT

//! Container record: pool-managed execution environment for one worker.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;

/// Label applied to every container the orchestrator creates. The startup
/// reconciler and the pool only ever look at containers carrying it.
pub const ORCHESTRATOR_LABEL: &str = "orchestrator=true";

/// Canonical mount point of the workspace inside a container. Paths outside
/// it are out-of-band and never captured.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Runtime-issued container identifier.
///
/// Unlike session and diff ids these are not generated here — the runtime
/// hands them out (64-hex for Docker), so this stays a plain string newtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for ContainerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl Borrow<str> for ContainerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Pool-owned lifecycle state. Only the pool mutates this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerState {
    Warming,
    Idle,
    Assigned,
    Stopping,
    Gone,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Warming => "warming",
            ContainerState::Idle => "idle",
            ContainerState::Assigned => "assigned",
            ContainerState::Stopping => "stopping",
            ContainerState::Gone => "gone",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource caps for a container, part of the pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProfile {
    /// Memory cap, e.g. "2g". None means runtime default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// CPU cap, e.g. "2.0". None means runtime default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
}

impl ResourceProfile {
    pub fn unbounded() -> Self {
        Self { memory: None, cpus: None }
    }
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// One bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    /// Read-write workspace mount at the canonical container path.
    pub fn workspace(host_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: PathBuf::from(WORKSPACE_MOUNT),
            read_only: false,
        }
    }
}

/// Journal record for a pool-managed container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub image: String,
    pub profile: ResourceProfile,
    pub mounts: Vec<Mount>,
    pub state: ContainerState,
    pub created_at_ms: u64,
}

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
