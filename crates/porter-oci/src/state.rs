//! Container state management.
//!
//! Based on the OCI Runtime Specification state format:
//! <https://github.com/opencontainers/runtime-spec/blob/main/runtime.md#state>

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Container runtime state, persisted as `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// OCI version.
    pub oci_version: String,
    /// Container ID.
    pub id: String,
    /// Container status.
    pub status: ContainerStatus,
    /// Process ID of the container init process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Path to the OCI bundle.
    pub bundle: PathBuf,
}

/// Container status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is being created.
    Creating,
    /// Container has been created but not started.
    Created,
    /// Container process has been handed its command.
    Started,
    /// Container is running.
    Running,
    /// Container process exited on its own.
    Exited,
    /// Container process was terminated by a signal.
    Killed,
}

impl ContainerStatus {
    /// Returns true if the container can be started.
    #[must_use]
    pub const fn can_start(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Returns true if the container can be deleted.
    #[must_use]
    pub const fn can_delete(&self) -> bool {
        matches!(self, Self::Created | Self::Exited | Self::Killed)
    }

    /// Returns true if the container is live.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Started | Self::Running)
    }

    /// Returns true if the container reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Killed)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

impl ContainerState {
    /// Create a new container state in the "creating" status.
    #[must_use]
    pub fn new(id: impl Into<String>, bundle: impl Into<PathBuf>) -> Self {
        Self {
            oci_version: "1.2.0".to_string(),
            id: id.into(),
            status: ContainerStatus::Creating,
            pid: None,
            bundle: bundle.into(),
        }
    }

    /// Transition to the "created" status.
    pub fn set_created(&mut self, pid: u32) {
        self.status = ContainerStatus::Created;
        self.pid = Some(pid);
    }

    /// Transition to the "started" status.
    pub fn set_started(&mut self) {
        self.status = ContainerStatus::Started;
    }

    /// Transition to the "running" status.
    pub fn set_running(&mut self) {
        self.status = ContainerStatus::Running;
    }

    /// Transition to the "exited" status.
    pub fn set_exited(&mut self) {
        self.status = ContainerStatus::Exited;
        self.pid = None;
    }

    /// Transition to the "killed" status.
    pub fn set_killed(&mut self) {
        self.status = ContainerStatus::Killed;
        self.pid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        let mut state = ContainerState::new("test-container", "/bundles/test");
        assert_eq!(state.status, ContainerStatus::Creating);

        state.set_created(12345);
        assert_eq!(state.status, ContainerStatus::Created);
        assert_eq!(state.pid, Some(12345));
        assert!(state.status.can_start());

        state.set_started();
        state.set_running();
        assert!(state.status.is_running());

        state.set_exited();
        assert_eq!(state.status, ContainerStatus::Exited);
        assert!(state.status.can_delete());
        assert!(state.status.is_terminal());
    }

    #[test]
    fn state_serialization() {
        let mut state = ContainerState::new("test-container", "/bundles/test");
        state.set_created(12345);

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"status\":\"created\""));
        assert!(json.contains("\"pid\":12345"));
        assert!(json.contains("\"bundle\":\"/bundles/test\""));
        assert!(json.contains("\"ociVersion\""));
    }

    #[test]
    fn status_display() {
        assert_eq!(ContainerStatus::Created.to_string(), "created");
        assert_eq!(ContainerStatus::Exited.to_string(), "exited");
        assert_eq!(ContainerStatus::Killed.to_string(), "killed");
    }
}
