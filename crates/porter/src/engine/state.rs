//! Container state persistence.

use porter_common::{PorterError, PorterPaths, PorterResult};
use porter_oci::{ContainerState, Spec};

/// Persists per-container `state.json` and `config.json` files under the
/// run-state directory.
#[derive(Debug, Clone)]
pub struct StateManager {
    paths: PorterPaths,
}

impl StateManager {
    /// Create a manager over the given path layout.
    #[must_use]
    pub fn new(paths: PorterPaths) -> Self {
        Self { paths }
    }

    /// The path layout in use.
    #[must_use]
    pub fn paths(&self) -> &PorterPaths {
        &self.paths
    }

    /// Write a container's `state.json`.
    pub fn save_state(&self, state: &ContainerState) -> PorterResult<()> {
        let path = self.paths.container_state(&state.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&path, json)?;

        tracing::debug!(
            container_id = %state.id,
            path = %path.display(),
            "Saved container state"
        );

        Ok(())
    }

    /// Write a container's `config.json` from the exported spec.
    pub fn save_config(&self, id: &str, spec: &Spec) -> PorterResult<()> {
        let path = self.paths.container_config(id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&spec.for_export())?;
        std::fs::write(&path, json)?;

        tracing::debug!(
            container_id = %id,
            path = %path.display(),
            "Saved container config"
        );

        Ok(())
    }

    /// Load a container's `state.json`.
    pub fn load(&self, id: &str) -> PorterResult<ContainerState> {
        let path = self.paths.container_state(id);
        if !path.exists() {
            return Err(PorterError::ContainerNotFound { id: id.to_string() });
        }

        let json = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Remove a container's state directory.
    pub fn delete(&self, id: &str) -> PorterResult<()> {
        let dir = self.paths.container(id);
        if !dir.exists() {
            return Err(PorterError::ContainerNotFound { id: id.to_string() });
        }

        std::fs::remove_dir_all(&dir)?;
        tracing::debug!(
            container_id = %id,
            path = %dir.display(),
            "Deleted container state"
        );

        Ok(())
    }

    /// All persisted container states, sorted by id.
    ///
    /// Entries whose state file is missing or unparsable are skipped with
    /// a warning.
    pub fn list(&self) -> PorterResult<Vec<ContainerState>> {
        let mut states = Vec::new();
        if !self.paths.run_dir.exists() {
            return Ok(states);
        }

        for entry in std::fs::read_dir(&self.paths.run_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(ToString::to_string) else {
                continue;
            };
            match self.load(&id) {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(container_id = %id, error = %e, "Skipping unreadable state");
                }
            }
        }

        states.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(states)
    }

    /// Whether a container has persisted state.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.paths.container_state(id).exists()
    }
}
