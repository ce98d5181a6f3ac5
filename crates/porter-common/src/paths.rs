//! Standard filesystem paths for Porter.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default run-state directory, one subdirectory per container.
pub static PORTER_RUN_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("PORTER_RUN_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/porter"))
});

/// Default base directory for ephemeral session trees.
pub static PORTER_SESSION_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("PORTER_SESSION_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/porter/sessions"))
});

/// Standard paths used by the Porter runtime.
#[derive(Debug, Clone)]
pub struct PorterPaths {
    /// Per-container run state (default: /var/run/porter).
    pub run_dir: PathBuf,
    /// Session workspace base (default: /var/lib/porter/sessions).
    pub session_dir: PathBuf,
}

impl PorterPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths rooted under a custom directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            run_dir: root.join("run"),
            session_dir: root.join("sessions"),
        }
    }

    /// Run-state directory for a specific container.
    #[must_use]
    pub fn container(&self, id: &str) -> PathBuf {
        self.run_dir.join(id)
    }

    /// Container state file.
    #[must_use]
    pub fn container_state(&self, id: &str) -> PathBuf {
        self.container(id).join("state.json")
    }

    /// Container config file (the exported runtime spec).
    #[must_use]
    pub fn container_config(&self, id: &str) -> PathBuf {
        self.container(id).join("config.json")
    }

    /// Session tree for a specific container.
    #[must_use]
    pub fn session(&self, id: &str) -> PathBuf {
        self.session_dir.join(id)
    }

    /// Create the top-level directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.run_dir)?;
        std::fs::create_dir_all(&self.session_dir)?;
        Ok(())
    }
}

impl Default for PorterPaths {
    fn default() -> Self {
        Self {
            run_dir: PORTER_RUN_DIR.clone(),
            session_dir: PORTER_SESSION_DIR.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_root() {
        let paths = PorterPaths::with_root("/tmp/porter-test");
        assert_eq!(
            paths.container("abc123"),
            PathBuf::from("/tmp/porter-test/run/abc123")
        );
        assert_eq!(
            paths.session("abc123"),
            PathBuf::from("/tmp/porter-test/sessions/abc123")
        );
    }

    #[test]
    fn state_and_config_files() {
        let paths = PorterPaths::with_root("/tmp/porter-test");
        assert_eq!(
            paths.container_state("c1"),
            PathBuf::from("/tmp/porter-test/run/c1/state.json")
        );
        assert_eq!(
            paths.container_config("c1"),
            PathBuf::from("/tmp/porter-test/run/c1/config.json")
        );
    }
}
