//! Writable overlay layer over a read-only lower root.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use porter_common::{PorterError, PorterResult};

/// An overlayfs composition: read-only lower root, writable upper layer,
/// work directory, and the merged mount target.
///
/// The overlay seals when its merged mount is issued; upper-layer edits
/// after that point are rejected.
#[derive(Debug)]
pub struct Overlay {
    lower: PathBuf,
    upper: PathBuf,
    work: PathBuf,
    merged: PathBuf,
    sealed: AtomicBool,
}

impl Overlay {
    /// Describe an overlay composition. No directories are touched until
    /// [`Overlay::prepare`].
    #[must_use]
    pub fn new(
        lower: impl Into<PathBuf>,
        upper: impl Into<PathBuf>,
        work: impl Into<PathBuf>,
        merged: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
            work: work.into(),
            merged: merged.into(),
            sealed: AtomicBool::new(false),
        }
    }

    /// The read-only lower root.
    #[must_use]
    pub fn lower(&self) -> &Path {
        &self.lower
    }

    /// The writable upper directory.
    #[must_use]
    pub fn upper(&self) -> &Path {
        &self.upper
    }

    /// The overlayfs work directory.
    #[must_use]
    pub fn work(&self) -> &Path {
        &self.work
    }

    /// The merged mount target.
    #[must_use]
    pub fn merged(&self) -> &Path {
        &self.merged
    }

    /// The option string for the overlay mount.
    #[must_use]
    pub fn mount_options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower.display(),
            self.upper.display(),
            self.work.display()
        )
    }

    /// Create the upper, work, and merged directories.
    pub fn prepare(&self) -> PorterResult<()> {
        std::fs::create_dir_all(&self.upper)?;
        std::fs::create_dir_all(&self.work)?;
        std::fs::create_dir_all(&self.merged)?;
        Ok(())
    }

    /// Create `path` inside the upper layer so it exists in the merged
    /// view even when the lower root lacks it.
    ///
    /// Fails with [`PorterError::OverlaySealed`] once the merged mount has
    /// been issued.
    pub fn add_dir(&self, path: impl AsRef<Path>) -> PorterResult<()> {
        let path = path.as_ref();
        if self.sealed.load(Ordering::Relaxed) {
            return Err(PorterError::OverlaySealed {
                path: path.display().to_string(),
            });
        }

        let relative = path.strip_prefix("/").unwrap_or(path);
        let target = self.upper.join(relative);
        tracing::debug!(dir = %target.display(), "Materializing upper-layer directory");
        std::fs::create_dir_all(target)?;
        Ok(())
    }

    /// Mark the merged mount as issued.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Relaxed);
    }

    /// Whether the merged mount has been issued.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_options_shape() {
        let overlay = Overlay::new("/lower", "/upper", "/work", "/merged");
        assert_eq!(
            overlay.mount_options(),
            "lowerdir=/lower,upperdir=/upper,workdir=/work"
        );
    }

    #[test]
    fn add_dir_creates_under_upper() {
        let tmp = tempfile::TempDir::new().unwrap();
        let overlay = Overlay::new(
            tmp.path().join("lower"),
            tmp.path().join("upper"),
            tmp.path().join("work"),
            tmp.path().join("merged"),
        );
        overlay.prepare().unwrap();

        overlay.add_dir("/etc").unwrap();
        assert!(tmp.path().join("upper/etc").is_dir());
    }

    #[test]
    fn add_dir_after_seal_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let overlay = Overlay::new(
            tmp.path().join("lower"),
            tmp.path().join("upper"),
            tmp.path().join("work"),
            tmp.path().join("merged"),
        );
        overlay.prepare().unwrap();
        overlay.seal();

        let err = overlay.add_dir("/etc").unwrap_err();
        assert!(matches!(err, PorterError::OverlaySealed { .. }));
        assert!(overlay.is_sealed());
    }
}
