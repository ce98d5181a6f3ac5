//! Ephemeral per-container session workspace.
//!
//! A session is a tmpfs-backed directory tree holding the rootfs mount
//! target, the overlay layer, and the final merged root the container is
//! chrooted into. It registers its own bootstrap mounts and hooks into
//! the [`MountSystem`] and is torn down by container cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustix::mount::MountFlags;

use porter_common::PorterResult;

use crate::filesystem::overlay::Overlay;
use crate::filesystem::points::MountTag;
use crate::filesystem::system::MountSystem;

/// Rootfs mount target inside the session base.
pub(crate) const ROOTFS_DIR: &str = "rootfs";
/// Overlay upper/work parent inside the session base.
pub(crate) const OVERLAY_DIR: &str = "overlay";
/// Merged overlay target inside the session base.
pub(crate) const FINAL_DIR: &str = "final";

/// Size of the session tmpfs when the caller does not pick one.
pub const DEFAULT_SESSION_SIZE_MB: u64 = 64;

/// Directories guaranteed writable in the merged view even when the lower
/// root lacks them or is read-only.
const UPPER_DIRS: &[&str] = &["/dev", "/etc", "/proc", "/sys", "/tmp"];

/// The session directory tree for one container creation.
pub struct Session {
    base: PathBuf,
    rootfs: PathBuf,
    final_path: PathBuf,
    overlay: Option<Arc<Overlay>>,
}

impl Session {
    /// Build the session under `base` and register its bootstrap mounts
    /// and hooks with `system`.
    ///
    /// Registers the backing tmpfs under [`MountTag::Session`] with a
    /// post-tag hook creating the inner layout, and, when `overlay_enabled`,
    /// the merged overlay mount under [`MountTag::Layer`] with hooks that
    /// materialize the upper layer after [`MountTag::Rootfs`] and seal the
    /// overlay after the merged mount.
    pub fn new(
        base: impl Into<PathBuf>,
        fstype: &str,
        size_mb: u64,
        system: &mut MountSystem,
        overlay_enabled: bool,
    ) -> PorterResult<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;

        let rootfs = base.join(ROOTFS_DIR);
        let final_path = if overlay_enabled {
            base.join(FINAL_DIR)
        } else {
            rootfs.clone()
        };

        tracing::debug!(
            base = %base.display(),
            overlay = overlay_enabled,
            "Building session"
        );

        system.set_session_path(&base);
        system.set_target_root(&final_path);

        system.points_mut().add_mount(
            MountTag::Session,
            "tmpfs",
            &base,
            fstype,
            MountFlags::NOSUID | MountFlags::NODEV,
            vec!["mode=0755".to_string(), format!("size={size_mb}m")],
        );

        let layout_base = base.clone();
        let layout_overlay = overlay_enabled;
        system.add_hook(MountTag::Session, move |_| {
            std::fs::create_dir_all(layout_base.join(ROOTFS_DIR))?;
            if layout_overlay {
                std::fs::create_dir_all(layout_base.join(OVERLAY_DIR))?;
                std::fs::create_dir_all(layout_base.join(FINAL_DIR))?;
            }
            tracing::debug!(base = %layout_base.display(), "Session layout created");
            Ok(())
        });

        let overlay = if overlay_enabled {
            let overlay = Arc::new(Overlay::new(
                rootfs.clone(),
                base.join(OVERLAY_DIR).join("upper"),
                base.join(OVERLAY_DIR).join("work"),
                final_path.clone(),
            ));

            system.points_mut().add_mount(
                MountTag::Layer,
                "overlay",
                &final_path,
                "overlay",
                MountFlags::empty(),
                vec![overlay.mount_options()],
            );

            // The upper layer can only be materialized once the rootfs
            // tag is done: with a backing overlay image the upper/work
            // parent is itself a rootfs-tag mount.
            let materialize = Arc::clone(&overlay);
            system.add_hook(MountTag::Rootfs, move |_| {
                materialize.prepare()?;
                for dir in UPPER_DIRS {
                    materialize.add_dir(dir)?;
                }
                Ok(())
            });

            let seal = Arc::clone(&overlay);
            system.add_hook(MountTag::Layer, move |_| {
                seal.seal();
                Ok(())
            });

            Some(overlay)
        } else {
            None
        };

        Ok(Self {
            base,
            rootfs,
            final_path,
            overlay,
        })
    }

    /// The session base directory (the tmpfs mount point).
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The rootfs mount target (the overlay lower root).
    #[must_use]
    pub fn rootfs_path(&self) -> &Path {
        &self.rootfs
    }

    /// The path the container is chrooted into: the merged overlay
    /// target, or the rootfs itself when the overlay is disabled.
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// The overlay layer, when enabled.
    #[must_use]
    pub fn overlay(&self) -> Option<&Arc<Overlay>> {
        self.overlay.as_ref()
    }
}
