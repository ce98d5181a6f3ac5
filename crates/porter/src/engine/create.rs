//! Container creation.

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use rustix::mount::MountFlags;

use porter_common::{ContainerId, PorterError, PorterPaths, PorterResult};
use porter_image::ImageObject;
use porter_oci::{ContainerState, Spec};

use crate::engine::config::{CommonConfig, ENGINE_NAME, EngineConfig};
use crate::engine::privilege::PrivilegeGuard;
use crate::engine::state::StateManager;
use crate::filesystem::{
    DEFAULT_SESSION_SIZE_MB, LocalExecutor, MountSystem, MountTag, OVERLAY_DIR, RemoteExecutor,
    Session,
};
use crate::rpc::RpcClient;

/// The container-creation engine.
///
/// One instance handles exactly one container: it builds the session,
/// executes the mount plan, persists state, and enters the new root.
pub struct Engine {
    common: CommonConfig,
    paths: PorterPaths,
}

impl Engine {
    /// Create an engine for one container.
    #[must_use]
    pub fn new(common: CommonConfig, paths: PorterPaths) -> Self {
        Self { common, paths }
    }

    /// The engine-specific parameters.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.common.engine_config
    }

    /// The container's runtime spec.
    #[must_use]
    pub fn spec(&self) -> &Spec {
        &self.common.spec
    }

    /// The container identity.
    #[must_use]
    pub fn container_id(&self) -> &ContainerId {
        &self.common.container_id
    }

    /// Build the container's filesystem view and enter it.
    ///
    /// `pid` is the process recorded in `state.json`; `conn` is the
    /// established channel to the privileged helper. Bootstrap mounts run
    /// through the local executor, everything after the layer tag through
    /// the helper.
    pub fn create_container(&self, pid: u32, conn: UnixStream) -> PorterResult<()> {
        if self.common.engine_name != ENGINE_NAME {
            return Err(PorterError::EngineMismatch {
                expected: ENGINE_NAME.to_string(),
                found: self.common.engine_name.clone(),
            });
        }

        let id = self.common.container_id.as_str();
        tracing::info!(container_id = %id, image = %self.config().image.display(), "Creating container");

        let client = Arc::new(RpcClient::new(conn));

        let mut system = MountSystem::new(Arc::new(LocalExecutor::new()));
        let session = Session::new(
            self.paths.session(id),
            "tmpfs",
            DEFAULT_SESSION_SIZE_MB,
            &mut system,
            self.config().overlay_fs_enabled,
        )?;

        // Bootstrap mounts are done once the layer tag completes; every
        // later point goes through the helper.
        let remote = Arc::new(RemoteExecutor::new(client));
        system.add_hook(MountTag::Layer, move |sys| {
            sys.set_executor(remote);
            Ok(())
        });

        if self.config().contain {
            Self::add_contained_mounts(&mut system);
        }
        system.points_mut().import_from_spec(&self.common.spec.mounts);

        let _image = self.add_rootfs_mount(&mut system, &session)?;
        let _overlay_image = self.add_overlay_backing(&mut system, &session)?;

        system.mount_all()?;

        self.persist_state(pid)?;

        // Enter the new root. The helper chroots alongside so later
        // delegated paths resolve inside the container view.
        std::env::set_current_dir(session.final_path())?;
        system.executor().chroot(session.final_path())?;
        std::env::set_current_dir("/")?;

        tracing::info!(container_id = %id, "Container created");
        Ok(())
    }

    /// Register fresh `/tmp` and `/dev` so the container does not inherit
    /// the host's. Added before the spec import so spec-declared kernel
    /// mounts (devpts and friends) land on top of them.
    fn add_contained_mounts(system: &mut MountSystem) {
        tracing::debug!("Containing /tmp and /dev");
        system.points_mut().add_mount(
            MountTag::Kernel,
            "tmpfs",
            "/tmp",
            "tmpfs",
            MountFlags::NOSUID | MountFlags::NODEV,
            vec!["mode=1777".to_string()],
        );
        system.points_mut().add_mount(
            MountTag::Kernel,
            "tmpfs",
            "/dev",
            "tmpfs",
            MountFlags::NOSUID,
            vec!["mode=0755".to_string()],
        );
    }

    /// Resolve the rootfs image and register its mount point.
    ///
    /// The returned object holds the image's read handle open for the
    /// rest of the creation call.
    fn add_rootfs_mount(
        &self,
        system: &mut MountSystem,
        session: &Session,
    ) -> PorterResult<ImageObject> {
        let config = self.config();
        let image = ImageObject::resolve(&config.image, config.writable_image)?;

        let mut flags = MountFlags::NOSUID | MountFlags::NODEV;
        if !config.writable_image {
            flags |= MountFlags::RDONLY;
        }

        if image.kind.is_sandbox() {
            tracing::debug!(image = %image.path.display(), "Rootfs is a sandbox directory");
            system.points_mut().add_bind(
                MountTag::Rootfs,
                &image.path,
                session.rootfs_path(),
                flags | MountFlags::BIND,
            );
            return Ok(image);
        }

        let fstype = image.kind.fs_type().ok_or_else(|| PorterError::Internal {
            message: format!("image kind {:?} has no filesystem type", image.kind),
        })?;

        tracing::debug!(
            image = %image.path.display(),
            fstype,
            offset = image.offset,
            size = image.size,
            "Rootfs is a block image"
        );
        system.points_mut().add_image(
            MountTag::Rootfs,
            &image.path,
            session.rootfs_path(),
            fstype,
            flags,
            image.offset,
            image.size,
        );
        Ok(image)
    }

    /// Register the writable image backing the overlay upper/work layer,
    /// when one is configured.
    ///
    /// The image mounts under the rootfs tag: the upper-layer
    /// materialization hook runs after that tag and needs the backing
    /// filesystem in place.
    fn add_overlay_backing(
        &self,
        system: &mut MountSystem,
        session: &Session,
    ) -> PorterResult<Option<ImageObject>> {
        let config = self.config();
        let Some(overlay_path) = &config.overlay_image else {
            return Ok(None);
        };

        if !config.overlay_fs_enabled {
            return Err(PorterError::Config {
                message: "overlayImage requires the overlay layer to be enabled".to_string(),
            });
        }

        let image = ImageObject::resolve(overlay_path, true)?;
        let fstype = image.kind.fs_type().ok_or_else(|| PorterError::Config {
            message: format!(
                "overlay image {} must be a block image",
                overlay_path.display()
            ),
        })?;

        tracing::debug!(
            image = %image.path.display(),
            fstype,
            "Overlay layer backed by writable image"
        );
        system.points_mut().add_image(
            MountTag::Rootfs,
            &image.path,
            session.base().join(OVERLAY_DIR),
            fstype,
            MountFlags::NOSUID | MountFlags::NODEV,
            image.offset,
            image.size,
        );
        Ok(Some(image))
    }

    /// Write `config.json` and `state.json` under the elevated-credential
    /// bracket. The bracket is restored on every exit path, write failure
    /// included.
    fn persist_state(&self, pid: u32) -> PorterResult<()> {
        let id = self.common.container_id.as_str();
        let manager = StateManager::new(self.paths.clone());

        let mut state = ContainerState::new(id, &self.config().image);
        state.set_created(pid);

        let guard = PrivilegeGuard::acquire()?;
        let result = manager
            .save_config(id, &self.common.spec)
            .and_then(|()| manager.save_state(&state));
        drop(guard);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_name(name: &str) -> Engine {
        let common = CommonConfig {
            engine_name: name.to_string(),
            container_id: ContainerId::new("c1").unwrap(),
            engine_config: EngineConfig {
                image: std::path::PathBuf::from("/images/rootA"),
                writable_image: false,
                overlay_image: None,
                overlay_fs_enabled: true,
                contain: false,
                is_instance: false,
            },
            spec: Spec::default(),
        };
        Engine::new(common, PorterPaths::with_root("/tmp/porter-test"))
    }

    #[test]
    fn engine_name_mismatch_is_fatal() {
        let engine = engine_with_name("other-engine");
        let (conn, _peer) = UnixStream::pair().unwrap();

        let err = engine.create_container(1, conn).unwrap_err();
        match err {
            PorterError::EngineMismatch { expected, found } => {
                assert_eq!(expected, ENGINE_NAME);
                assert_eq!(found, "other-engine");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sandbox_rootfs_registers_read_only_bind() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootA");
        std::fs::create_dir(&rootfs).unwrap();

        let mut engine = engine_with_name(ENGINE_NAME);
        engine.common.engine_config.image = rootfs.clone();

        let mut system = MountSystem::new(Arc::new(LocalExecutor::new()));
        let session = Session::new(
            tmp.path().join("session"),
            "tmpfs",
            DEFAULT_SESSION_SIZE_MB,
            &mut system,
            false,
        )
        .unwrap();

        let image = engine.add_rootfs_mount(&mut system, &session).unwrap();
        assert!(image.kind.is_sandbox());

        let points = system.points().points_for(MountTag::Rootfs);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].source, rootfs);
        assert_eq!(points[0].destination, session.rootfs_path());
        assert!(points[0].flags.contains(MountFlags::BIND));
        assert!(points[0].flags.contains(MountFlags::RDONLY));
        assert!(points[0].offset.is_none());
    }

    #[test]
    fn packed_rootfs_registers_loop_backed_mount() {
        use porter_image::{FsKind, PackedWriter, PartitionKind};

        let tmp = tempfile::TempDir::new().unwrap();
        let mut writer = PackedWriter::new();
        writer.add_partition(
            porter_image::packed::DEFAULT_GROUP,
            PartitionKind::System,
            FsKind::Ext3,
            vec![0u8; 512],
        );
        let image_path = tmp.path().join("root.pack");
        std::fs::write(&image_path, writer.finish()).unwrap();

        let mut engine = engine_with_name(ENGINE_NAME);
        engine.common.engine_config.image = image_path.clone();
        engine.common.engine_config.writable_image = true;

        let mut system = MountSystem::new(Arc::new(LocalExecutor::new()));
        let session = Session::new(
            tmp.path().join("session"),
            "tmpfs",
            DEFAULT_SESSION_SIZE_MB,
            &mut system,
            false,
        )
        .unwrap();

        engine.add_rootfs_mount(&mut system, &session).unwrap();

        let points = system.points().points_for(MountTag::Rootfs);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].source, image_path);
        assert_eq!(points[0].fstype, "ext3");
        assert!(!points[0].flags.contains(MountFlags::RDONLY));
        assert!(points[0].offset.unwrap() > 0);
        assert_eq!(points[0].size_limit, Some(512));
    }

    #[test]
    fn overlay_image_requires_overlay() {
        let mut engine = engine_with_name(ENGINE_NAME);
        engine.common.engine_config.overlay_image =
            Some(std::path::PathBuf::from("/images/overlay.img"));
        engine.common.engine_config.overlay_fs_enabled = false;

        let mut system = MountSystem::new(Arc::new(LocalExecutor::new()));
        let tmp = tempfile::TempDir::new().unwrap();
        let session = Session::new(
            tmp.path().join("session"),
            "tmpfs",
            DEFAULT_SESSION_SIZE_MB,
            &mut system,
            false,
        )
        .unwrap();

        let err = engine
            .add_overlay_backing(&mut system, &session)
            .unwrap_err();
        assert!(matches!(err, PorterError::Config { .. }));
    }
}
