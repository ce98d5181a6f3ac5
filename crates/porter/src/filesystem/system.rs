//! Tag-ordered mount execution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustix::mount::MountFlags;

use porter_common::{PorterError, PorterResult};

use crate::filesystem::executor::MountExecutor;
use crate::filesystem::loopdev::{LoopInfo, LoopMode};
use crate::filesystem::points::{MountFlagsExt, MountPoint, MountPoints, MountTag};

/// A post-tag hook.
///
/// Runs exactly once, after every point of its tag has been processed and
/// before any point of a later tag is attempted.
pub type Hook = Box<dyn FnOnce(&mut MountSystem) -> PorterResult<()>>;

/// Walks the mount plan tag by tag, dispatching each point to the active
/// executor and firing post-tag hooks in between.
pub struct MountSystem {
    points: MountPoints,
    executor: Arc<dyn MountExecutor>,
    hooks: HashMap<MountTag, Vec<Hook>>,
    session_path: Option<PathBuf>,
    target_root: Option<PathBuf>,
}

impl MountSystem {
    /// Create a system dispatching to `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn MountExecutor>) -> Self {
        Self {
            points: MountPoints::new(),
            executor,
            hooks: HashMap::new(),
            session_path: None,
            target_root: None,
        }
    }

    /// The registered mount points.
    #[must_use]
    pub fn points(&self) -> &MountPoints {
        &self.points
    }

    /// Mutable access to the registered mount points.
    pub fn points_mut(&mut self) -> &mut MountPoints {
        &mut self.points
    }

    /// The active executor.
    #[must_use]
    pub fn executor(&self) -> Arc<dyn MountExecutor> {
        Arc::clone(&self.executor)
    }

    /// Replace the active executor. Points processed afterwards, hooks
    /// included, dispatch through the new one.
    pub fn set_executor(&mut self, executor: Arc<dyn MountExecutor>) {
        tracing::debug!(
            from = self.executor.name(),
            to = executor.name(),
            "Switching mount executor"
        );
        self.executor = executor;
    }

    /// Register `hook` to run after all points tagged `tag`.
    pub fn add_hook<F>(&mut self, tag: MountTag, hook: F)
    where
        F: FnOnce(&mut Self) -> PorterResult<()> + 'static,
    {
        self.hooks.entry(tag).or_default().push(Box::new(hook));
    }

    /// Declare the session-managed path prefix. Destinations under it are
    /// used as-is and must exist when mounted.
    pub fn set_session_path(&mut self, path: impl Into<PathBuf>) {
        self.session_path = Some(path.into());
    }

    /// The session-managed path prefix, when set.
    #[must_use]
    pub fn session_path(&self) -> Option<&Path> {
        self.session_path.as_deref()
    }

    /// Declare the root all non-session destinations resolve under.
    pub fn set_target_root(&mut self, path: impl Into<PathBuf>) {
        self.target_root = Some(path.into());
    }

    /// The target root, when set.
    #[must_use]
    pub fn target_root(&self) -> Option<&Path> {
        self.target_root.as_deref()
    }

    /// Execute the whole plan in tag precedence order.
    ///
    /// Hooks registered for a tag run after its last point and before the
    /// next tag; a hook that adds points to a later tag sees them
    /// processed normally.
    pub fn mount_all(&mut self) -> PorterResult<()> {
        for tag in MountTag::ORDER {
            let count = self.points.points_for(tag).len();
            if count > 0 {
                tracing::debug!(%tag, count, "Processing mount tag");
            }

            for point in self.points.points_for(tag) {
                if point.is_image_backed() {
                    self.mount_image(point)?;
                } else {
                    self.mount_generic(point)?;
                }
            }

            for hook in self.hooks.remove(&tag).unwrap_or_default() {
                hook(self)?;
            }
        }
        Ok(())
    }

    /// Resolve a point's destination to the path handed to the executor.
    ///
    /// Returns the resolved path and whether it is session-managed.
    fn resolve_destination(&self, point: &MountPoint) -> (PathBuf, bool) {
        if let Some(session) = &self.session_path {
            if point.destination.starts_with(session) {
                return (point.destination.clone(), true);
            }
        }
        if let Some(root) = &self.target_root {
            let relative = point
                .destination
                .strip_prefix("/")
                .unwrap_or(&point.destination);
            return (root.join(relative), false);
        }
        (point.destination.clone(), false)
    }

    fn mount_generic(&self, point: &MountPoint) -> PorterResult<()> {
        let is_bind = point.flags.contains(MountFlags::BIND);
        let is_remount = point.flags.contains(MountFlags::REMOUNT);

        // Bind sources are best-effort unless this is a remount pass.
        if is_bind && !is_remount && !point.source.exists() {
            tracing::debug!(
                source = %point.source.display(),
                destination = %point.destination.display(),
                "Skipping bind, source does not exist"
            );
            return Ok(());
        }

        let (destination, managed) = self.resolve_destination(point);
        if !destination.exists() {
            if managed {
                return Err(PorterError::MissingMountTarget {
                    destination: destination.display().to_string(),
                });
            }
            tracing::debug!(
                destination = %destination.display(),
                "Skipping mount, destination does not exist"
            );
            return Ok(());
        }

        match self.executor.mount(
            &point.source,
            &destination,
            &point.fstype,
            point.flags,
            &point.data(),
        ) {
            Ok(()) => Ok(()),
            Err(e) if is_remount => Err(PorterError::RemountFailed {
                destination: destination.display().to_string(),
                reason: e.to_string(),
            }),
            Err(e) => {
                tracing::warn!(
                    destination = %destination.display(),
                    error = %e,
                    "Mount failed, continuing"
                );
                Ok(())
            }
        }
    }

    fn mount_image(&self, point: &MountPoint) -> PorterResult<()> {
        let (destination, _) = self.resolve_destination(point);
        if !destination.exists() {
            return Err(PorterError::MissingMountTarget {
                destination: destination.display().to_string(),
            });
        }

        let mode = if point.flags.contains(MountFlags::RDONLY) {
            LoopMode::ReadOnly
        } else {
            LoopMode::ReadWrite
        };
        let info = LoopInfo {
            offset: point.offset.unwrap_or(0),
            size_limit: point.size_limit.unwrap_or(0),
            flags: 0,
        };

        let device = self.executor.loop_device(&point.source, mode, &info)?;
        tracing::debug!(
            image = %point.source.display(),
            device = %device.display(),
            destination = %destination.display(),
            "Mounting image-backed filesystem"
        );

        self.executor
            .mount(&device, &destination, &point.fstype, point.flags, &point.data())
            .map_err(|e| PorterError::MountFailed {
                destination: destination.display().to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::filesystem::loopdev;

    struct RecordingExecutor {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_mounts: bool,
    }

    impl RecordingExecutor {
        fn new(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                label,
                log,
                fail_mounts: false,
            }
        }
    }

    impl MountExecutor for RecordingExecutor {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn mount(
            &self,
            source: &Path,
            destination: &Path,
            _fstype: &str,
            _flags: MountFlags,
            _options: &str,
        ) -> PorterResult<()> {
            self.log.lock().push(format!(
                "{}: mount {} -> {}",
                self.label,
                source.display(),
                destination.display()
            ));
            if self.fail_mounts {
                return Err(PorterError::Internal {
                    message: "mount rejected".to_string(),
                });
            }
            Ok(())
        }

        fn unmount(&self, destination: &Path) -> PorterResult<()> {
            self.log
                .lock()
                .push(format!("{}: unmount {}", self.label, destination.display()));
            Ok(())
        }

        fn chroot(&self, path: &Path) -> PorterResult<()> {
            self.log
                .lock()
                .push(format!("{}: chroot {}", self.label, path.display()));
            Ok(())
        }

        fn loop_device(
            &self,
            source: &Path,
            _mode: LoopMode,
            info: &LoopInfo,
        ) -> PorterResult<PathBuf> {
            self.log.lock().push(format!(
                "{}: loop {} @{}",
                self.label,
                source.display(),
                info.offset
            ));
            Ok(loopdev::device_path(7))
        }
    }

    fn existing_dir(tmp: &tempfile::TempDir, name: &str) -> PathBuf {
        let dir = tmp.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn resolve_session_and_target_paths() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut system = MountSystem::new(Arc::new(RecordingExecutor::new("a", log)));
        system.set_session_path("/run/session/c1");
        system.set_target_root("/run/session/c1/final");

        let session_point = MountPoint {
            source: PathBuf::from("tmpfs"),
            destination: PathBuf::from("/run/session/c1/rootfs"),
            fstype: "tmpfs".to_string(),
            flags: MountFlags::empty(),
            options: Vec::new(),
            offset: None,
            size_limit: None,
        };
        let (resolved, managed) = system.resolve_destination(&session_point);
        assert_eq!(resolved, PathBuf::from("/run/session/c1/rootfs"));
        assert!(managed);

        let spec_point = MountPoint {
            destination: PathBuf::from("/mnt/data"),
            ..session_point
        };
        let (resolved, managed) = system.resolve_destination(&spec_point);
        assert_eq!(resolved, PathBuf::from("/run/session/c1/final/mnt/data"));
        assert!(!managed);
    }

    #[test]
    fn missing_bind_source_is_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dest = existing_dir(&tmp, "dest");

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut system = MountSystem::new(Arc::new(RecordingExecutor::new("a", Arc::clone(&log))));
        system.points_mut().add_bind(
            MountTag::Binds,
            tmp.path().join("nope"),
            dest,
            MountFlags::BIND,
        );

        system.mount_all().unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn missing_session_destination_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let session = existing_dir(&tmp, "session");
        let source = existing_dir(&tmp, "src");

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut system = MountSystem::new(Arc::new(RecordingExecutor::new("a", log)));
        system.set_session_path(&session);
        system.points_mut().add_bind(
            MountTag::Rootfs,
            source,
            session.join("rootfs"),
            MountFlags::BIND,
        );

        let err = system.mount_all().unwrap_err();
        assert!(matches!(err, PorterError::MissingMountTarget { .. }));
    }

    #[test]
    fn missing_outside_destination_is_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = existing_dir(&tmp, "root");
        let source = existing_dir(&tmp, "src");

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut system = MountSystem::new(Arc::new(RecordingExecutor::new("a", Arc::clone(&log))));
        system.set_target_root(&root);
        system
            .points_mut()
            .add_bind(MountTag::Binds, source, "/mnt/data", MountFlags::BIND);

        system.mount_all().unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn remount_failure_is_fatal_fresh_failure_is_soft() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = existing_dir(&tmp, "root");
        existing_dir(&tmp, "root/a");
        existing_dir(&tmp, "root/b");
        let source = existing_dir(&tmp, "src");

        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = RecordingExecutor {
            label: "a",
            log: Arc::clone(&log),
            fail_mounts: true,
        };
        let mut system = MountSystem::new(Arc::new(executor));
        system.set_target_root(&root);

        // Fresh mount failure is logged and skipped.
        system
            .points_mut()
            .add_bind(MountTag::Binds, source.clone(), "/a", MountFlags::BIND);
        system.mount_all().unwrap();
        assert_eq!(log.lock().len(), 1);

        // Remount failure aborts.
        system.points_mut().add_bind(
            MountTag::Binds,
            source,
            "/b",
            MountFlags::BIND | MountFlags::REMOUNT,
        );
        let err = system.mount_all().unwrap_err();
        assert!(matches!(err, PorterError::RemountFailed { .. }));
    }

    #[test]
    fn hooks_run_once_after_their_tag() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = existing_dir(&tmp, "root");
        existing_dir(&tmp, "root/a");
        let source = existing_dir(&tmp, "src");

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut system = MountSystem::new(Arc::new(RecordingExecutor::new("a", Arc::clone(&log))));
        system.set_target_root(&root);
        system
            .points_mut()
            .add_bind(MountTag::Rootfs, source, "/a", MountFlags::BIND);

        let hook_log = Arc::clone(&log);
        system.add_hook(MountTag::Rootfs, move |_| {
            hook_log.lock().push("hook: rootfs".to_string());
            Ok(())
        });

        system.mount_all().unwrap();
        // A second pass must not re-fire the hook.
        system.mount_all().unwrap();

        let entries = log.lock();
        let hooks = entries.iter().filter(|e| e.starts_with("hook:")).count();
        assert_eq!(hooks, 1);
        assert!(entries[0].starts_with("a: mount"));
        assert_eq!(entries[1], "hook: rootfs");
    }

    #[test]
    fn executor_switch_applies_to_later_tags() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = existing_dir(&tmp, "root");
        existing_dir(&tmp, "root/early");
        existing_dir(&tmp, "root/late");
        let source = existing_dir(&tmp, "src");

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut system =
            MountSystem::new(Arc::new(RecordingExecutor::new("first", Arc::clone(&log))));
        system.set_target_root(&root);
        system
            .points_mut()
            .add_bind(MountTag::Layer, source.clone(), "/early", MountFlags::BIND);
        system
            .points_mut()
            .add_bind(MountTag::Binds, source, "/late", MountFlags::BIND);

        let second = Arc::new(RecordingExecutor::new("second", Arc::clone(&log)));
        system.add_hook(MountTag::Layer, move |sys| {
            sys.set_executor(second);
            Ok(())
        });

        system.mount_all().unwrap();

        let entries = log.lock();
        assert!(entries[0].starts_with("first: mount"));
        assert!(entries[1].starts_with("second: mount"));
    }
}
