//! Shared test support: a mount executor that records instead of
//! touching the kernel.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustix::mount::MountFlags;

use porter::filesystem::MountExecutor;
use porter::filesystem::loopdev::{LoopInfo, LoopMode};
use porter_common::{PorterError, PorterResult};

/// Appends every operation to a shared log.
pub struct RecordingExecutor {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail_mounts: bool,
}

impl RecordingExecutor {
    pub fn new(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label,
            log,
            fail_mounts: false,
        }
    }

    /// An executor whose mounts record and then fail.
    pub fn failing(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label,
            log,
            fail_mounts: true,
        }
    }
}

impl MountExecutor for RecordingExecutor {
    fn name(&self) -> &'static str {
        self.label
    }

    fn mount(
        &self,
        source: &Path,
        destination: &Path,
        fstype: &str,
        _flags: MountFlags,
        _options: &str,
    ) -> PorterResult<()> {
        self.log.lock().push(format!(
            "{}: mount {} -> {} [{}]",
            self.label,
            source.display(),
            destination.display(),
            fstype
        ));
        if self.fail_mounts {
            return Err(PorterError::Internal {
                message: "mount refused".to_string(),
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
            "{}: loop {} offset={}",
            self.label,
            source.display(),
            info.offset
        ));
        Ok(PathBuf::from("/dev/loop7"))
    }
}

/// Create a directory and return its path.
pub fn make_dir(base: &Path, name: &str) -> PathBuf {
    let path = base.join(name);
    std::fs::create_dir_all(&path).unwrap();
    path
}
