//! Mount execution backends.
//!
//! A [`MountExecutor`] performs the privileged syscalls behind a mount
//! plan. [`LocalExecutor`] issues them in-process; [`RemoteExecutor`]
//! forwards them over the helper channel, which lets the engine drop
//! privileges while a confined helper keeps mounting on its behalf.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustix::mount::MountFlags;

use porter_common::{PorterError, PorterResult};

use crate::filesystem::loopdev::{self, LoopDevice, LoopInfo, LoopMode};
use crate::rpc::RpcClient;

/// Privileged mount operations behind a capability seam.
///
/// Implementations are shared as `Arc<dyn MountExecutor>` and must be
/// callable from any thread.
pub trait MountExecutor: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Mount `source` on `destination`.
    fn mount(
        &self,
        source: &Path,
        destination: &Path,
        fstype: &str,
        flags: MountFlags,
        options: &str,
    ) -> PorterResult<()>;

    /// Lazily unmount `destination`.
    fn unmount(&self, destination: &Path) -> PorterResult<()>;

    /// Change the root directory of the executing context.
    fn chroot(&self, path: &Path) -> PorterResult<()>;

    /// Attach a byte range of `source` to a free loop device and return
    /// the device path.
    fn loop_device(&self, source: &Path, mode: LoopMode, info: &LoopInfo)
    -> PorterResult<PathBuf>;
}

/// Mount a filesystem.
pub fn mount(
    source: &Path,
    target: &Path,
    fstype: &str,
    flags: MountFlags,
    data: &str,
) -> PorterResult<()> {
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        fstype,
        ?flags,
        data,
        "Mounting filesystem"
    );

    let fstype_c = CString::new(fstype).map_err(std::io::Error::from)?;
    let data_c = CString::new(data).map_err(std::io::Error::from)?;

    rustix::mount::mount(source, target, fstype_c.as_c_str(), flags, data_c.as_c_str())
        .map_err(|e| PorterError::Io(e.into()))?;

    Ok(())
}

/// Unmount a filesystem with lazy detach.
pub fn unmount(target: &Path) -> PorterResult<()> {
    use rustix::mount::{UnmountFlags, unmount};

    tracing::debug!(target = %target.display(), "Unmounting filesystem");

    unmount(target, UnmountFlags::DETACH).map_err(|e| PorterError::Io(e.into()))?;

    Ok(())
}

/// Change the root directory of the calling process.
pub fn chroot(path: &Path) -> PorterResult<()> {
    tracing::debug!(path = %path.display(), "Changing root");

    rustix::process::chroot(path).map_err(|e| PorterError::Io(e.into()))?;

    Ok(())
}

/// Executes mount operations in the calling process.
///
/// Attached loop devices stay open here: an autoclear device must not
/// lose its last file descriptor before its filesystem is mounted.
#[derive(Debug, Default)]
pub struct LocalExecutor {
    devices: Mutex<Vec<LoopDevice>>,
}

impl LocalExecutor {
    /// Create an executor with no attached devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MountExecutor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    fn mount(
        &self,
        source: &Path,
        destination: &Path,
        fstype: &str,
        flags: MountFlags,
        options: &str,
    ) -> PorterResult<()> {
        mount(source, destination, fstype, flags, options)
    }

    fn unmount(&self, destination: &Path) -> PorterResult<()> {
        unmount(destination)
    }

    fn chroot(&self, path: &Path) -> PorterResult<()> {
        chroot(path)
    }

    fn loop_device(
        &self,
        source: &Path,
        mode: LoopMode,
        info: &LoopInfo,
    ) -> PorterResult<PathBuf> {
        let device = loopdev::attach(source, mode, info)?;
        let path = device.path().to_path_buf();
        self.devices.lock().push(device);
        Ok(path)
    }
}

/// Forwards mount operations to the helper over the RPC channel.
pub struct RemoteExecutor {
    client: Arc<RpcClient>,
}

impl RemoteExecutor {
    /// Wrap an established helper channel.
    #[must_use]
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }
}

impl MountExecutor for RemoteExecutor {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn mount(
        &self,
        source: &Path,
        destination: &Path,
        fstype: &str,
        flags: MountFlags,
        options: &str,
    ) -> PorterResult<()> {
        self.client.mount(source, destination, fstype, flags, options)
    }

    fn unmount(&self, _destination: &Path) -> PorterResult<()> {
        Err(PorterError::RpcCallFailed {
            operation: "unmount".to_string(),
            reason: "not supported by the helper".to_string(),
        })
    }

    fn chroot(&self, path: &Path) -> PorterResult<()> {
        self.client.chroot(path)
    }

    fn loop_device(
        &self,
        source: &Path,
        mode: LoopMode,
        info: &LoopInfo,
    ) -> PorterResult<PathBuf> {
        self.client.loop_device(source, mode, info)
    }
}
