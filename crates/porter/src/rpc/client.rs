//! Client side of the helper channel.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustix::mount::MountFlags;

use porter_common::{PorterError, PorterResult};

use crate::filesystem::loopdev::{self, LoopInfo, LoopMode};
use crate::rpc::protocol::{self, Request, Response};

/// Synchronous request/response channel to the privileged helper.
///
/// One call in flight at a time; each call blocks until the helper
/// answers. There is no timeout: a hung helper hangs the caller.
pub struct RpcClient {
    stream: Mutex<BufReader<UnixStream>>,
}

impl RpcClient {
    /// Wrap an established helper connection.
    #[must_use]
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream: Mutex::new(BufReader::new(stream)),
        }
    }

    fn call(&self, request: &Request) -> PorterResult<serde_json::Value> {
        let operation = request.op_name();
        let line = protocol::to_json_line(request)?;

        let mut stream = self.stream.lock();
        stream
            .get_mut()
            .write_all(line.as_bytes())
            .map_err(|e| PorterError::RpcCallFailed {
                operation: operation.to_string(),
                reason: format!("send: {e}"),
            })?;

        let mut reply = String::new();
        let read = stream
            .read_line(&mut reply)
            .map_err(|e| PorterError::RpcCallFailed {
                operation: operation.to_string(),
                reason: format!("receive: {e}"),
            })?;
        if read == 0 {
            return Err(PorterError::RpcCallFailed {
                operation: operation.to_string(),
                reason: "helper closed the channel".to_string(),
            });
        }

        let response: Response = protocol::from_json_line(&reply)?;
        response.into_result(operation)
    }

    /// Issue a mount on the helper side.
    pub fn mount(
        &self,
        source: &Path,
        destination: &Path,
        fstype: &str,
        flags: MountFlags,
        options: &str,
    ) -> PorterResult<()> {
        let request = Request::Mount {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            fstype: fstype.to_string(),
            flags: flags.bits(),
            options: options.to_string(),
        };
        self.call(&request).map(|_| ())
    }

    /// Chroot the helper into `path`.
    pub fn chroot(&self, path: &Path) -> PorterResult<()> {
        self.call(&Request::Chroot {
            path: path.to_path_buf(),
        })
        .map(|_| ())
    }

    /// Attach a loop device on the helper side; returns the device path.
    pub fn loop_device(
        &self,
        source: &Path,
        mode: LoopMode,
        info: &LoopInfo,
    ) -> PorterResult<PathBuf> {
        let request = Request::LoopDevice {
            source: source.to_path_buf(),
            mode: mode.as_raw(),
            info: *info,
        };
        let value = self.call(&request)?;
        let number = value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| PorterError::RpcCallFailed {
                operation: "loop_device".to_string(),
                reason: format!("unexpected payload: {value}"),
            })?;
        Ok(loopdev::device_path(number))
    }
}
