//! Privileged helper process: spawn and server loop.
//!
//! The engine re-executes its own binary with [`HELPER_ENV`] set and one
//! end of a socketpair as stdin. The helper keeps the elevated
//! credentials, serves mount/chroot/loop-device requests line by line,
//! and exits when the channel reaches EOF.

use std::io::{BufRead, BufReader, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::process::{Child, Command, Stdio};

use rustix::mount::MountFlags;

use porter_common::{PorterError, PorterResult};

use crate::filesystem;
use crate::filesystem::loopdev::{self, LoopDevice, LoopMode};
use crate::rpc::protocol::{self, Request, Response};

/// Marker environment variable selecting helper mode at startup.
pub const HELPER_ENV: &str = "PORTER_HELPER";

/// Whether this process was started in helper mode.
#[must_use]
pub fn is_helper() -> bool {
    std::env::var_os(HELPER_ENV).is_some()
}

/// A spawned privileged helper process.
pub struct Helper {
    child: Child,
    stream: Option<UnixStream>,
}

impl Helper {
    /// Spawn the helper and establish its channel.
    ///
    /// The helper's channel end rides on stdin; the engine's end is
    /// close-on-exec, so the helper sees EOF and exits once the engine
    /// execs the container payload.
    pub fn spawn() -> PorterResult<Self> {
        let (engine_end, helper_end) =
            UnixStream::pair().map_err(|e| PorterError::RpcInitFailed {
                reason: format!("socketpair: {e}"),
            })?;

        let child = Command::new("/proc/self/exe")
            .env(HELPER_ENV, "1")
            .stdin(Stdio::from(OwnedFd::from(helper_end)))
            .spawn()
            .map_err(|e| PorterError::RpcInitFailed {
                reason: format!("spawning helper: {e}"),
            })?;

        tracing::debug!(pid = child.id(), "Spawned privileged helper");

        Ok(Self {
            child,
            stream: Some(engine_end),
        })
    }

    /// The engine's end of the channel. Yields once.
    pub fn take_stream(&mut self) -> Option<UnixStream> {
        self.stream.take()
    }

    /// Helper process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for Helper {
    fn drop(&mut self) {
        // Reached on error paths only; normally the helper exits on EOF
        // when the engine execs the payload and the channel closes.
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }
    }
}

/// When running as the helper, serve requests on stdin until EOF.
///
/// Returns `Ok(true)` after serving (the process should exit), and
/// `Ok(false)` when this process is not the helper.
pub fn init_if_helper() -> PorterResult<bool> {
    if !is_helper() {
        return Ok(false);
    }

    tracing::debug!("Running as privileged helper");
    let fd = rustix::io::dup(rustix::stdio::stdin()).map_err(|e| PorterError::RpcInitFailed {
        reason: format!("recovering helper channel: {e}"),
    })?;
    serve(UnixStream::from(fd))?;
    Ok(true)
}

/// Serve requests on `stream` until EOF.
///
/// Loop devices attached on behalf of the engine are held open for the
/// lifetime of the loop.
pub fn serve(stream: UnixStream) -> PorterResult<()> {
    let mut reader = BufReader::new(stream);
    let mut devices: Vec<LoopDevice> = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            tracing::debug!("Helper channel closed, exiting");
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match protocol::from_json_line::<Request>(&line) {
            Ok(request) => {
                tracing::trace!(op = request.op_name(), "Serving request");
                dispatch(request, &mut devices)
            }
            Err(e) => Response::err(format!("malformed request: {e}")),
        };

        let reply = protocol::to_json_line(&response)?;
        reader.get_mut().write_all(reply.as_bytes())?;
    }
}

fn dispatch(request: Request, devices: &mut Vec<LoopDevice>) -> Response {
    match request {
        Request::Mount {
            source,
            destination,
            fstype,
            flags,
            options,
        } => {
            let flags = MountFlags::from_bits_truncate(flags);
            match filesystem::mount(&source, &destination, &fstype, flags, &options) {
                Ok(()) => Response::ok(),
                Err(e) => Response::err(e.to_string()),
            }
        }
        Request::Chroot { path } => match filesystem::chroot(&path) {
            Ok(()) => Response::ok(),
            Err(e) => Response::err(e.to_string()),
        },
        Request::LoopDevice { source, mode, info } => {
            match loopdev::attach(&source, LoopMode::from_raw(mode), &info) {
                Ok(device) => {
                    let number = device.number();
                    devices.push(device);
                    Response::ok_number(number)
                }
                Err(e) => Response::err(e.to_string()),
            }
        }
    }
}
