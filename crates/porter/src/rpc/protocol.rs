//! Wire protocol between the engine and the privileged helper.
//!
//! Newline-delimited JSON over the helper socketpair: one request line,
//! one response line, one call in flight at a time.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use porter_common::{PorterError, PorterResult};

use crate::filesystem::loopdev::LoopInfo;

/// A request to the privileged helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Mount `source` on `destination`.
    Mount {
        /// Mount source.
        source: PathBuf,
        /// Resolved mount destination.
        destination: PathBuf,
        /// Filesystem type; empty for binds.
        fstype: String,
        /// Raw mount flag bits.
        flags: u32,
        /// Filesystem-specific option string.
        options: String,
    },
    /// Change the helper's root directory.
    Chroot {
        /// New root path.
        path: PathBuf,
    },
    /// Attach a byte range of `source` to a free loop device.
    LoopDevice {
        /// Backing file path.
        source: PathBuf,
        /// Raw access-mode bits.
        mode: u32,
        /// Attachment parameters.
        info: LoopInfo,
    },
}

impl Request {
    /// Operation name used when attributing failures.
    #[must_use]
    pub const fn op_name(&self) -> &'static str {
        match self {
            Self::Mount { .. } => "mount",
            Self::Chroot { .. } => "chroot",
            Self::LoopDevice { .. } => "loop_device",
        }
    }
}

/// A response from the privileged helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// Success, with an operation-specific payload.
    Ok(serde_json::Value),
    /// Failure, with a reason.
    Err(String),
}

impl Response {
    /// A success response with no payload.
    #[must_use]
    pub fn ok() -> Self {
        Self::Ok(serde_json::Value::Null)
    }

    /// A success response carrying a number.
    #[must_use]
    pub fn ok_number(n: u32) -> Self {
        Self::Ok(serde_json::Value::from(n))
    }

    /// A failure response.
    #[must_use]
    pub fn err(reason: impl Into<String>) -> Self {
        Self::Err(reason.into())
    }

    /// Convert into a result, attributing failures to `operation`.
    pub fn into_result(self, operation: &str) -> PorterResult<serde_json::Value> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(reason) => Err(PorterError::RpcCallFailed {
                operation: operation.to_string(),
                reason,
            }),
        }
    }
}

/// Serialize `value` as one protocol line, newline included.
pub fn to_json_line<T: Serialize>(value: &T) -> PorterResult<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

/// Parse one protocol line.
pub fn from_json_line<'a, T: Deserialize<'a>>(line: &'a str) -> PorterResult<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_request_wire_shape() {
        let request = Request::Mount {
            source: PathBuf::from("/dev/loop3"),
            destination: PathBuf::from("/run/session/rootfs"),
            fstype: "ext3".to_string(),
            flags: 1,
            options: String::new(),
        };

        let line = to_json_line(&request).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["op"], "mount");
        assert_eq!(value["source"], "/dev/loop3");
        assert_eq!(value["flags"], 1);
    }

    #[test]
    fn loop_device_request_round_trip() {
        let request = Request::LoopDevice {
            source: PathBuf::from("/images/sys.img"),
            mode: 0,
            info: crate::filesystem::loopdev::LoopInfo {
                offset: 4096,
                size_limit: 0,
                flags: 0,
            },
        };

        let line = to_json_line(&request).unwrap();
        let back: Request = from_json_line(&line).unwrap();
        assert_eq!(back.op_name(), "loop_device");
        match back {
            Request::LoopDevice { info, .. } => assert_eq!(info.offset, 4096),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn response_wire_shape() {
        let ok = to_json_line(&Response::ok_number(7)).unwrap();
        assert_eq!(ok.trim_end(), r#"{"ok":7}"#);

        let err = to_json_line(&Response::err("denied")).unwrap();
        assert_eq!(err.trim_end(), r#"{"err":"denied"}"#);
    }

    #[test]
    fn err_response_becomes_rpc_failure() {
        let err = Response::err("no such path").into_result("chroot").unwrap_err();
        match err {
            PorterError::RpcCallFailed { operation, reason } => {
                assert_eq!(operation, "chroot");
                assert_eq!(reason, "no such path");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn null_payload_for_plain_ok() {
        let value = Response::ok().into_result("mount").unwrap();
        assert!(value.is_null());
    }
}
