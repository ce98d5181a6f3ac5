//! Loop device control.
//!
//! Attaches byte ranges of image files to `/dev/loopN` block devices
//! through the `loop-control` ioctl interface.

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use porter_common::{PorterError, PorterResult};

const LOOP_CONTROL: &str = "/dev/loop-control";

const LOOP_SET_FD: u32 = 0x4C00;
const LOOP_CLR_FD: u32 = 0x4C01;
const LOOP_SET_STATUS64: u32 = 0x4C04;
const LOOP_CTL_GET_FREE: u32 = 0x4C82;

/// `LO_FLAGS_READ_ONLY`.
const FLAGS_READ_ONLY: u32 = 1;
/// `LO_FLAGS_AUTOCLEAR`: detach once the last reference goes away.
const FLAGS_AUTOCLEAR: u32 = 4;

/// Access mode for the backing file and the device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Read-only attachment.
    ReadOnly,
    /// Read-write attachment.
    ReadWrite,
}

impl LoopMode {
    /// Wire representation.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::ReadOnly => 0,
            Self::ReadWrite => 1,
        }
    }

    /// Decode the wire representation; anything nonzero is read-write.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        if raw == 0 { Self::ReadOnly } else { Self::ReadWrite }
    }
}

/// Byte-range parameters for an attachment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoopInfo {
    /// Offset of the filesystem within the backing file.
    pub offset: u64,
    /// Length of the filesystem; zero means the rest of the file.
    pub size_limit: u64,
    /// Extra status flags merged into the attachment. Autoclear is always
    /// added, and read-only follows the access mode.
    pub flags: u32,
}

/// `struct loop_info64` from `<linux/loop.h>`.
#[repr(C)]
struct LoopInfo64 {
    lo_device: u64,
    lo_inode: u64,
    lo_rdevice: u64,
    lo_offset: u64,
    lo_sizelimit: u64,
    lo_number: u32,
    lo_encrypt_type: u32,
    lo_encrypt_key_size: u32,
    lo_flags: u32,
    lo_file_name: [u8; 64],
    lo_crypt_name: [u8; 64],
    lo_encrypt_key: [u8; 32],
    lo_init: [u64; 2],
}

/// An attached loop device.
///
/// The device descriptor stays open; with autoclear set, the attachment
/// lives exactly as long as a descriptor or a mount on it does.
#[derive(Debug)]
pub struct LoopDevice {
    number: u32,
    path: PathBuf,
    _device: File,
}

impl LoopDevice {
    /// Device number as returned by `LOOP_CTL_GET_FREE`.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Path of the block device, e.g. `/dev/loop3`.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Path of loop device number `n`.
#[must_use]
pub fn device_path(n: u32) -> PathBuf {
    PathBuf::from(format!("/dev/loop{n}"))
}

fn open_with(mode: LoopMode, path: &Path) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true);
    if mode == LoopMode::ReadWrite {
        opts.write(true);
    }
    opts.open(path)
}

/// Attach a byte range of `source` to a free loop device.
pub fn attach(source: &Path, mode: LoopMode, info: &LoopInfo) -> PorterResult<LoopDevice> {
    let attach_err = |reason: String| PorterError::LoopAttachFailed {
        path: source.display().to_string(),
        reason,
    };

    let control = OpenOptions::new()
        .read(true)
        .write(true)
        .open(LOOP_CONTROL)
        .map_err(|e| attach_err(format!("opening {LOOP_CONTROL}: {e}")))?;

    let number = unsafe { libc::ioctl(control.as_raw_fd(), LOOP_CTL_GET_FREE as _) };
    if number < 0 {
        return Err(attach_err(format!(
            "no free device: {}",
            std::io::Error::last_os_error()
        )));
    }
    let number = number as u32;

    let device_node = device_path(number);
    let device = open_with(mode, &device_node)
        .map_err(|e| attach_err(format!("opening {}: {e}", device_node.display())))?;
    let backing =
        open_with(mode, source).map_err(|e| attach_err(format!("opening backing file: {e}")))?;

    let rc = unsafe { libc::ioctl(device.as_raw_fd(), LOOP_SET_FD as _, backing.as_raw_fd()) };
    if rc < 0 {
        return Err(attach_err(format!(
            "LOOP_SET_FD on {}: {}",
            device_node.display(),
            std::io::Error::last_os_error()
        )));
    }

    let mut status: LoopInfo64 = unsafe { std::mem::zeroed() };
    status.lo_offset = info.offset;
    status.lo_sizelimit = info.size_limit;
    status.lo_flags = info.flags
        | FLAGS_AUTOCLEAR
        | if mode == LoopMode::ReadOnly {
            FLAGS_READ_ONLY
        } else {
            0
        };

    let rc = unsafe { libc::ioctl(device.as_raw_fd(), LOOP_SET_STATUS64 as _, &raw const status) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        // Detach again so the device is not left bound to the file.
        unsafe { libc::ioctl(device.as_raw_fd(), LOOP_CLR_FD as _, 0) };
        return Err(attach_err(format!(
            "LOOP_SET_STATUS64 on {}: {err}",
            device_node.display()
        )));
    }

    tracing::debug!(
        source = %source.display(),
        device = %device_node.display(),
        offset = info.offset,
        size_limit = info.size_limit,
        ?mode,
        "Attached loop device"
    );

    Ok(LoopDevice {
        number,
        path: device_node,
        _device: device,
    })
}
