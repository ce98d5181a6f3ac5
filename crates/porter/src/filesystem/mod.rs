//! Mount planning and execution.
//!
//! This module handles:
//! - The tagged, ordered mount-point model
//! - Tag-by-tag mount execution with post-tag hooks
//! - Local and RPC-delegated mount backends
//! - The session workspace, overlay layer, and loop devices

pub mod loopdev;

mod executor;
mod overlay;
mod points;
mod session;
mod system;

pub use executor::{LocalExecutor, MountExecutor, RemoteExecutor, chroot, mount, unmount};
pub use overlay::Overlay;
pub use points::{MountFlagsExt, MountPoint, MountPoints, MountTag, convert_options};
pub use session::{DEFAULT_SESSION_SIZE_MB, Session};
pub use system::{Hook, MountSystem};

pub(crate) use session::{FINAL_DIR, OVERLAY_DIR, ROOTFS_DIR};
