//! Scoped saved-uid elevation.

#![allow(unsafe_code)]

use porter_common::{PorterError, PorterResult};

/// Raises the effective uid to the saved root uid for the guard's
/// lifetime and restores it on drop, on every exit path.
#[derive(Debug)]
pub struct PrivilegeGuard {
    uid: libc::uid_t,
}

impl PrivilegeGuard {
    /// Elevate the effective uid to root, keeping the real uid.
    pub fn acquire() -> PorterResult<Self> {
        let uid = unsafe { libc::getuid() };
        let rc = unsafe { libc::setresuid(uid, 0, uid) };
        if rc != 0 {
            return Err(PorterError::Io(std::io::Error::last_os_error()));
        }
        tracing::debug!(uid, "Elevated effective uid");
        Ok(Self { uid })
    }
}

impl Drop for PrivilegeGuard {
    fn drop(&mut self) {
        let rc = unsafe { libc::setresuid(self.uid, self.uid, 0) };
        if rc != 0 {
            tracing::error!(
                error = %std::io::Error::last_os_error(),
                "Failed to restore effective uid"
            );
        }
    }
}
