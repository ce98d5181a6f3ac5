//! Container teardown.

use porter_common::{PorterPaths, PorterResult};

use crate::engine::state::StateManager;
use crate::filesystem::{FINAL_DIR, MountExecutor, ROOTFS_DIR};

/// Tear down a container's session tree and forget its state.
///
/// Unmounts are lazy and tolerated to fail: targets may already be gone
/// when the payload exited or the kernel detached the session tmpfs.
/// Only the state directory removal is a hard error.
pub fn cleanup_container(
    id: &str,
    paths: &PorterPaths,
    executor: &dyn MountExecutor,
) -> PorterResult<()> {
    let base = paths.session(id);

    if base.exists() {
        for target in [base.join(FINAL_DIR), base.join(ROOTFS_DIR), base.clone()] {
            if let Err(e) = executor.unmount(&target) {
                tracing::warn!(
                    target = %target.display(),
                    error = %e,
                    "Unmount failed during cleanup"
                );
            }
        }

        if let Err(e) = std::fs::remove_dir_all(&base) {
            tracing::warn!(
                session = %base.display(),
                error = %e,
                "Could not remove session directory"
            );
        }
    }

    StateManager::new(paths.clone()).delete(id)?;

    tracing::info!(container_id = id, "Container removed");
    Ok(())
}
