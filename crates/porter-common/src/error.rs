//! Common error types for the Porter runtime.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`PorterError`].
pub type PorterResult<T> = Result<T, PorterError>;

/// Errors across the Porter runtime.
#[derive(Error, Diagnostic, Debug)]
pub enum PorterError {
    /// The launch configuration names a different engine.
    #[error("Engine mismatch: configured for '{found}', this engine is '{expected}'")]
    #[diagnostic(code(porter::engine::mismatch))]
    EngineMismatch {
        /// The name this engine answers to.
        expected: String,
        /// The name found in the configuration.
        found: String,
    },

    /// No partition in the image's default descriptor group.
    #[error("No partition found in default group of image: {path}")]
    #[diagnostic(code(porter::image::partition_not_found))]
    PartitionNotFound {
        /// The image file that was inspected.
        path: String,
    },

    /// The default-group partition is not a system partition.
    #[error("Default partition of {path} is not a system partition (kind: {kind})")]
    #[diagnostic(code(porter::image::wrong_partition_kind))]
    WrongPartitionKind {
        /// The image file that was inspected.
        path: String,
        /// The partition kind that was found.
        kind: String,
    },

    /// The partition carries a filesystem this runtime cannot mount.
    #[error("Unsupported filesystem in image {path}: {filesystem}")]
    #[diagnostic(code(porter::image::unsupported_filesystem))]
    UnsupportedFilesystem {
        /// The image file that was inspected.
        path: String,
        /// The filesystem identifier that was found.
        filesystem: String,
    },

    /// A writable mount was requested for an inherently read-only filesystem.
    #[error("Image {path} is squashfs and cannot be mounted writable")]
    #[diagnostic(
        code(porter::image::read_only_conflict),
        help("Use an ext3 image or a sandbox directory for writable containers")
    )]
    ReadOnlyFilesystemConflict {
        /// The image file that was rejected.
        path: String,
    },

    /// Attaching a file range to a loop device failed.
    #[error("Failed to attach {path} to a loop device: {reason}")]
    #[diagnostic(code(porter::loopdev::attach_failed))]
    LoopAttachFailed {
        /// The backing file.
        path: String,
        /// Why the kernel refused the attach.
        reason: String,
    },

    /// A mount destination inside the session layout does not exist.
    #[error("Mount target does not exist in session: {destination}")]
    #[diagnostic(code(porter::mount::missing_target))]
    MissingMountTarget {
        /// The missing destination path.
        destination: String,
    },

    /// A remount request failed.
    #[error("Can't remount {destination}: {reason}")]
    #[diagnostic(code(porter::mount::remount_failed))]
    RemountFailed {
        /// The destination that could not be remounted.
        destination: String,
        /// The underlying failure.
        reason: String,
    },

    /// A required (non-skippable) mount failed.
    #[error("Failed to mount {destination}: {reason}")]
    #[diagnostic(code(porter::mount::failed))]
    MountFailed {
        /// The destination that could not be mounted.
        destination: String,
        /// The underlying failure.
        reason: String,
    },

    /// Upper-layer directory creation was attempted after the overlay mount.
    #[error("Overlay is already mounted, cannot add directory: {path}")]
    #[diagnostic(code(porter::overlay::sealed))]
    OverlaySealed {
        /// The directory that was requested.
        path: String,
    },

    /// The privileged RPC client could not be constructed.
    #[error("RPC client initialization failed: {reason}")]
    #[diagnostic(code(porter::rpc::init_failed))]
    RpcInitFailed {
        /// Why construction failed.
        reason: String,
    },

    /// A privileged RPC call failed or the channel broke.
    #[error("RPC {operation} failed: {reason}")]
    #[diagnostic(code(porter::rpc::call_failed))]
    RpcCallFailed {
        /// The operation that was in flight.
        operation: String,
        /// The peer's error string or the transport failure.
        reason: String,
    },

    /// Replacing the process image with the container command failed.
    #[error("exec {command} failed: {reason}")]
    #[diagnostic(code(porter::engine::exec_failed))]
    ExecFailed {
        /// The command that could not be executed.
        command: String,
        /// The underlying failure.
        reason: String,
    },

    /// Container monitoring was interrupted by a non-child signal.
    #[error("Monitoring interrupted by signal {signal}")]
    #[diagnostic(code(porter::monitor::interrupted))]
    MonitorInterrupted {
        /// The interrupting signal number.
        signal: i32,
    },

    /// Container not found.
    #[error("Container not found: {id}")]
    #[diagnostic(code(porter::container::not_found))]
    ContainerNotFound {
        /// The container ID that was not found.
        id: String,
    },

    /// Invalid container ID format.
    #[error("Invalid container ID: {id}")]
    #[diagnostic(
        code(porter::container::invalid_id),
        help("Container IDs must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidContainerId {
        /// The invalid container ID.
        id: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(porter::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(porter::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(porter::serialization))]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(porter::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl From<serde_json::Error> for PorterError {
    fn from(err: serde_json::Error) -> Self {
        PorterError::Serialization(err.to_string())
    }
}
