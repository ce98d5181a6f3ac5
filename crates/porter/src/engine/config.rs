//! Engine configuration documents.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use porter_common::ContainerId;
use porter_oci::Spec;

/// This engine's identity, matched against [`CommonConfig::engine_name`].
pub const ENGINE_NAME: &str = "porter";

/// Engine-specific creation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Root filesystem image: a packed container file, raw squashfs or
    /// ext3 image, or a sandbox directory.
    pub image: PathBuf,

    /// Open the image writable.
    #[serde(default)]
    pub writable_image: bool,

    /// Writable image backing the overlay upper/work layer instead of
    /// the session tmpfs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_image: Option<PathBuf>,

    /// Assemble the overlay layer. Disabled, the container chroots into
    /// the rootfs mount directly.
    #[serde(default = "default_true")]
    pub overlay_fs_enabled: bool,

    /// Mount fresh `/tmp` and `/dev` instead of inheriting the host's.
    #[serde(default)]
    pub contain: bool,

    /// Detach after creation instead of monitoring the payload.
    #[serde(default)]
    pub is_instance: bool,
}

fn default_true() -> bool {
    true
}

/// The configuration document handed to the engine process: engine
/// identity, container identity, engine parameters, and the runtime spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfig {
    /// Name of the engine expected to handle this container.
    pub engine_name: String,

    /// Container identity.
    pub container_id: ContainerId,

    /// Engine-specific parameters.
    pub engine_config: EngineConfig,

    /// The container's runtime spec.
    pub spec: Spec,
}
