//! # Porter Container Engine
//!
//! Porter is the container-creation core of an OCI-compatible runtime
//! built in Rust.
//!
//! ## Features
//!
//! - **Ordered mount plan**: mount points carry tags and execute in a
//!   fixed precedence (session, rootfs, layer, binds, kernel) with
//!   post-tag hooks
//! - **Overlay sessions**: an ephemeral tmpfs workspace assembling an
//!   overlayfs over read-only root images
//! - **Image detection**: packed containers, raw squashfs and ext3
//!   images, and sandbox directories, loop-mounted as needed
//! - **Privilege separation**: the engine drops privileges while a
//!   confined helper performs mounts over an RPC channel
//!
//! ## Usage
//!
//! ```no_run
//! use porter::engine::{self, CommonConfig, ENGINE_NAME, EngineConfig};
//! use porter_common::{ContainerId, PorterPaths};
//! use porter_oci::Spec;
//!
//! # fn example() -> porter_common::PorterResult<()> {
//! let config = CommonConfig {
//!     engine_name: ENGINE_NAME.to_string(),
//!     container_id: ContainerId::new("demo")?,
//!     engine_config: EngineConfig {
//!         image: "/images/base.img".into(),
//!         writable_image: false,
//!         overlay_image: None,
//!         overlay_fs_enabled: true,
//!         contain: false,
//!         is_instance: false,
//!     },
//!     spec: Spec::default(),
//! };
//!
//! // Fork, build the container, exec the payload, return its exit code.
//! let exit_code = engine::run(config, PorterPaths::new())?;
//! # let _ = exit_code;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod engine;
pub mod filesystem;
pub mod rpc;

pub use engine::Engine;
