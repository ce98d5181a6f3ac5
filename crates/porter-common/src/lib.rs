//! # porter-common
//!
//! Shared types for the Porter container runtime:
//! - Container ID validation and generation
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{PorterError, PorterResult};
pub use id::ContainerId;
pub use paths::PorterPaths;
