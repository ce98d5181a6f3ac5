//! # porter-oci
//!
//! OCI (Open Container Initiative) specification types for Porter:
//! - the consumed subset of the OCI Runtime Specification (config.json)
//! - container state management (state.json)

#![warn(missing_docs)]

pub mod runtime;
pub mod state;

pub use runtime::Spec;
pub use state::{ContainerState, ContainerStatus};
