//! # porter-image
//!
//! Rootfs image handling for Porter:
//! - the packed-container single-file format (descriptor table reader and
//!   writer)
//! - classification of rootfs references into packed, raw squashfs, raw
//!   ext3, or sandbox directories

#![warn(missing_docs)]

pub mod packed;
pub mod resolver;

pub use packed::{FsKind, PackedImage, PackedWriter, PartitionKind};
pub use resolver::{ImageKind, ImageObject};
