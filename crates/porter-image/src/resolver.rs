//! Image classification.
//!
//! Turns a rootfs reference (file or directory) into an [`ImageObject`]
//! describing how it has to be mounted: bind for sandboxes, loop-backed
//! filesystem mount for everything else.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use porter_common::{PorterError, PorterResult};

use crate::packed::{DEFAULT_GROUP, FsKind, PackedImage, PartitionKind};

/// Squashfs superblock magic, at offset 0.
const SQUASHFS_MAGIC: [u8; 4] = *b"hsqs";

/// Ext-family superblock magic value.
const EXT_MAGIC: u16 = 0xEF53;

/// Byte offset of the ext superblock magic (superblock at 1024, s_magic
/// at +56).
const EXT_MAGIC_OFFSET: u64 = 1080;

/// What a rootfs reference turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Packed container file; the system partition carries `fs`.
    Packed {
        /// Filesystem of the resolved system partition.
        fs: FsKind,
    },
    /// Raw squashfs file.
    Squashfs,
    /// Raw ext3 file.
    Ext3,
    /// Plain directory.
    Sandbox,
}

impl ImageKind {
    /// The filesystem type string for mounting, if block-backed.
    #[must_use]
    pub const fn fs_type(&self) -> Option<&'static str> {
        match self {
            Self::Packed { fs } => Some(fs.as_str()),
            Self::Squashfs => Some("squashfs"),
            Self::Ext3 => Some("ext3"),
            Self::Sandbox => None,
        }
    }

    /// Returns true for directory-backed images.
    #[must_use]
    pub const fn is_sandbox(&self) -> bool {
        matches!(self, Self::Sandbox)
    }
}

/// A resolved rootfs image, valid for one container-creation call.
#[derive(Debug)]
pub struct ImageObject {
    /// Path the image was resolved from.
    pub path: PathBuf,
    /// Open read handle, kept for the lifetime of the creation call.
    /// `None` for sandboxes.
    pub file: Option<File>,
    /// Classification.
    pub kind: ImageKind,
    /// Whether the caller asked for a writable rootfs.
    pub writable: bool,
    /// Byte offset of the mountable filesystem within the file.
    pub offset: u64,
    /// Byte length of the mountable filesystem, 0 when unbounded.
    pub size: u64,
}

impl ImageObject {
    /// Classify `path` and validate it against the requested writability.
    ///
    /// # Errors
    ///
    /// Fails when the path cannot be read, the packed image has no valid
    /// system partition, the filesystem is unsupported, or a writable
    /// mount was requested for squashfs.
    pub fn resolve(path: &Path, writable: bool) -> PorterResult<Self> {
        let meta = std::fs::metadata(path)?;
        if meta.is_dir() {
            tracing::debug!(path = %path.display(), "Image is a sandbox directory");
            return Ok(Self {
                path: path.to_path_buf(),
                file: None,
                kind: ImageKind::Sandbox,
                writable,
                offset: 0,
                size: 0,
            });
        }

        let file = File::open(path)?;

        let mut head = [0u8; 8];
        let head_len = file.read_at(&mut head, 0)?;
        if PackedImage::matches_magic(&head[..head_len]) {
            return Self::resolve_packed(path, file, writable);
        }

        let kind = Self::classify_raw(path, &file, &head[..head_len])?;
        if kind == ImageKind::Squashfs && writable {
            return Err(PorterError::ReadOnlyFilesystemConflict {
                path: path.display().to_string(),
            });
        }

        tracing::debug!(path = %path.display(), ?kind, "Image classified by raw signature");
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            kind,
            writable,
            offset: 0,
            size: 0,
        })
    }

    /// Resolve the system partition of a packed image.
    fn resolve_packed(path: &Path, mut file: File, writable: bool) -> PorterResult<Self> {
        let image = PackedImage::open(&mut file)?;

        let part = image.partition_in_group(DEFAULT_GROUP).copied().ok_or_else(|| {
            PorterError::PartitionNotFound {
                path: path.display().to_string(),
            }
        })?;

        match part.partition_kind() {
            Some(PartitionKind::System) => {}
            Some(other) => {
                return Err(PorterError::WrongPartitionKind {
                    path: path.display().to_string(),
                    kind: other.as_str().to_string(),
                });
            }
            None => {
                return Err(PorterError::WrongPartitionKind {
                    path: path.display().to_string(),
                    kind: format!("unknown({})", part.kind),
                });
            }
        }

        let fs = part.filesystem().ok_or_else(|| PorterError::UnsupportedFilesystem {
            path: path.display().to_string(),
            filesystem: format!("unknown({})", part.fs),
        })?;

        if fs == FsKind::Squashfs && writable {
            return Err(PorterError::ReadOnlyFilesystemConflict {
                path: path.display().to_string(),
            });
        }

        tracing::debug!(
            path = %path.display(),
            fs = fs.as_str(),
            offset = part.offset,
            size = part.length,
            "Resolved packed image system partition"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            kind: ImageKind::Packed { fs },
            writable,
            offset: part.offset,
            size: part.length,
        })
    }

    /// Classify a non-packed file by its filesystem signature.
    fn classify_raw(path: &Path, file: &File, head: &[u8]) -> PorterResult<ImageKind> {
        if head.len() >= SQUASHFS_MAGIC.len() && head[..SQUASHFS_MAGIC.len()] == SQUASHFS_MAGIC {
            return Ok(ImageKind::Squashfs);
        }

        let mut magic = [0u8; 2];
        match file.read_exact_at(&mut magic, EXT_MAGIC_OFFSET) {
            Ok(()) => {
                if u16::from_le_bytes(magic) == EXT_MAGIC {
                    return Ok(ImageKind::Ext3);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {}
            Err(err) => return Err(err.into()),
        }

        Err(PorterError::UnsupportedFilesystem {
            path: path.display().to_string(),
            filesystem: "unknown".to_string(),
        })
    }
}
