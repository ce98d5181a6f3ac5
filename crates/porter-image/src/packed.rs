//! Packed-container image format.
//!
//! A packed image is a single file bundling one or more filesystem
//! partitions behind a small descriptor table, so a complete container
//! (system partition plus optional data/overlay partitions) ships as one
//! artifact. Layout, little-endian throughout:
//!
//! ```text
//! offset 0    magic            8 bytes  b"PORTPACK"
//! offset 8    format version   u32
//! offset 12   descriptor count u32
//! offset 16   reserved         16 bytes
//! offset 32   descriptor table  40 bytes per entry
//! ...         partition payloads at their recorded offsets
//! ```
//!
//! Each descriptor: `group u32, kind u32, fs u32, reserved u32,
//! offset u64, length u64`.

use std::fs::File;
use std::io::Read;

use bytes::{Buf, BufMut, BytesMut};

use porter_common::{PorterError, PorterResult};

/// Magic bytes at the start of every packed image.
pub const PACKED_MAGIC: [u8; 8] = *b"PORTPACK";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Descriptor group holding the partitions a container boots from.
pub const DEFAULT_GROUP: u32 = 1;

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 40;

/// Role a partition plays inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PartitionKind {
    /// Root filesystem partition.
    System = 1,
    /// Auxiliary data partition.
    Data = 2,
    /// Writable overlay partition.
    Overlay = 3,
}

impl PartitionKind {
    /// Decode the on-disk kind value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::System),
            2 => Some(Self::Data),
            3 => Some(Self::Overlay),
            _ => None,
        }
    }

    /// Stable name used in error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Data => "data",
            Self::Overlay => "overlay",
        }
    }
}

/// Filesystem carried by a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FsKind {
    /// Squashfs, inherently read-only.
    Squashfs = 1,
    /// Ext3, mountable writable.
    Ext3 = 2,
}

impl FsKind {
    /// Decode the on-disk filesystem value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Squashfs),
            2 => Some(Self::Ext3),
            _ => None,
        }
    }

    /// The filesystem type string handed to mount.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Squashfs => "squashfs",
            Self::Ext3 => "ext3",
        }
    }
}

/// One entry of the descriptor table.
///
/// Kind and filesystem are kept raw so unknown values survive until the
/// resolver turns them into the right error.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    /// Descriptor group.
    pub group: u32,
    /// Raw partition kind value.
    pub kind: u32,
    /// Raw filesystem value.
    pub fs: u32,
    /// Byte offset of the partition payload in the image file.
    pub offset: u64,
    /// Byte length of the partition payload.
    pub length: u64,
}

impl Descriptor {
    /// Decoded partition kind, if the raw value is known.
    #[must_use]
    pub const fn partition_kind(&self) -> Option<PartitionKind> {
        PartitionKind::from_raw(self.kind)
    }

    /// Decoded filesystem, if the raw value is known.
    #[must_use]
    pub const fn filesystem(&self) -> Option<FsKind> {
        FsKind::from_raw(self.fs)
    }
}

/// Parsed descriptor table of a packed image.
#[derive(Debug, Clone)]
pub struct PackedImage {
    descriptors: Vec<Descriptor>,
}

impl PackedImage {
    /// Returns true if `head` starts with the packed-image magic.
    #[must_use]
    pub fn matches_magic(head: &[u8]) -> bool {
        head.len() >= PACKED_MAGIC.len() && head[..PACKED_MAGIC.len()] == PACKED_MAGIC
    }

    /// Parse the header and descriptor table from the start of a reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic or version does not match, or the
    /// file is truncated.
    pub fn read_from<R: Read>(reader: &mut R) -> PorterResult<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;

        let mut buf = &header[..];
        let mut magic = [0u8; 8];
        buf.copy_to_slice(&mut magic);
        if magic != PACKED_MAGIC {
            return Err(PorterError::Config {
                message: "not a packed container image".to_string(),
            });
        }

        let version = buf.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(PorterError::Config {
                message: format!("unsupported packed image version: {version}"),
            });
        }

        let count = buf.get_u32_le() as usize;
        let mut table = vec![0u8; count * DESCRIPTOR_LEN];
        reader.read_exact(&mut table)?;

        let mut table = &table[..];
        let mut descriptors = Vec::with_capacity(count);
        for _ in 0..count {
            let group = table.get_u32_le();
            let kind = table.get_u32_le();
            let fs = table.get_u32_le();
            let _reserved = table.get_u32_le();
            let offset = table.get_u64_le();
            let length = table.get_u64_le();
            descriptors.push(Descriptor {
                group,
                kind,
                fs,
                offset,
                length,
            });
        }

        Ok(Self { descriptors })
    }

    /// Parse the descriptor table of an open image file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is not a well-formed packed image.
    pub fn open(file: &mut File) -> PorterResult<Self> {
        Self::read_from(file)
    }

    /// All descriptors, in table order.
    #[must_use]
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// First descriptor belonging to `group`, in table order.
    #[must_use]
    pub fn partition_in_group(&self, group: u32) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.group == group)
    }
}

/// Assembles packed images, one partition at a time.
///
/// Payloads land after the descriptor table in insertion order; offsets
/// and lengths are computed at write time.
#[derive(Debug, Default)]
pub struct PackedWriter {
    partitions: Vec<(u32, u32, u32, Vec<u8>)>,
}

impl PackedWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a partition with decoded kind and filesystem values.
    pub fn add_partition(&mut self, group: u32, kind: PartitionKind, fs: FsKind, data: Vec<u8>) {
        self.add_partition_raw(group, kind as u32, fs as u32, data);
    }

    /// Queue a partition with raw kind/fs values (for malformed fixtures).
    pub fn add_partition_raw(&mut self, group: u32, kind: u32, fs: u32, data: Vec<u8>) {
        self.partitions.push((group, kind, fs, data));
    }

    /// Serialize the image into a byte buffer.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        let count = self.partitions.len();
        let payload_base = (HEADER_LEN + count * DESCRIPTOR_LEN) as u64;

        let mut buf = BytesMut::new();
        buf.put_slice(&PACKED_MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(u32::try_from(count).unwrap_or(u32::MAX));
        buf.put_bytes(0, 16);

        let mut offset = payload_base;
        for (group, kind, fs, data) in &self.partitions {
            buf.put_u32_le(*group);
            buf.put_u32_le(*kind);
            buf.put_u32_le(*fs);
            buf.put_u32_le(0);
            buf.put_u64_le(offset);
            buf.put_u64_le(data.len() as u64);
            offset += data.len() as u64;
        }

        for (_, _, _, data) in &self.partitions {
            buf.put_slice(data);
        }

        buf.to_vec()
    }
}
