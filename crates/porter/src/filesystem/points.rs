//! Tagged, ordered mount points.

use std::collections::HashMap;
use std::path::PathBuf;

use rustix::mount::MountFlags;

use porter_oci::runtime::Mount as SpecMount;

/// Execution-order grouping for mount points.
///
/// Tags determine precedence, not identity: every point under one tag is
/// processed before any point of a later tag, so a bind whose destination
/// lives inside the rootfs can never run before the rootfs mount exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MountTag {
    /// Session workspace bootstrap (the backing tmpfs).
    Session,
    /// The container root filesystem.
    Rootfs,
    /// Overlay layer assembly (merged mount).
    Layer,
    /// Generic bind mounts from the runtime spec.
    Binds,
    /// Kernel filesystems (proc, sysfs, devpts, ...).
    Kernel,
}

impl MountTag {
    /// All tags, in execution order.
    pub const ORDER: [Self; 5] = [
        Self::Session,
        Self::Rootfs,
        Self::Layer,
        Self::Binds,
        Self::Kernel,
    ];
}

impl std::fmt::Display for MountTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Rootfs => write!(f, "rootfs"),
            Self::Layer => write!(f, "layer"),
            Self::Binds => write!(f, "binds"),
            Self::Kernel => write!(f, "kernel"),
        }
    }
}

/// Filesystem types that mount under the [`MountTag::Kernel`] tag.
const KERNEL_FSTYPES: &[&str] = &["proc", "sysfs", "devpts", "tmpfs", "mqueue", "cgroup"];

/// Mount flag bits absent from rustix's public [`MountFlags`] set.
///
/// [`MountFlags`] retains externally-defined bits, so these reach the
/// `mount` syscall like any named flag.
pub trait MountFlagsExt {
    /// `MS_REMOUNT`
    const REMOUNT: MountFlags;
    /// `MS_MANDLOCK`
    const MANDLOCK: MountFlags;
}

impl MountFlagsExt for MountFlags {
    const REMOUNT: Self = Self::from_bits_retain(libc::MS_REMOUNT as u32);
    const MANDLOCK: Self = Self::from_bits_retain(libc::MS_MANDLOCK as u32);
}

/// Mount options that translate to flag bits.
const OPTION_FLAGS: &[(&str, MountFlags)] = &[
    ("ro", MountFlags::RDONLY),
    ("nosuid", MountFlags::NOSUID),
    ("nodev", MountFlags::NODEV),
    ("noexec", MountFlags::NOEXEC),
    ("sync", MountFlags::SYNCHRONOUS),
    ("remount", MountFlags::REMOUNT),
    ("mand", MountFlags::MANDLOCK),
    ("dirsync", MountFlags::DIRSYNC),
    ("noatime", MountFlags::NOATIME),
    ("nodiratime", MountFlags::NODIRATIME),
    ("bind", MountFlags::BIND),
    ("rbind", MountFlags::BIND.union(MountFlags::REC)),
    ("silent", MountFlags::SILENT),
    ("relatime", MountFlags::RELATIME),
    ("strictatime", MountFlags::STRICTATIME),
];

/// Options recognized but carrying no flag bits.
const OPTION_NOOPS: &[&str] = &[
    "rw",
    "defaults",
    "dev",
    "exec",
    "suid",
    "async",
    "atime",
    "diratime",
];

/// Translate an OCI mount option list into flag bits plus the
/// filesystem-specific options left to pass through as mount data.
///
/// Unrecognized options are not rejected; they go through verbatim.
#[must_use]
pub fn convert_options(options: &[String]) -> (MountFlags, Vec<String>) {
    let mut flags = MountFlags::empty();
    let mut data = Vec::new();

    for opt in options {
        if let Some((_, flag)) = OPTION_FLAGS.iter().find(|(name, _)| name == opt) {
            flags |= *flag;
        } else if !OPTION_NOOPS.contains(&opt.as_str()) {
            data.push(opt.clone());
        }
    }

    (flags, data)
}

/// A single mount request.
#[derive(Debug, Clone)]
pub struct MountPoint {
    /// Mount source: a device, host path, or filesystem name.
    pub source: PathBuf,
    /// Destination. Absolute session paths are used as-is; everything
    /// else is resolved against the target root at execution time.
    pub destination: PathBuf,
    /// Filesystem type; empty for plain binds.
    pub fstype: String,
    /// Mount flag bits.
    pub flags: MountFlags,
    /// Filesystem-specific options, comma-joined into mount data.
    pub options: Vec<String>,
    /// Byte offset into the backing file. Set only for image-backed mounts.
    pub offset: Option<u64>,
    /// Byte length of the backing range. Set only for image-backed mounts.
    pub size_limit: Option<u64>,
}

impl MountPoint {
    /// Returns true when the point mounts a byte range of an image file
    /// and needs a loop device.
    #[must_use]
    pub const fn is_image_backed(&self) -> bool {
        self.offset.is_some()
    }

    /// The option string passed as mount data.
    #[must_use]
    pub fn data(&self) -> String {
        self.options.join(",")
    }
}

/// An ordered, tagged collection of mount requests.
///
/// Append order is preserved per tag and is the tie-break order when
/// multiple points share a tag.
#[derive(Debug, Default)]
pub struct MountPoints {
    points: HashMap<MountTag, Vec<MountPoint>>,
}

impl MountPoints {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bind mount under `tag`.
    pub fn add_bind(
        &mut self,
        tag: MountTag,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        flags: MountFlags,
    ) {
        self.push(
            tag,
            MountPoint {
                source: source.into(),
                destination: destination.into(),
                fstype: String::new(),
                flags,
                options: Vec::new(),
                offset: None,
                size_limit: None,
            },
        );
    }

    /// Append a filesystem mount under `tag`.
    pub fn add_mount(
        &mut self,
        tag: MountTag,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        fstype: impl Into<String>,
        flags: MountFlags,
        options: Vec<String>,
    ) {
        self.push(
            tag,
            MountPoint {
                source: source.into(),
                destination: destination.into(),
                fstype: fstype.into(),
                flags,
                options,
                offset: None,
                size_limit: None,
            },
        );
    }

    /// Append an image-backed mount under `tag`.
    ///
    /// The byte range is attached to a loop device before mounting;
    /// `size` of zero means the rest of the file.
    pub fn add_image(
        &mut self,
        tag: MountTag,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        fstype: impl Into<String>,
        flags: MountFlags,
        offset: u64,
        size: u64,
    ) {
        self.push(
            tag,
            MountPoint {
                source: source.into(),
                destination: destination.into(),
                fstype: fstype.into(),
                flags,
                options: Vec::new(),
                offset: Some(offset),
                size_limit: Some(size),
            },
        );
    }

    /// Import a runtime spec's mount list.
    ///
    /// Kernel filesystem types go under [`MountTag::Kernel`], everything
    /// else under [`MountTag::Binds`]. Option lists are translated into
    /// flag bits plus pass-through mount data.
    pub fn import_from_spec(&mut self, mounts: &[SpecMount]) {
        for mount in mounts {
            let fstype = mount.mount_type.clone().unwrap_or_default();
            let (flags, options) = convert_options(&mount.options);
            let tag = if KERNEL_FSTYPES.contains(&fstype.as_str()) {
                MountTag::Kernel
            } else {
                MountTag::Binds
            };

            tracing::debug!(
                destination = %mount.destination.display(),
                fstype = %fstype,
                tag = %tag,
                "Imported spec mount"
            );

            self.push(
                tag,
                MountPoint {
                    source: mount.source.clone().unwrap_or_default(),
                    destination: mount.destination.clone(),
                    fstype,
                    flags,
                    options,
                    offset: None,
                    size_limit: None,
                },
            );
        }
    }

    /// Points registered under `tag`, in append order.
    #[must_use]
    pub fn points_for(&self, tag: MountTag) -> &[MountPoint] {
        self.points.get(&tag).map_or(&[], Vec::as_slice)
    }

    /// Total number of registered points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.values().map(Vec::len).sum()
    }

    /// Returns true when no points are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.values().all(Vec::is_empty)
    }

    fn push(&mut self, tag: MountTag, point: MountPoint) {
        self.points.entry(tag).or_default().push(point);
    }
}
