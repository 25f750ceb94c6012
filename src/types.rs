//! Core types shared by the backend, the chain links and the adapter.

use std::time::SystemTime;

/// One kibibyte.
pub const KIB: u64 = 1024;
/// One mebibyte.
pub const MIB: u64 = 1024 * KIB;
/// One gibibyte.
pub const GIB: u64 = 1024 * MIB;

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileType {
    /// Regular file (an object).
    File,
    /// Directory (a prefix or folder marker).
    Directory,
}

/// A child entry of a directory listing, also used as the result of `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirEntry {
    /// Name of the entry (final path component only).
    pub name: String,
    /// Type of the entry.
    pub file_type: FileType,
    /// Size in bytes. Zero for directories.
    pub size: u64,
    /// Last modification time.
    #[cfg_attr(feature = "serde", serde(with = "system_time_serde"))]
    pub mtime: SystemTime,
}

impl DirEntry {
    /// A file entry.
    pub fn file(name: impl Into<String>, size: u64, mtime: SystemTime) -> Self {
        Self {
            name: name.into(),
            file_type: FileType::File,
            size,
            mtime,
        }
    }

    /// A directory entry.
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_type: FileType::Directory,
            size: 0,
            mtime: SystemTime::UNIX_EPOCH,
        }
    }

    /// Returns `true` if this is a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Returns `true` if this is a regular file.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }
}

/// Attributes reported by `getattr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Type of the entry.
    pub file_type: FileType,
    /// Size in bytes.
    pub size: u64,
    /// Permission bits (without the file type bits).
    pub mode: u32,
    /// Number of hard links.
    pub nlink: u32,
    /// Last modification time; also reported as access and change time.
    pub mtime: SystemTime,
}

impl Metadata {
    /// Full `st_mode` value including the file type bits.
    pub fn st_mode(&self) -> u32 {
        let kind = match self.file_type {
            FileType::File => libc::S_IFREG,
            FileType::Directory => libc::S_IFDIR,
        };
        kind as u32 | self.mode
    }

    /// Returns `true` if this is a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Filesystem statistics (like `statvfs`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatFs {
    /// Block size in bytes.
    pub block_size: u64,
    /// Total number of blocks.
    pub blocks: u64,
    /// Free blocks.
    pub blocks_free: u64,
    /// Blocks available to unprivileged users.
    pub blocks_available: u64,
    /// Maximum filename length.
    pub max_name_len: u64,
}

/// Opaque file handle issued by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Handle(pub u64);

/// Flags for opening a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create file if it doesn't exist.
    pub create: bool,
    /// Truncate file to zero length.
    pub truncate: bool,
    /// Append to end of file.
    pub append: bool,
}

impl OpenFlags {
    /// Read-only access.
    pub const READ: Self = Self {
        read: true,
        write: false,
        create: false,
        truncate: false,
        append: false,
    };

    /// Write access with create and truncate.
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: true,
        append: false,
    };

    /// Read and write access.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        create: false,
        truncate: false,
        append: false,
    };

    /// Append mode - writes go to end of file.
    pub const APPEND: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: false,
        append: true,
    };

    /// Decode kernel `open(2)` flags.
    pub fn from_posix(flags: i32) -> Self {
        let access = flags & libc::O_ACCMODE;
        Self {
            read: access == libc::O_RDONLY || access == libc::O_RDWR,
            write: access == libc::O_WRONLY || access == libc::O_RDWR,
            create: flags & libc::O_CREAT != 0,
            truncate: flags & libc::O_TRUNC != 0,
            append: flags & libc::O_APPEND != 0,
        }
    }

    /// Returns `true` if the handle may modify the file.
    #[inline]
    pub fn writes(&self) -> bool {
        self.write || self.append
    }
}

/// Identifier of a backend multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(pub String);

/// Backend-assigned token for one uploaded part (an ETag for S3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartToken {
    /// Zero-based part index.
    pub index: u32,
    /// Opaque value returned by the backend.
    pub tag: String,
}

/// Size limits the backend imposes on every multipart part but the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSizeBounds {
    /// Smallest allowed non-final part.
    pub min: u64,
    /// Largest allowed part.
    pub max: u64,
}

impl PartSizeBounds {
    /// The limits of S3 and S3-compatible stores.
    pub const S3: Self = Self {
        min: 5 * MIB,
        max: 5 * GIB,
    };

    /// Returns `true` if `size` is a valid non-final part size.
    #[inline]
    pub fn contains(&self, size: u64) -> bool {
        size >= self.min && size <= self.max
    }

    /// Clamp a configured chunk size into the bounds.
    #[inline]
    pub fn clamp(&self, size: u64) -> u64 {
        size.clamp(self.min, self.max)
    }
}

/// How a backend can be made to shrink an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkStrategy {
    /// Only truncation to zero (an empty put) is possible.
    Unsupported,
    /// Download the kept prefix and overwrite the object with it.
    CopyDown,
}

/// How a backend can be made to grow an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowStrategy {
    /// Growing is not possible.
    Unsupported,
    /// Append zero bytes up to the new length.
    PadWithNulls,
    /// Write one zero byte at `new_len - 1` with a ranged put.
    WriteLastNull,
}

/// The truncate emulation a backend supports, per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncateSupport {
    /// Strategy for `new_len < current_len`.
    pub shrink: ShrinkStrategy,
    /// Strategy for `new_len > current_len`.
    pub grow: GrowStrategy,
}

impl TruncateSupport {
    /// Nothing but truncation to zero.
    pub const NONE: Self = Self {
        shrink: ShrinkStrategy::Unsupported,
        grow: GrowStrategy::Unsupported,
    };

    /// Copy-down shrink only; growth is refused.
    pub const SHRINK_ONLY: Self = Self {
        shrink: ShrinkStrategy::CopyDown,
        grow: GrowStrategy::Unsupported,
    };
}

/// What the remainder of a chain can do, as seen by the link above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// All mutations are refused.
    pub read_only: bool,
    /// Multipart part limits, `None` when multipart upload is unavailable.
    pub multipart: Option<PartSizeBounds>,
    /// Ranged puts can overwrite bytes in place.
    pub partial_overwrite: bool,
    /// Truncate emulation available to [`TruncateFs`](crate::TruncateFs).
    pub truncate: TruncateSupport,
}

#[cfg(feature = "serde")]
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        (duration.as_secs(), duration.subsec_nanos()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (secs, nanos): (u64, u32) = Deserialize::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::new(secs, nanos))
    }
}
