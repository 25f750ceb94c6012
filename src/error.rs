//! Error types for the object-storage filesystem layers.

use std::path::PathBuf;

use crate::Handle;

/// Filesystem error type with contextual variants.
///
/// Every failure that crosses a chain link is one of these. The
/// [`FilesystemAdapter`](crate::FilesystemAdapter) converts them into kernel
/// status codes with [`FsError::errno`].
///
/// # Examples
///
/// ```rust
/// use objmount::FsError;
/// use std::path::PathBuf;
///
/// let err = FsError::NotFound { path: PathBuf::from("/missing") };
/// assert!(err.to_string().contains("/missing"));
/// assert_eq!(err.errno(), libc::ENOENT);
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    // Path/File Errors
    /// Path does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// Path already exists when it shouldn't.
    #[error("{operation}: already exists: {path}")]
    AlreadyExists {
        /// The path that already exists.
        path: PathBuf,
        /// The operation that failed.
        operation: &'static str,
    },

    /// Expected a file but found a directory.
    #[error("not a file: {path}")]
    NotAFile {
        /// The path that is not a file.
        path: PathBuf,
    },

    /// Expected a directory but found something else.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The path that is not a directory.
        path: PathBuf,
    },

    /// Directory is not empty when it should be.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        /// The path to the non-empty directory.
        path: PathBuf,
    },

    /// File handle is unknown or already released.
    #[error("invalid handle: {}", handle.0)]
    InvalidHandle {
        /// The invalid handle.
        handle: Handle,
    },

    // Permission/Access Errors
    /// The backend refused access (403-style permanent failure).
    #[error("{operation}: permission denied: {path}")]
    PermissionDenied {
        /// The path where permission was denied.
        path: PathBuf,
        /// The operation that was denied.
        operation: &'static str,
    },

    /// The mount is read-only.
    #[error("read-only filesystem: {operation}")]
    ReadOnly {
        /// The operation that was attempted.
        operation: &'static str,
    },

    // Backend Errors
    /// Network, timeout or 5xx failure. Eligible for a caller-level retry.
    #[error("{operation} failed for {path}: {message}")]
    BackendTransient {
        /// The backend operation that failed.
        operation: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Driver-provided description.
        message: String,
    },

    /// Requested byte range is not valid for the object.
    #[error("invalid range {offset}+{len} for {path}")]
    InvalidRange {
        /// The object path.
        path: PathBuf,
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        len: u64,
    },

    /// The requested truncate direction or write pattern cannot be realized
    /// by the active backend.
    #[error("{operation}: not supported for {path}: {reason}")]
    Unsupported {
        /// The unsupported operation.
        operation: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Why the backend cannot realize it.
        reason: &'static str,
    },

    /// Non-blocking lock acquisition found the path held.
    #[error("path is locked: {path}")]
    LockContention {
        /// The contended path.
        path: PathBuf,
    },

    /// A part upload failed; the whole upload session was aborted.
    #[error("upload of part {part} failed for {path}: {source}")]
    PartialUpload {
        /// The object path.
        path: PathBuf,
        /// Index of the failed part.
        part: u32,
        /// The underlying failure.
        #[source]
        source: Box<FsError>,
    },

    /// A handle kept writing after its upload session was aborted.
    #[error("upload session was aborted: {path}")]
    UploadAborted {
        /// The object path.
        path: PathBuf,
    },

    /// Another handle owns the open upload session for this path.
    #[error("conflict: {path}")]
    Conflict {
        /// The path with a conflict.
        path: PathBuf,
    },

    /// Mount configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic backend error.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error with context.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The path involved in the operation.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// The POSIX status code reported to the kernel for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound { .. } => libc::ENOENT,
            FsError::AlreadyExists { .. } => libc::EEXIST,
            FsError::NotAFile { .. } => libc::EISDIR,
            FsError::NotADirectory { .. } => libc::ENOTDIR,
            FsError::DirectoryNotEmpty { .. } => libc::ENOTEMPTY,
            FsError::InvalidHandle { .. } => libc::EBADF,
            FsError::PermissionDenied { .. } => libc::EACCES,
            FsError::ReadOnly { .. } => libc::EROFS,
            FsError::InvalidRange { .. } | FsError::InvalidConfig(_) => libc::EINVAL,
            FsError::Unsupported { .. } => libc::ENOTSUP,
            FsError::LockContention { .. } => libc::EAGAIN,
            FsError::Conflict { .. } => libc::EBUSY,
            FsError::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            FsError::BackendTransient { .. }
            | FsError::PartialUpload { .. }
            | FsError::UploadAborted { .. }
            | FsError::Backend(_) => libc::EIO,
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    ///
    /// The layers never retry on their own; retries belong to the backend
    /// driver or the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            FsError::BackendTransient { .. } => true,
            FsError::PartialUpload { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn unsupported(
        operation: &'static str,
        path: impl Into<PathBuf>,
        reason: &'static str,
    ) -> Self {
        FsError::Unsupported {
            operation,
            path: path.into(),
            reason,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound {
                path: PathBuf::new(),
            },
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied {
                path: PathBuf::new(),
                operation: "io",
            },
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists {
                path: PathBuf::new(),
                operation: "io",
            },
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::ConnectionReset => {
                FsError::BackendTransient {
                    operation: "io",
                    path: PathBuf::new(),
                    message: error.to_string(),
                }
            }
            _ => FsError::Io {
                operation: "io",
                path: PathBuf::new(),
                source: error,
            },
        }
    }
}
