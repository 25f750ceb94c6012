//! The capability interface of a raw object-storage driver.
//!
//! Drivers for S3, GCS or WebDAV implement [`StorageBackend`]; the layers
//! never talk to a vendor API directly. [`StorageFs`](crate::StorageFs)
//! adapts a backend into the innermost link of the client chain.

use std::path::Path;

use crate::{
    DirEntry, FsError, GrowStrategy, PartSizeBounds, PartToken, ShrinkStrategy, TruncateSupport,
    UploadId,
};

/// Primitive operations of an object store.
///
/// All methods block the calling thread until the backend answers. Retries
/// and timeouts are the driver's responsibility; a failure worth retrying
/// should be reported as [`FsError::BackendTransient`].
///
/// # Paths
///
/// Paths are absolute (`/dir/object`) and already translated to the bucket
/// namespace. Directories are prefixes: an object at `/a/b/c` implies the
/// directories `/a` and `/a/b`.
///
/// # Multipart
///
/// Backends without multipart upload keep the default implementations,
/// which report [`FsError::Unsupported`], and return `None` from
/// [`multipart_bounds`](StorageBackend::multipart_bounds).
///
/// # Object Safety
///
/// This trait is object-safe and is normally used as `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Short human-readable name used in pipeline descriptions.
    fn name(&self) -> &str {
        "storage"
    }

    /// List the direct children of a directory.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the directory does not exist
    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;

    /// Describe a single object or directory.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if nothing exists at `path`
    fn stat(&self, path: &Path) -> Result<DirEntry, FsError>;

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes at the end of the object and an empty vector past it.
    fn get_range(&self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>, FsError>;

    /// Replace the whole object with `data`.
    fn put(&self, path: &Path, data: &[u8]) -> Result<(), FsError>;

    /// Overwrite bytes in place, zero-filling any gap past the current end.
    ///
    /// Only meaningful when [`supports_partial_overwrite`](Self::supports_partial_overwrite)
    /// returns `true`.
    fn put_range(&self, path: &Path, offset: u64, data: &[u8]) -> Result<(), FsError> {
        let _ = (offset, data);
        Err(FsError::unsupported(
            "put_range",
            path,
            "backend cannot overwrite byte ranges",
        ))
    }

    /// Part size limits, or `None` when multipart upload is unavailable.
    fn multipart_bounds(&self) -> Option<PartSizeBounds> {
        None
    }

    /// Start a multipart upload that will replace `path` on completion.
    fn begin_multipart(&self, path: &Path) -> Result<UploadId, FsError> {
        Err(FsError::unsupported(
            "begin_multipart",
            path,
            "backend has no multipart upload",
        ))
    }

    /// Upload one part of an open multipart upload.
    fn upload_part(
        &self,
        upload: &UploadId,
        index: u32,
        data: &[u8],
    ) -> Result<PartToken, FsError> {
        let _ = (index, data);
        Err(FsError::Backend(format!(
            "upload_part: unknown upload {}",
            upload.0
        )))
    }

    /// Commit all parts in order. The object becomes visible atomically.
    fn complete_multipart(&self, upload: &UploadId, parts: &[PartToken]) -> Result<(), FsError> {
        let _ = parts;
        Err(FsError::Backend(format!(
            "complete_multipart: unknown upload {}",
            upload.0
        )))
    }

    /// Discard an open multipart upload and its parts.
    fn abort_multipart(&self, upload: &UploadId) -> Result<(), FsError> {
        Err(FsError::Backend(format!(
            "abort_multipart: unknown upload {}",
            upload.0
        )))
    }

    /// Delete an object or an empty directory.
    fn delete(&self, path: &Path) -> Result<(), FsError>;

    /// Move an object or a directory tree.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Create a directory (a folder marker in object stores).
    fn mkdir(&self, path: &Path) -> Result<(), FsError>;

    /// Returns `true` if the bucket refuses writes.
    fn is_read_only(&self) -> bool;

    /// Returns `true` if [`put_range`](Self::put_range) is available.
    fn supports_partial_overwrite(&self) -> bool;

    /// The truncate emulation this backend allows.
    ///
    /// The default assumes any backend can copy a prefix down, and grows by
    /// writing the last byte when ranged puts exist or by padding otherwise.
    /// Drivers override it when a direction must be refused.
    fn truncate_support(&self) -> TruncateSupport {
        TruncateSupport {
            shrink: ShrinkStrategy::CopyDown,
            grow: if self.supports_partial_overwrite() {
                GrowStrategy::WriteLastNull
            } else {
                GrowStrategy::PadWithNulls
            },
        }
    }
}
