//! # Extension Traits
//!
//! Convenience methods for any [`FsClient`].
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`stat`](FsClientExt::stat) | Like `attrs`, but a missing path is an error |
//! | [`is_file`](FsClientExt::is_file) | Check if path is a regular file |
//! | [`is_dir`](FsClientExt::is_dir) | Check if path is a directory |
//! | [`file_size`](FsClientExt::file_size) | Size of a file in bytes |
//! | [`read_all`](FsClientExt::read_all) | Download a whole object through a handle |

use std::path::Path;

use crate::{DirEntry, FsClient, FsError, Handle, MIB};

/// Extension methods for any chain link.
///
/// # Example
///
/// ```rust
/// use objmount::{FsClient, FsClientExt, FsError};
/// use std::path::Path;
///
/// fn size_if_file<C: FsClient>(client: &C, path: &Path) -> Result<Option<u64>, FsError> {
///     if client.is_file(path)? {
///         return Ok(Some(client.file_size(path)?));
///     }
///     Ok(None)
/// }
/// ```
pub trait FsClientExt: FsClient {
    /// Describe a path.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if nothing exists at `path`
    fn stat(&self, path: &Path) -> Result<DirEntry, FsError> {
        self.attrs(path)?.ok_or_else(|| FsError::NotFound {
            path: path.to_path_buf(),
        })
    }

    /// Check if the path points to a regular file.
    ///
    /// Returns `Ok(false)` if the path doesn't exist (not an error).
    fn is_file(&self, path: &Path) -> Result<bool, FsError> {
        Ok(self.attrs(path)?.is_some_and(|e| e.is_file()))
    }

    /// Check if the path points to a directory.
    ///
    /// Returns `Ok(false)` if the path doesn't exist (not an error).
    fn is_dir(&self, path: &Path) -> Result<bool, FsError> {
        Ok(self.attrs(path)?.is_some_and(|e| e.is_dir()))
    }

    /// Get the size of a file in bytes.
    ///
    /// # Errors
    ///
    /// Returns `FsError::NotFound` if the path doesn't exist.
    fn file_size(&self, path: &Path) -> Result<u64, FsError> {
        Ok(self.stat(path)?.size)
    }

    /// Download `len` bytes starting at zero in 1 MiB reads.
    ///
    /// Stops early at end of object.
    fn read_all(&self, handle: Handle, path: &Path, len: u64) -> Result<Vec<u8>, FsError> {
        let mut out = Vec::with_capacity(len as usize);
        while (out.len() as u64) < len {
            let want = (len - out.len() as u64).min(MIB) as usize;
            let chunk = self.download_range(handle, path, out.len() as u64, want)?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl<C: FsClient + ?Sized> FsClientExt for C {}
