//! The interface shared by every link of the client chain.

use std::path::Path;
use std::sync::Arc;

use crate::{Capabilities, DirEntry, FsError, Handle};

/// One link of the filesystem-client chain.
///
/// Each decorator implements `FsClient`, holds the next link, performs its
/// own pre/post-processing and forwards. The chain terminates at
/// [`StorageFs`](crate::StorageFs), which talks to a
/// [`StorageBackend`](crate::StorageBackend).
///
/// Handle-scoped calls (`download_range`, `upload_range`, `truncate`,
/// `flush`, `release`) carry the adapter's [`Handle`] so links can keep
/// per-handle state such as write buffers or read-ahead windows.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`. Methods take `&self`; links
/// keep their state behind their own locks.
///
/// # Object Safety
///
/// This trait is object-safe. Chains assembled from configuration use
/// `Arc<dyn FsClient>` between links.
pub trait FsClient: Send + Sync {
    /// What the chain below (and including) this link can do.
    fn capabilities(&self) -> Capabilities;

    /// Describe a path, or `None` if nothing exists there.
    fn attrs(&self, path: &Path) -> Result<Option<DirEntry>, FsError>;

    /// Check if a path exists.
    fn exists(&self, path: &Path) -> Result<bool, FsError> {
        Ok(self.attrs(path)?.is_some())
    }

    /// List directory contents.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the directory does not exist
    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;

    /// Create a directory.
    fn mkdir(&self, path: &Path) -> Result<(), FsError>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &Path) -> Result<(), FsError>;

    /// Remove a file.
    fn delete(&self, path: &Path) -> Result<(), FsError>;

    /// Rename a file or directory.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Replace a whole object.
    fn upload(&self, path: &Path, data: &[u8]) -> Result<(), FsError>;

    /// Read up to `len` bytes at `offset` on behalf of `handle`.
    fn download_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError>;

    /// Write `data` at `offset` on behalf of `handle`.
    ///
    /// The bytes may stay buffered until [`flush`](Self::flush).
    fn upload_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<(), FsError>;

    /// Change the length of a file.
    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError>;

    /// Make everything written through `handle` durable and visible.
    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError>;

    /// Drop all per-handle state. Unflushed bytes are discarded.
    fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError>;

    /// Render this link and everything below it, e.g. `Cache -> Storage`.
    fn describe(&self) -> String;
}

impl<T: FsClient + ?Sized> FsClient for Arc<T> {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn attrs(&self, path: &Path) -> Result<Option<DirEntry>, FsError> {
        (**self).attrs(path)
    }

    fn exists(&self, path: &Path) -> Result<bool, FsError> {
        (**self).exists(path)
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        (**self).list(path)
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        (**self).mkdir(path)
    }

    fn rmdir(&self, path: &Path) -> Result<(), FsError> {
        (**self).rmdir(path)
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        (**self).delete(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        (**self).rename(from, to)
    }

    fn upload(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        (**self).upload(path, data)
    }

    fn download_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        (**self).download_range(handle, path, offset, len)
    }

    fn upload_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<(), FsError> {
        (**self).upload_range(handle, path, offset, data)
    }

    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        (**self).truncate(handle, path, len)
    }

    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        (**self).flush(handle, path)
    }

    fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        (**self).release(handle, path)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_client_is_object_safe() {
        fn _check(_: &dyn FsClient) {}
    }

    #[test]
    fn arc_dyn_is_a_client() {
        fn _takes<C: FsClient>(_: &C) {}
        fn _check(client: &Arc<dyn FsClient>) {
            _takes(client);
        }
    }

    #[test]
    fn fs_client_requires_send_sync() {
        fn _assert_send_sync<T: Send + Sync>() {}
        fn _check<T: FsClient>() {
            _assert_send_sync::<T>();
        }
    }
}
