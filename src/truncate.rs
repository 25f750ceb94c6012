//! Truncate emulation.
//!
//! Object stores cannot resize an object in place. [`TruncateFs`] rewrites
//! the object with one of the strategies the backend declares through
//! [`Capabilities::truncate`](crate::Capabilities):
//!
//! | Direction | Strategy | Effect on the backend |
//! |-----------|----------|-----------------------|
//! | shrink | [`ShrinkStrategy::CopyDown`] | download `[0, len)`, overwrite the object |
//! | grow | [`GrowStrategy::PadWithNulls`] | append zero bytes through an upload session |
//! | grow | [`GrowStrategy::WriteLastNull`] | one ranged write of a zero byte at `len - 1` |
//!
//! Truncating to the current length does nothing; truncating to zero is a
//! single empty put. Anything else the backend did not declare fails with
//! [`FsError::Unsupported`].

use std::path::Path;

use tracing::debug;

use crate::{
    Capabilities, DirEntry, FsClient, FsClientExt, FsError, GrowStrategy, Handle, Layer,
    ShrinkStrategy, MIB,
};

const ZERO_PIECE: u64 = 8 * MIB;

/// Chain link emulating `truncate`.
pub struct TruncateFs<C> {
    inner: C,
    staging_capacity: u64,
}

impl<C: FsClient> TruncateFs<C> {
    /// Wrap `inner`. Copy-and-shrink stages at most `staging_capacity` bytes
    /// in memory; longer prefixes stream through a multipart upload.
    pub fn new(inner: C, staging_capacity: u64) -> Self {
        Self {
            inner,
            staging_capacity,
        }
    }

    fn copy_down(
        &self,
        capabilities: &Capabilities,
        handle: Handle,
        path: &Path,
        len: u64,
    ) -> Result<(), FsError> {
        if len <= self.staging_capacity {
            debug!(path = %path.display(), len, "truncate: copy-and-shrink in memory");
            let prefix = self.inner.read_all(handle, path, len)?;
            return self.inner.upload(path, &prefix);
        }
        if capabilities.multipart.is_none() || capabilities.partial_overwrite {
            return Err(FsError::unsupported(
                "truncate",
                path,
                "kept prefix exceeds the truncate staging buffer",
            ));
        }
        debug!(path = %path.display(), len, "truncate: copy-and-shrink through multipart");
        let piece = self.staging_capacity.max(1);
        let mut offset = 0;
        while offset < len {
            let want = (len - offset).min(piece) as usize;
            let data = self.inner.download_range(handle, path, offset, want)?;
            if data.is_empty() {
                break;
            }
            self.inner.upload_range(handle, path, offset, &data)?;
            offset += data.len() as u64;
        }
        // Cut the session at `len` so the commit does not carry the old tail.
        self.inner.truncate(handle, path, len)?;
        self.inner.flush(handle, path)
    }

    fn pad_with_nulls(
        &self,
        handle: Handle,
        path: &Path,
        current: u64,
        len: u64,
    ) -> Result<(), FsError> {
        debug!(path = %path.display(), from = current, to = len, "truncate: pad with nulls");
        let zeros = vec![0u8; (len - current).min(ZERO_PIECE) as usize];
        let mut offset = current;
        while offset < len {
            let n = (len - offset).min(ZERO_PIECE) as usize;
            self.inner.upload_range(handle, path, offset, &zeros[..n])?;
            offset += n as u64;
        }
        self.inner.flush(handle, path)
    }

    fn write_last_null(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        debug!(path = %path.display(), len, "truncate: write last null");
        self.inner.upload_range(handle, path, len - 1, &[0])?;
        self.inner.flush(handle, path)
    }
}

impl<C: FsClient> FsClient for TruncateFs<C> {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn attrs(&self, path: &Path) -> Result<Option<DirEntry>, FsError> {
        self.inner.attrs(path)
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        self.inner.list(path)
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        self.inner.mkdir(path)
    }

    fn rmdir(&self, path: &Path) -> Result<(), FsError> {
        self.inner.rmdir(path)
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        self.inner.delete(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.inner.rename(from, to)
    }

    fn upload(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.inner.upload(path, data)
    }

    fn download_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        self.inner.download_range(handle, path, offset, len)
    }

    fn upload_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<(), FsError> {
        self.inner.upload_range(handle, path, offset, data)
    }

    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        let capabilities = self.inner.capabilities();
        if capabilities.read_only {
            return Err(FsError::ReadOnly {
                operation: "truncate",
            });
        }
        self.inner.flush(handle, path)?;
        let entry = self.inner.stat(path)?;
        if entry.is_dir() {
            return Err(FsError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        let current = entry.size;
        if len == current {
            return Ok(());
        }
        if len == 0 {
            return self.inner.upload(path, &[]);
        }

        if len < current {
            match capabilities.truncate.shrink {
                ShrinkStrategy::CopyDown => self.copy_down(&capabilities, handle, path, len),
                ShrinkStrategy::Unsupported => Err(FsError::unsupported(
                    "truncate",
                    path,
                    "backend cannot shrink objects",
                )),
            }
        } else {
            match capabilities.truncate.grow {
                GrowStrategy::PadWithNulls => self.pad_with_nulls(handle, path, current, len),
                GrowStrategy::WriteLastNull => self.write_last_null(handle, path, len),
                GrowStrategy::Unsupported => Err(FsError::unsupported(
                    "truncate",
                    path,
                    "backend cannot grow objects",
                )),
            }
        }
    }

    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        self.inner.flush(handle, path)
    }

    fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        self.inner.release(handle, path)
    }

    fn describe(&self) -> String {
        format!("Truncate -> {}", self.inner.describe())
    }
}

/// Builds a [`TruncateFs`].
#[derive(Debug, Clone, Copy)]
pub struct TruncateLayer {
    staging_capacity: u64,
}

impl TruncateLayer {
    /// Stage at most `staging_capacity` bytes for copy-and-shrink.
    pub fn new(staging_capacity: u64) -> Self {
        Self { staging_capacity }
    }
}

impl<C: FsClient> Layer<C> for TruncateLayer {
    type Client = TruncateFs<C>;

    fn layer(self, client: C) -> Self::Client {
        TruncateFs::new(client, self.staging_capacity)
    }
}
