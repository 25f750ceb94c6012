//! Call recording.

use std::path::Path;

use tracing::info;

use crate::{Capabilities, DirEntry, FsClient, FsError, Handle, Layer};

/// Chain link logging every call and its outcome at `info` level.
pub struct RecordingFs<C> {
    inner: C,
}

impl<C: FsClient> RecordingFs<C> {
    /// Wrap `inner`.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

fn record<T>(operation: &'static str, path: &Path, result: Result<T, FsError>) -> Result<T, FsError> {
    match &result {
        Ok(_) => info!(operation, path = %path.display(), "ok"),
        Err(e) => info!(operation, path = %path.display(), error = %e, errno = e.errno(), "failed"),
    }
    result
}

impl<C: FsClient> FsClient for RecordingFs<C> {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn attrs(&self, path: &Path) -> Result<Option<DirEntry>, FsError> {
        record("attrs", path, self.inner.attrs(path))
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        record("list", path, self.inner.list(path))
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        record("mkdir", path, self.inner.mkdir(path))
    }

    fn rmdir(&self, path: &Path) -> Result<(), FsError> {
        record("rmdir", path, self.inner.rmdir(path))
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        record("delete", path, self.inner.delete(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        info!(operation = "rename", from = %from.display(), to = %to.display(), "start");
        record("rename", from, self.inner.rename(from, to))
    }

    fn upload(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        info!(operation = "upload", path = %path.display(), bytes = data.len(), "start");
        record("upload", path, self.inner.upload(path, data))
    }

    fn download_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        info!(operation = "download_range", handle = handle.0, path = %path.display(), offset, len, "start");
        record("download_range", path, self.inner.download_range(handle, path, offset, len))
    }

    fn upload_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<(), FsError> {
        info!(
            operation = "upload_range",
            handle = handle.0,
            path = %path.display(),
            offset,
            bytes = data.len(),
            "start"
        );
        record("upload_range", path, self.inner.upload_range(handle, path, offset, data))
    }

    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        info!(operation = "truncate", handle = handle.0, path = %path.display(), len, "start");
        record("truncate", path, self.inner.truncate(handle, path, len))
    }

    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        record("flush", path, self.inner.flush(handle, path))
    }

    fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        record("release", path, self.inner.release(handle, path))
    }

    fn describe(&self) -> String {
        format!("Recording -> {}", self.inner.describe())
    }
}

/// Builds a [`RecordingFs`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingLayer;

impl<C: FsClient> Layer<C> for RecordingLayer {
    type Client = RecordingFs<C>;

    fn layer(self, client: C) -> Self::Client {
        RecordingFs::new(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LayerExt, MemoryBackend, StorageFs, MIB};
    use std::sync::Arc;

    #[test]
    fn recording_is_transparent() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = StorageFs::new(backend.clone(), 10 * MIB).layer(RecordingLayer);
        fs.upload(Path::new("/a"), b"abc").unwrap();
        assert_eq!(fs.download_range(Handle(1), Path::new("/a"), 1, 2).unwrap(), b"bc");
        assert!(matches!(fs.list(Path::new("/nope")), Err(FsError::NotFound { .. })));
        assert_eq!(fs.describe(), "Recording -> Storage(memory)");
    }

    #[test]
    fn recording_emits_events_to_a_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let fs = StorageFs::new(Arc::new(MemoryBackend::new()), 10 * MIB).layer(RecordingLayer);
            fs.mkdir(Path::new("/d")).unwrap();
            assert!(fs.mkdir(Path::new("/d")).is_err());
        });
    }
}
