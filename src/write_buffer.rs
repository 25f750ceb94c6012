//! Per-handle write batching.
//!
//! Kernel writes arrive in small pieces. [`WriteBufferFs`] collects them per
//! handle and forwards chunk-sized runs, so the upload session below sees
//! parts of the configured size.
//!
//! | Backend | Mode | Non-contiguous write |
//! |---------|------|----------------------|
//! | multipart or whole-object | [`WriteMode::Sequential`] | `Unsupported` |
//! | ranged puts | [`WriteMode::Ranged`] | buffered run is sent, new run starts |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{Capabilities, DirEntry, FsClient, FsError, Handle, Layer};

/// How buffered runs reach the next link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Offsets must grow contiguously; runs are sent as whole chunks.
    Sequential,
    /// Any offset is accepted; each contiguous run is sent as one ranged write.
    Ranged,
}

impl WriteMode {
    /// The mode a chain with `capabilities` needs.
    pub fn for_capabilities(capabilities: &Capabilities) -> Self {
        if capabilities.partial_overwrite {
            WriteMode::Ranged
        } else {
            WriteMode::Sequential
        }
    }
}

/// Contiguous bytes of one handle that have not been forwarded yet.
#[derive(Debug)]
struct BufferSegment {
    offset: u64,
    data: Vec<u8>,
    dirty: bool,
}

impl BufferSegment {
    fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

#[derive(Debug)]
struct HandleBuffer {
    path: PathBuf,
    segment: BufferSegment,
}

/// Chain link batching writes per handle.
pub struct WriteBufferFs<C> {
    inner: C,
    capacity: u64,
    chunk_size: u64,
    mode: WriteMode,
    buffers: Mutex<HashMap<Handle, Arc<Mutex<HandleBuffer>>>>,
}

impl<C: FsClient> WriteBufferFs<C> {
    /// Wrap `inner`, holding up to `capacity` bytes per handle and
    /// forwarding `chunk_size` runs.
    pub fn new(inner: C, capacity: u64, chunk_size: u64) -> Self {
        let capabilities = inner.capabilities();
        let chunk_size = match capabilities.multipart {
            Some(bounds) => bounds.clamp(chunk_size),
            None => chunk_size.max(1),
        };
        Self {
            mode: WriteMode::for_capabilities(&capabilities),
            inner,
            capacity: capacity.max(chunk_size),
            chunk_size,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Mode chosen for the chain below.
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Bytes currently buffered for `handle`.
    pub fn buffered(&self, handle: Handle) -> u64 {
        let Some(buffer) = self.buffers.lock().get(&handle).cloned() else {
            return 0;
        };
        let len = buffer.lock().segment.data.len() as u64;
        len
    }

    fn send_chunks(&self, handle: Handle, buffer: &mut HandleBuffer, all: bool) -> Result<(), FsError> {
        let chunk = self.chunk_size as usize;
        let segment = &mut buffer.segment;
        while segment.data.len() >= chunk || (all && !segment.data.is_empty()) {
            let len = segment.data.len().min(chunk);
            self.inner
                .upload_range(handle, &buffer.path, segment.offset, &segment.data[..len])?;
            segment.data.drain(..len);
            segment.offset += len as u64;
        }
        segment.dirty = !segment.data.is_empty();
        Ok(())
    }

    fn send_run(&self, handle: Handle, buffer: &mut HandleBuffer) -> Result<(), FsError> {
        let segment = &mut buffer.segment;
        if !segment.data.is_empty() {
            self.inner
                .upload_range(handle, &buffer.path, segment.offset, &segment.data)?;
            segment.offset = segment.end();
            segment.data.clear();
        }
        segment.dirty = false;
        Ok(())
    }

    fn drain(&self, handle: Handle, buffer: &mut HandleBuffer) -> Result<(), FsError> {
        match self.mode {
            WriteMode::Sequential => self.send_chunks(handle, buffer, true),
            WriteMode::Ranged => self.send_run(handle, buffer),
        }
    }

    fn take(&self, handle: Handle) -> Option<Arc<Mutex<HandleBuffer>>> {
        self.buffers.lock().remove(&handle)
    }

    fn is_dirty(&self, handle: Handle) -> bool {
        let Some(buffer) = self.buffers.lock().get(&handle).cloned() else {
            return false;
        };
        let dirty = buffer.lock().segment.dirty;
        dirty
    }
}

impl<C: FsClient> FsClient for WriteBufferFs<C> {
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
        if self.is_dirty(handle) {
            self.flush(handle, path)?;
        }
        self.inner.download_range(handle, path, offset, len)
    }

    fn upload_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<(), FsError> {
        let buffer = self
            .buffers
            .lock()
            .entry(handle)
            .or_insert_with(|| {
                Arc::new(Mutex::new(HandleBuffer {
                    path: path.to_path_buf(),
                    segment: BufferSegment {
                        offset,
                        data: Vec::new(),
                        dirty: false,
                    },
                }))
            })
            .clone();
        let mut buffer = buffer.lock();

        if offset != buffer.segment.end() {
            match self.mode {
                WriteMode::Sequential => {
                    return Err(FsError::unsupported(
                        "write",
                        path,
                        "object storage only accepts sequential writes",
                    ));
                }
                WriteMode::Ranged => {
                    let result = self.send_run(handle, &mut buffer);
                    if result.is_err() {
                        self.take(handle);
                        return result;
                    }
                    buffer.segment.offset = offset;
                }
            }
        }

        buffer.segment.data.extend_from_slice(data);
        buffer.segment.dirty = true;

        if buffer.segment.data.len() as u64 >= self.capacity {
            debug!(
                handle = handle.0,
                path = %path.display(),
                buffered = buffer.segment.data.len(),
                "write buffer full"
            );
            let result = match self.mode {
                WriteMode::Sequential => self.send_chunks(handle, &mut buffer, false),
                WriteMode::Ranged => self.send_run(handle, &mut buffer),
            };
            if result.is_err() {
                self.take(handle);
                return result;
            }
        }
        Ok(())
    }

    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        self.flush(handle, path)?;
        self.inner.truncate(handle, path, len)
    }

    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        if let Some(buffer) = self.take(handle) {
            let mut buffer = buffer.lock();
            if buffer.segment.dirty {
                debug!(
                    handle = handle.0,
                    path = %buffer.path.display(),
                    bytes = buffer.segment.data.len(),
                    "flushing write buffer"
                );
            }
            self.drain(handle, &mut buffer)?;
        }
        self.inner.flush(handle, path)
    }

    fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        self.take(handle);
        self.inner.release(handle, path)
    }

    fn describe(&self) -> String {
        format!("WriteBuffer -> {}", self.inner.describe())
    }
}

/// Builds a [`WriteBufferFs`].
#[derive(Debug, Clone, Copy)]
pub struct WriteBufferLayer {
    capacity: u64,
    chunk_size: u64,
}

impl WriteBufferLayer {
    /// Buffer up to `capacity` bytes per handle; forward `chunk_size` runs.
    pub fn new(capacity: u64, chunk_size: u64) -> Self {
        Self {
            capacity,
            chunk_size,
        }
    }
}

impl<C: FsClient> Layer<C> for WriteBufferLayer {
    type Client = WriteBufferFs<C>;

    fn layer(self, client: C) -> Self::Client {
        WriteBufferFs::new(client, self.capacity, self.chunk_size)
    }
}
