//! Sequential read prediction and prefetch.
//!
//! Each handle owns a [`ReadAheadWindow`]. A read that starts where the
//! previous one ended multiplies the window (up to the maximum); any other
//! read resets it to the minimum and drops the handle's prefetched bytes.
//! A miss fetches `max(len, window)` bytes at once and keeps the surplus.
//! Prefetched bytes of all handles share one capacity; the oldest prefetch
//! is evicted first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::{Capabilities, DirEntry, FsClient, FsError, Handle, Layer};

/// Read-ahead state of one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAheadWindow {
    /// Bytes fetched on the next miss.
    pub size: u64,
    /// Offset of the previous read, `None` before the first one.
    pub last_offset: Option<u64>,
    /// Length of the previous read.
    pub last_len: u64,
    /// Consecutive sequential reads.
    pub streak: u32,
}

impl ReadAheadWindow {
    fn new(min: u64) -> Self {
        Self {
            size: min,
            last_offset: None,
            last_len: 0,
            streak: 0,
        }
    }

    fn is_sequential(&self, offset: u64) -> bool {
        self.last_offset
            .is_some_and(|last| last + self.last_len == offset)
    }
}

#[derive(Debug)]
struct Prefetch {
    path: PathBuf,
    offset: u64,
    data: Vec<u8>,
    eof: bool,
}

impl Prefetch {
    fn serve(&self, path: &Path, offset: u64, len: usize) -> Option<Vec<u8>> {
        if self.path != path || offset < self.offset {
            return None;
        }
        let start = (offset - self.offset) as usize;
        let end = start + len;
        if end <= self.data.len() {
            return Some(self.data[start..end].to_vec());
        }
        if self.eof && start <= self.data.len() {
            return Some(self.data[start..].to_vec());
        }
        None
    }
}

#[derive(Debug, Default)]
struct PrefetchTable {
    entries: IndexMap<Handle, Prefetch>,
    total: u64,
}

impl PrefetchTable {
    fn remove(&mut self, handle: Handle) {
        if let Some(old) = self.entries.shift_remove(&handle) {
            self.total -= old.data.len() as u64;
        }
    }

    fn insert(&mut self, handle: Handle, prefetch: Prefetch, capacity: u64) {
        self.remove(handle);
        self.total += prefetch.data.len() as u64;
        self.entries.insert(handle, prefetch);
        while self.total > capacity {
            let Some((evicted, old)) = self.entries.shift_remove_index(0) else {
                break;
            };
            debug!(handle = evicted.0, bytes = old.data.len(), "evicted prefetch");
            self.total -= old.data.len() as u64;
        }
    }

    fn invalidate_path(&mut self, path: &Path) {
        let stale: Vec<Handle> = self
            .entries
            .iter()
            .filter(|(_, p)| p.path.starts_with(path))
            .map(|(h, _)| *h)
            .collect();
        for handle in stale {
            self.remove(handle);
        }
    }
}

/// Chain link predicting sequential reads.
pub struct ReadAheadFs<C> {
    inner: C,
    capacity: u64,
    min: u64,
    max: u64,
    multiplier: u64,
    windows: Mutex<HashMap<Handle, Arc<Mutex<ReadAheadWindow>>>>,
    prefetched: Mutex<PrefetchTable>,
}

impl<C: FsClient> ReadAheadFs<C> {
    /// Wrap `inner`. See [`ReadAheadLayer::new`] for the parameters.
    pub fn new(inner: C, capacity: u64, min: u64, max: u64, multiplier: u64) -> Self {
        Self {
            inner,
            capacity,
            min,
            max: max.max(min),
            multiplier: multiplier.max(1),
            windows: Mutex::new(HashMap::new()),
            prefetched: Mutex::new(PrefetchTable::default()),
        }
    }

    /// Current window of `handle`, `None` before its first read.
    pub fn window(&self, handle: Handle) -> Option<ReadAheadWindow> {
        let window = self.windows.lock().get(&handle)?.clone();
        let snapshot = *window.lock();
        Some(snapshot)
    }

    /// Prefetched bytes held across all handles.
    pub fn cached_bytes(&self) -> u64 {
        self.prefetched.lock().total
    }

    fn window_for(&self, handle: Handle) -> Arc<Mutex<ReadAheadWindow>> {
        self.windows
            .lock()
            .entry(handle)
            .or_insert_with(|| Arc::new(Mutex::new(ReadAheadWindow::new(self.min))))
            .clone()
    }

    fn invalidate(&self, path: &Path) {
        self.prefetched.lock().invalidate_path(path);
    }
}

impl<C: FsClient> FsClient for ReadAheadFs<C> {
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
        self.invalidate(path);
        self.inner.delete(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.invalidate(from);
        self.invalidate(to);
        self.inner.rename(from, to)
    }

    fn upload(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.invalidate(path);
        self.inner.upload(path, data)
    }

    fn download_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        let window = self.window_for(handle);
        let mut window = window.lock();

        if window.last_offset.is_none() {
            window.size = self.min;
        } else if window.is_sequential(offset) {
            window.size = window.size.saturating_mul(self.multiplier).min(self.max);
            window.streak += 1;
        } else {
            window.size = self.min;
            window.streak = 0;
            self.prefetched.lock().remove(handle);
        }
        window.last_offset = Some(offset);
        window.last_len = len as u64;

        let hit = self
            .prefetched
            .lock()
            .entries
            .get(&handle)
            .and_then(|p| p.serve(path, offset, len));
        if let Some(data) = hit {
            return Ok(data);
        }

        let fetch = (len as u64).max(window.size) as usize;
        let data = self.inner.download_range(handle, path, offset, fetch)?;
        debug!(
            handle = handle.0,
            path = %path.display(),
            offset,
            requested = len,
            fetched = data.len(),
            window = window.size,
            "read-ahead miss"
        );
        let served = data[..len.min(data.len())].to_vec();
        let eof = data.len() < fetch;
        self.prefetched.lock().insert(
            handle,
            Prefetch {
                path: path.to_path_buf(),
                offset,
                data,
                eof,
            },
            self.capacity,
        );
        Ok(served)
    }

    fn upload_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<(), FsError> {
        self.invalidate(path);
        self.inner.upload_range(handle, path, offset, data)
    }

    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        self.invalidate(path);
        self.inner.truncate(handle, path, len)
    }

    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        self.inner.flush(handle, path)
    }

    fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        self.windows.lock().remove(&handle);
        self.prefetched.lock().remove(handle);
        self.inner.release(handle, path)
    }

    fn describe(&self) -> String {
        format!("ReadAhead -> {}", self.inner.describe())
    }
}

/// Builds a [`ReadAheadFs`].
#[derive(Debug, Clone, Copy)]
pub struct ReadAheadLayer {
    capacity: u64,
    min: u64,
    max: u64,
    multiplier: u64,
}

impl ReadAheadLayer {
    /// `capacity` bounds prefetched bytes across handles; the window starts
    /// at `min`, is multiplied by `multiplier` per sequential read and never
    /// exceeds `max`.
    pub fn new(capacity: u64, min: u64, max: u64, multiplier: u64) -> Self {
        Self {
            capacity,
            min,
            max,
            multiplier,
        }
    }
}

impl<C: FsClient> Layer<C> for ReadAheadLayer {
    type Client = ReadAheadFs<C>;

    fn layer(self, client: C) -> Self::Client {
        ReadAheadFs::new(client, self.capacity, self.min, self.max, self.multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LayerExt, MemoryBackend, StorageFs, KIB, MIB};

    fn setup(size: usize) -> (Arc<MemoryBackend>, ReadAheadFs<StorageFs>) {
        let backend = Arc::new(MemoryBackend::new());
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        backend.insert("/f", data);
        let fs = StorageFs::new(backend.clone(), 10 * MIB)
            .layer(ReadAheadLayer::new(40 * MIB, MIB, 20 * MIB, 2));
        (backend, fs)
    }

    #[test]
    fn window_grows_geometrically_up_to_max() {
        let (_, fs) = setup(64 * MIB as usize);
        let h = Handle(1);
        let len = 64 * KIB as usize;
        let mut seen = Vec::new();
        for i in 0..6u64 {
            fs.download_range(h, Path::new("/f"), i * len as u64, len).unwrap();
            seen.push(fs.window(h).unwrap().size / MIB);
        }
        assert_eq!(seen, [1, 2, 4, 8, 16, 20]);
    }

    #[test]
    fn non_sequential_read_resets_window() {
        let (_, fs) = setup(8 * MIB as usize);
        let h = Handle(1);
        fs.download_range(h, Path::new("/f"), 0, 1024).unwrap();
        fs.download_range(h, Path::new("/f"), 1024, 1024).unwrap();
        assert_eq!(fs.window(h).unwrap().size, 2 * MIB);

        fs.download_range(h, Path::new("/f"), 5 * MIB, 1024).unwrap();
        let window = fs.window(h).unwrap();
        assert_eq!(window.size, MIB);
        assert_eq!(window.streak, 0);
    }

    #[test]
    fn sequential_reads_are_served_from_prefetch() {
        let (backend, fs) = setup(4 * MIB as usize);
        let h = Handle(1);
        let first = fs.download_range(h, Path::new("/f"), 0, 4096).unwrap();
        let second = fs.download_range(h, Path::new("/f"), 4096, 4096).unwrap();
        assert_eq!(backend.stats().range_reads, vec![MIB as usize]);
        assert_eq!(first[1], 1);
        assert_eq!(second[0], (4096 % 251) as u8);
    }

    #[test]
    fn read_past_end_returns_short_data() {
        let (_, fs) = setup(100);
        let h = Handle(1);
        assert_eq!(fs.download_range(h, Path::new("/f"), 0, 60).unwrap().len(), 60);
        assert_eq!(fs.download_range(h, Path::new("/f"), 60, 60).unwrap().len(), 40);
        assert!(fs.download_range(h, Path::new("/f"), 100, 60).unwrap().is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_prefetch() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/f", vec![0u8; 4 * MIB as usize]);
        let fs = StorageFs::new(backend, 10 * MIB)
            .layer(ReadAheadLayer::new(3 * MIB / 2, MIB, 4 * MIB, 2));
        fs.download_range(Handle(1), Path::new("/f"), 0, 10).unwrap();
        fs.download_range(Handle(2), Path::new("/f"), 0, 10).unwrap();
        assert_eq!(fs.cached_bytes(), MIB);
    }

    #[test]
    fn writes_invalidate_prefetched_bytes() {
        let (_, fs) = setup(MIB as usize);
        fs.download_range(Handle(1), Path::new("/f"), 0, 10).unwrap();
        assert!(fs.cached_bytes() > 0);
        fs.upload(Path::new("/f"), b"new").unwrap();
        assert_eq!(fs.cached_bytes(), 0);
        let data = fs.download_range(Handle(1), Path::new("/f"), 10, 10).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn release_drops_handle_state() {
        let (_, fs) = setup(MIB as usize);
        fs.download_range(Handle(1), Path::new("/f"), 0, 10).unwrap();
        fs.release(Handle(1), Path::new("/f")).unwrap();
        assert!(fs.window(Handle(1)).is_none());
        assert_eq!(fs.cached_bytes(), 0);
    }
}
