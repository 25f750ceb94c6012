//! Directory listing cache.
//!
//! [`ThreadSafeListingCache`] keeps at most `max_entries` listings, each
//! served for `ttl` after it was stored and evicted lazily on the first
//! lookup past that. When full, the least recently inserted listing goes
//! first. [`CachingFs`] is the chain link that consults it.
//!
//! Chain links are shared as `Send + Sync` values whether or not the mount
//! runs multi-threaded, so the mutex-wrapped cache is the only one a chain
//! can hold. The `threads` mount option selects path locking, not the cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::path_resolver::{file_name, parent_of};
use crate::{Capabilities, Clock, DirEntry, FsClient, FsError, Handle, Layer, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry {
    entries: Vec<DirEntry>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

/// Listing storage behind [`ThreadSafeListingCache`]'s mutex.
#[derive(Debug)]
pub(crate) struct ListingCache {
    ttl: Duration,
    max_entries: usize,
    entries: IndexMap<PathBuf, CacheEntry>,
}

impl ListingCache {
    pub(crate) fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: IndexMap::new(),
        }
    }

    /// Fresh listing of `path`, evicting it if it has expired.
    pub(crate) fn get(&mut self, path: &Path, now: Instant) -> Option<Vec<DirEntry>> {
        let entry = self.entries.get(path)?;
        if entry.is_fresh(now) {
            return Some(entry.entries.clone());
        }
        self.entries.shift_remove(path);
        None
    }

    /// Store a listing fetched at `now`.
    pub(crate) fn put(&mut self, path: &Path, entries: Vec<DirEntry>, now: Instant) {
        if self.max_entries == 0 {
            return;
        }
        self.entries.shift_remove(path);
        self.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                entries,
                created_at: now,
                ttl: self.ttl,
            },
        );
        while self.entries.len() > self.max_entries {
            self.entries.shift_remove_index(0);
        }
    }

    pub(crate) fn invalidate(&mut self, path: &Path) {
        self.entries.shift_remove(path);
    }

    /// Drop the listing of `path` and of every directory below it.
    pub(crate) fn invalidate_prefix(&mut self, path: &Path) {
        self.entries.retain(|key, _| !key.starts_with(path));
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// TTL listing cache shared between threads.
#[derive(Debug)]
pub struct ThreadSafeListingCache {
    inner: Mutex<ListingCache>,
}

impl ThreadSafeListingCache {
    /// An empty cache.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(ListingCache::new(ttl, max_entries)),
        }
    }

    /// Fresh listing of `path`, evicting it if it has expired.
    pub fn get(&self, path: &Path, now: Instant) -> Option<Vec<DirEntry>> {
        self.inner.lock().get(path, now)
    }

    /// Store a listing fetched at `now`, evicting the oldest insert when
    /// full.
    pub fn put(&self, path: &Path, entries: Vec<DirEntry>, now: Instant) {
        self.inner.lock().put(path, entries, now);
    }

    /// Drop the listing of `path`.
    pub fn invalidate(&self, path: &Path) {
        self.inner.lock().invalidate(path);
    }

    /// Drop the listing of `path` and of every directory below it.
    pub fn invalidate_prefix(&self, path: &Path) {
        self.inner.lock().invalidate_prefix(path);
    }

    /// Drop every listing.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of stored listings, fresh or not.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Chain link serving `list` and `attrs` from a [`ThreadSafeListingCache`].
///
/// Every mutation forwarded through this link invalidates the listing of
/// the parent directory. Mutations that may touch a directory also drop
/// every cached listing at or below the path.
pub struct CachingFs<C> {
    inner: C,
    cache: Arc<ThreadSafeListingCache>,
    clock: Arc<dyn Clock>,
}

impl<C: FsClient> CachingFs<C> {
    /// Wrap `inner` with an existing cache.
    pub fn new(inner: C, cache: Arc<ThreadSafeListingCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            cache,
            clock,
        }
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<ThreadSafeListingCache> {
        &self.cache
    }

    fn invalidate_parent(&self, path: &Path) {
        self.cache.invalidate(&parent_of(path));
    }

    fn invalidate_tree(&self, path: &Path) {
        self.cache.invalidate_prefix(path);
        self.invalidate_parent(path);
    }
}

impl<C: FsClient> FsClient for CachingFs<C> {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn attrs(&self, path: &Path) -> Result<Option<DirEntry>, FsError> {
        let Some(name) = file_name(path) else {
            return self.inner.attrs(path);
        };
        match self.cache.get(&parent_of(path), self.clock.now()) {
            Some(listing) => Ok(listing.into_iter().find(|e| e.name == name)),
            None => self.inner.attrs(path),
        }
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        if let Some(hit) = self.cache.get(path, self.clock.now()) {
            debug!(path = %path.display(), entries = hit.len(), "listing cache hit");
            return Ok(hit);
        }
        let entries = self.inner.list(path)?;
        debug!(path = %path.display(), entries = entries.len(), "listing cache miss");
        self.cache.put(path, entries.clone(), self.clock.now());
        Ok(entries)
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        let result = self.inner.mkdir(path);
        self.invalidate_tree(path);
        result
    }

    fn rmdir(&self, path: &Path) -> Result<(), FsError> {
        let result = self.inner.rmdir(path);
        self.invalidate_tree(path);
        result
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        let result = self.inner.delete(path);
        self.invalidate_tree(path);
        result
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let result = self.inner.rename(from, to);
        self.invalidate_tree(from);
        self.invalidate_tree(to);
        result
    }

    fn upload(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        let result = self.inner.upload(path, data);
        self.invalidate_parent(path);
        result
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
        let result = self.inner.upload_range(handle, path, offset, data);
        self.invalidate_parent(path);
        result
    }

    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        let result = self.inner.truncate(handle, path, len);
        self.invalidate_parent(path);
        result
    }

    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        let result = self.inner.flush(handle, path);
        self.invalidate_parent(path);
        result
    }

    fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        self.inner.release(handle, path)
    }

    fn describe(&self) -> String {
        format!("Cache -> {}", self.inner.describe())
    }
}

/// Builds a [`CachingFs`].
pub struct CacheLayer {
    cache: Arc<ThreadSafeListingCache>,
    clock: Arc<dyn Clock>,
}

impl CacheLayer {
    /// A fresh cache on the system clock.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: Arc::new(ThreadSafeListingCache::new(ttl, max_entries)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use another time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an existing cache instead of creating one.
    pub fn with_cache(mut self, cache: Arc<ThreadSafeListingCache>) -> Self {
        self.cache = cache;
        self
    }
}

impl<C: FsClient> Layer<C> for CacheLayer {
    type Client = CachingFs<C>;

    fn layer(self, client: C) -> Self::Client {
        CachingFs::new(client, self.cache, self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LayerExt, ManualClock, MemoryBackend, StorageFs, MIB};
    use std::time::SystemTime;

    fn entry(name: &str) -> DirEntry {
        DirEntry::file(name, 1, SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = ListingCache::new(Duration::from_secs(60), 10);
        let t0 = Instant::now();
        cache.put(Path::new("/d"), vec![entry("a")], t0);

        assert!(cache.get(Path::new("/d"), t0 + Duration::from_secs(59)).is_some());
        assert!(cache.get(Path::new("/d"), t0 + Duration::from_secs(60)).is_none());
        assert!(cache.is_empty(), "expired entry is evicted on lookup");
    }

    #[test]
    fn oldest_insert_is_evicted_first() {
        let mut cache = ListingCache::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        cache.put(Path::new("/a"), vec![], now);
        cache.put(Path::new("/b"), vec![], now);
        cache.put(Path::new("/a"), vec![entry("x")], now);
        cache.put(Path::new("/c"), vec![], now);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(Path::new("/b"), now).is_none());
        assert_eq!(cache.get(Path::new("/a"), now).unwrap().len(), 1);
        assert!(cache.get(Path::new("/c"), now).is_some());
    }

    #[test]
    fn invalidate_removes_immediately() {
        let cache = ThreadSafeListingCache::new(Duration::from_secs(60), 10);
        let now = Instant::now();
        cache.put(Path::new("/d"), vec![entry("a")], now);
        cache.invalidate(Path::new("/d"));
        assert!(cache.get(Path::new("/d"), now).is_none());
    }

    fn caching_fs(clock: Arc<ManualClock>) -> (Arc<MemoryBackend>, CachingFs<StorageFs>) {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/d/a.txt", b"aaa".to_vec());
        let fs = StorageFs::new(backend.clone(), 10 * MIB)
            .layer(CacheLayer::new(Duration::from_secs(60), 100).with_clock(clock));
        (backend, fs)
    }

    #[test]
    fn list_hits_backend_once_within_ttl() {
        let clock = ManualClock::shared();
        let (backend, fs) = caching_fs(clock.clone());

        fs.list(Path::new("/d")).unwrap();
        clock.advance(Duration::from_secs(10));
        fs.list(Path::new("/d")).unwrap();
        assert_eq!(backend.stats().lists, 1);

        clock.advance(Duration::from_secs(51));
        fs.list(Path::new("/d")).unwrap();
        assert_eq!(backend.stats().lists, 2);
    }

    #[test]
    fn attrs_are_served_from_fresh_parent_listing() {
        let clock = ManualClock::shared();
        let (backend, fs) = caching_fs(clock);
        fs.list(Path::new("/d")).unwrap();
        backend.reset_stats();

        assert_eq!(fs.attrs(Path::new("/d/a.txt")).unwrap().unwrap().size, 3);
        assert!(fs.attrs(Path::new("/d/missing")).unwrap().is_none());
        assert_eq!(backend.stats().stats, 0);

        assert!(fs.attrs(Path::new("/other")).unwrap().is_none());
        assert_eq!(backend.stats().stats, 1);
    }

    #[test]
    fn mutations_invalidate_parent_listing() {
        let clock = ManualClock::shared();
        let (backend, fs) = caching_fs(clock);

        assert_eq!(fs.list(Path::new("/d")).unwrap().len(), 1);
        fs.upload(Path::new("/d/b.txt"), b"b").unwrap();
        assert_eq!(fs.list(Path::new("/d")).unwrap().len(), 2);

        fs.delete(Path::new("/d/b.txt")).unwrap();
        assert_eq!(fs.list(Path::new("/d")).unwrap().len(), 1);

        fs.rename(Path::new("/d/a.txt"), Path::new("/e.txt")).unwrap();
        assert!(fs.list(Path::new("/d")).is_err());
        assert_eq!(backend.stats().lists, 4);
    }

    #[test]
    fn invalidate_prefix_drops_whole_subtree() {
        let cache = ThreadSafeListingCache::new(Duration::from_secs(60), 10);
        let now = Instant::now();
        for dir in ["/d", "/d/sub", "/d/sub/deep", "/dx"] {
            cache.put(Path::new(dir), vec![], now);
        }
        cache.invalidate_prefix(Path::new("/d"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(Path::new("/dx"), now).is_some());
    }

    #[test]
    fn directory_rename_drops_cached_descendants() {
        let clock = ManualClock::shared();
        let (backend, fs) = caching_fs(clock);
        backend.insert("/d/sub/x.txt", b"x".to_vec());

        assert_eq!(fs.list(Path::new("/d/sub")).unwrap().len(), 1);
        fs.rename(Path::new("/d"), Path::new("/moved")).unwrap();

        assert!(matches!(
            fs.list(Path::new("/d/sub")),
            Err(FsError::NotFound { .. })
        ));
        assert!(fs.attrs(Path::new("/d/sub/x.txt")).unwrap().is_none());
        assert_eq!(fs.list(Path::new("/moved/sub")).unwrap().len(), 1);
    }

    #[test]
    fn caching_link_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>(_: &T) {}
        let (_, fs) = caching_fs(ManualClock::shared());
        assert_send_sync(&fs);
        assert_send_sync(fs.cache());
    }

    #[test]
    fn describe_prefixes_inner_chain() {
        let (_, fs) = caching_fs(ManualClock::shared());
        assert_eq!(fs.describe(), "Cache -> Storage(memory)");
    }
}
