//! In-memory object store.
//!
//! [`MemoryBackend`] behaves like a bucket: flat object keys, directories
//! implied by key prefixes or created as folder markers, whole-object puts
//! and multipart uploads that only become visible on completion. It counts
//! every call so tests can assert on traffic, and it can be told to fail
//! specific multipart parts.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::path_resolver::{file_name, normalize, parent_of};
use crate::{
    DirEntry, FsError, GrowStrategy, PartSizeBounds, PartToken, ShrinkStrategy, StorageBackend,
    TruncateSupport, UploadId,
};

/// Call counters of a [`MemoryBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// `list` calls.
    pub lists: usize,
    /// `stat` calls.
    pub stats: usize,
    /// Length requested by each `get_range` call, in order.
    pub range_reads: Vec<usize>,
    /// Whole-object `put` calls.
    pub puts: usize,
    /// `put_range` calls.
    pub ranged_puts: usize,
    /// `begin_multipart` calls.
    pub uploads_begun: usize,
    /// Size of each uploaded part, in upload order.
    pub part_sizes: Vec<u64>,
    /// Successful `complete_multipart` calls.
    pub uploads_completed: usize,
    /// `abort_multipart` calls.
    pub uploads_aborted: usize,
    /// `delete` calls.
    pub deletes: usize,
    /// `rename` calls.
    pub renames: usize,
}

struct StoredObject {
    data: Vec<u8>,
    mtime: SystemTime,
}

struct PendingUpload {
    path: PathBuf,
    parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<PathBuf, StoredObject>,
    markers: BTreeSet<PathBuf>,
    uploads: HashMap<String, PendingUpload>,
    next_upload: u64,
    failing_parts: HashSet<u32>,
    stats: BackendStats,
}

impl State {
    fn is_dir(&self, path: &Path) -> bool {
        path == Path::new("/")
            || self.markers.contains(path)
            || self.objects.keys().any(|key| key != path && key.starts_with(path))
            || self.markers.iter().any(|m| m != path && m.starts_with(path))
    }

    fn has_children(&self, path: &Path) -> bool {
        self.objects.keys().any(|key| key != path && key.starts_with(path))
            || self.markers.iter().any(|m| m != path && m.starts_with(path))
    }
}

/// A [`StorageBackend`] kept entirely in memory.
///
/// # Example
///
/// ```rust
/// use objmount::{MemoryBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = MemoryBackend::new();
/// backend.put(Path::new("/data/a.txt"), b"hello").unwrap();
/// assert_eq!(backend.object(Path::new("/data/a.txt")).unwrap(), b"hello");
/// assert_eq!(backend.list(Path::new("/data")).unwrap().len(), 1);
/// assert_eq!(backend.stats().puts, 1);
/// ```
pub struct MemoryBackend {
    state: Mutex<State>,
    read_only: bool,
    multipart: Option<PartSizeBounds>,
    partial_overwrite: bool,
    truncate: Option<TruncateSupport>,
    latency: Duration,
}

impl MemoryBackend {
    /// An empty, writable, S3-like bucket: multipart with S3 part limits and
    /// no ranged puts.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            read_only: false,
            multipart: Some(PartSizeBounds::S3),
            partial_overwrite: false,
            truncate: None,
            latency: Duration::ZERO,
        }
    }

    /// Refuse every mutation.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Use custom multipart part limits.
    pub fn with_multipart(mut self, bounds: PartSizeBounds) -> Self {
        self.multipart = Some(bounds);
        self
    }

    /// Disable multipart upload.
    pub fn without_multipart(mut self) -> Self {
        self.multipart = None;
        self
    }

    /// Enable ranged puts, like a WebDAV server.
    pub fn with_partial_overwrite(mut self) -> Self {
        self.partial_overwrite = true;
        self
    }

    /// Declare an explicit truncate capability.
    pub fn with_truncate_support(mut self, support: TruncateSupport) -> Self {
        self.truncate = Some(support);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every upload of part `index` fail with a transient error.
    pub fn fail_part(&self, index: u32) {
        self.state.lock().failing_parts.insert(index);
    }

    /// Stop injecting part failures.
    pub fn clear_failures(&self) {
        self.state.lock().failing_parts.clear();
    }

    /// Seed an object without counting it as a put.
    pub fn insert(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        self.state.lock().objects.insert(
            normalize(path.as_ref()),
            StoredObject {
                data: data.into(),
                mtime: SystemTime::now(),
            },
        );
    }

    /// Current contents of an object.
    pub fn object(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(&normalize(path.as_ref()))
            .map(|o| o.data.clone())
    }

    /// Number of multipart uploads neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> BackendStats {
        self.state.lock().stats.clone()
    }

    /// Zero the call counters.
    pub fn reset_stats(&self) {
        self.state.lock().stats = BackendStats::default();
    }

    fn pause(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }

    fn check_writable(&self, operation: &'static str) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly { operation });
        }
        Ok(())
    }

    fn unknown_upload(upload: &UploadId) -> FsError {
        FsError::Backend(format!("unknown upload {}", upload.0))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        self.pause();
        let path = normalize(path);
        let mut state = self.state.lock();
        state.stats.lists += 1;

        if !state.is_dir(&path) {
            return Err(if state.objects.contains_key(&path) {
                FsError::NotADirectory { path }
            } else {
                FsError::NotFound { path }
            });
        }

        let mut children: BTreeMap<String, DirEntry> = BTreeMap::new();
        for (key, object) in state.objects.range(path.clone()..) {
            let Ok(rest) = key.strip_prefix(&path) else {
                break;
            };
            let mut parts = rest.components();
            let Some(first) = parts.next() else {
                continue;
            };
            let name = first.as_os_str().to_string_lossy().into_owned();
            let entry = if parts.next().is_some() {
                DirEntry::dir(name.clone())
            } else {
                DirEntry::file(name.clone(), object.data.len() as u64, object.mtime)
            };
            children.entry(name).or_insert(entry);
        }
        for marker in &state.markers {
            if marker != &path && parent_of(marker) == path {
                if let Some(name) = file_name(marker) {
                    children
                        .entry(name.clone())
                        .or_insert_with(|| DirEntry::dir(name));
                }
            }
        }
        Ok(children.into_values().collect())
    }

    fn stat(&self, path: &Path) -> Result<DirEntry, FsError> {
        self.pause();
        let path = normalize(path);
        let mut state = self.state.lock();
        state.stats.stats += 1;
        let name = file_name(&path).unwrap_or_default();
        if let Some(object) = state.objects.get(&path) {
            return Ok(DirEntry::file(name, object.data.len() as u64, object.mtime));
        }
        if state.is_dir(&path) {
            return Ok(DirEntry::dir(name));
        }
        Err(FsError::NotFound { path })
    }

    fn get_range(&self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
        self.pause();
        let path = normalize(path);
        let mut state = self.state.lock();
        state.stats.range_reads.push(len);
        let Some(object) = state.objects.get(&path) else {
            return Err(if state.is_dir(&path) {
                FsError::NotAFile { path }
            } else {
                FsError::NotFound { path }
            });
        };
        let size = object.data.len() as u64;
        if offset >= size {
            return Ok(Vec::new());
        }
        let end = (offset + len as u64).min(size);
        Ok(object.data[offset as usize..end as usize].to_vec())
    }

    fn put(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.check_writable("put")?;
        self.pause();
        let path = normalize(path);
        let mut state = self.state.lock();
        if state.markers.contains(&path) || state.has_children(&path) {
            return Err(FsError::NotAFile { path });
        }
        state.stats.puts += 1;
        state.objects.insert(
            path,
            StoredObject {
                data: data.to_vec(),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn put_range(&self, path: &Path, offset: u64, data: &[u8]) -> Result<(), FsError> {
        if !self.partial_overwrite {
            return Err(FsError::unsupported(
                "put_range",
                path,
                "backend cannot overwrite byte ranges",
            ));
        }
        self.check_writable("put_range")?;
        self.pause();
        let path = normalize(path);
        let mut state = self.state.lock();
        state.stats.ranged_puts += 1;
        let object = state
            .objects
            .entry(path)
            .or_insert_with(|| StoredObject {
                data: Vec::new(),
                mtime: SystemTime::now(),
            });
        let start = offset as usize;
        let end = start + data.len();
        if object.data.len() < end {
            object.data.resize(end, 0);
        }
        object.data[start..end].copy_from_slice(data);
        object.mtime = SystemTime::now();
        Ok(())
    }

    fn multipart_bounds(&self) -> Option<PartSizeBounds> {
        self.multipart
    }

    fn begin_multipart(&self, path: &Path) -> Result<UploadId, FsError> {
        if self.multipart.is_none() {
            return Err(FsError::unsupported(
                "begin_multipart",
                path,
                "backend has no multipart upload",
            ));
        }
        self.check_writable("begin_multipart")?;
        self.pause();
        let mut state = self.state.lock();
        state.next_upload += 1;
        let id = format!("upload-{}", state.next_upload);
        state.stats.uploads_begun += 1;
        state.uploads.insert(
            id.clone(),
            PendingUpload {
                path: normalize(path),
                parts: BTreeMap::new(),
            },
        );
        Ok(UploadId(id))
    }

    fn upload_part(
        &self,
        upload: &UploadId,
        index: u32,
        data: &[u8],
    ) -> Result<PartToken, FsError> {
        self.pause();
        let mut state = self.state.lock();
        let failing = state.failing_parts.contains(&index);
        let Some(pending) = state.uploads.get_mut(&upload.0) else {
            return Err(Self::unknown_upload(upload));
        };
        if failing {
            return Err(FsError::BackendTransient {
                operation: "upload_part",
                path: pending.path.clone(),
                message: format!("injected failure for part {index}"),
            });
        }
        pending.parts.insert(index, data.to_vec());
        state.stats.part_sizes.push(data.len() as u64);
        Ok(PartToken {
            index,
            tag: format!("etag-{}-{index}", upload.0),
        })
    }

    fn complete_multipart(&self, upload: &UploadId, parts: &[PartToken]) -> Result<(), FsError> {
        self.pause();
        let bounds = self.multipart.unwrap_or(PartSizeBounds::S3);
        let mut state = self.state.lock();
        let Some(pending) = state.uploads.get(&upload.0) else {
            return Err(Self::unknown_upload(upload));
        };

        let mut data = Vec::new();
        for (position, token) in parts.iter().enumerate() {
            if token.index as usize != position {
                return Err(FsError::Backend(format!(
                    "{}: parts out of order at {position}",
                    upload.0
                )));
            }
            let Some(part) = pending.parts.get(&token.index) else {
                return Err(FsError::Backend(format!(
                    "{}: part {} was never uploaded",
                    upload.0, token.index
                )));
            };
            let last = position + 1 == parts.len();
            if !last && !bounds.contains(part.len() as u64) {
                return Err(FsError::InvalidRange {
                    path: pending.path.clone(),
                    offset: data.len() as u64,
                    len: part.len() as u64,
                });
            }
            data.extend_from_slice(part);
        }

        let Some(pending) = state.uploads.remove(&upload.0) else {
            return Err(Self::unknown_upload(upload));
        };
        state.stats.uploads_completed += 1;
        state.objects.insert(
            pending.path,
            StoredObject {
                data,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn abort_multipart(&self, upload: &UploadId) -> Result<(), FsError> {
        let mut state = self.state.lock();
        state.stats.uploads_aborted += 1;
        match state.uploads.remove(&upload.0) {
            Some(_) => Ok(()),
            None => Err(Self::unknown_upload(upload)),
        }
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable("delete")?;
        self.pause();
        let path = normalize(path);
        let mut state = self.state.lock();
        state.stats.deletes += 1;
        if state.objects.remove(&path).is_some() {
            return Ok(());
        }
        if state.has_children(&path) {
            return Err(FsError::DirectoryNotEmpty { path });
        }
        if state.markers.remove(&path) {
            return Ok(());
        }
        Err(FsError::NotFound { path })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.check_writable("rename")?;
        self.pause();
        let from = normalize(from);
        let to = normalize(to);
        let mut state = self.state.lock();
        state.stats.renames += 1;

        if let Some(object) = state.objects.remove(&from) {
            state.objects.insert(to, object);
            return Ok(());
        }
        if !state.is_dir(&from) || from == Path::new("/") {
            return Err(FsError::NotFound { path: from });
        }

        let moved: Vec<PathBuf> = state
            .objects
            .keys()
            .filter(|key| key.starts_with(&from))
            .cloned()
            .collect();
        for key in moved {
            if let (Some(object), Ok(rest)) = (state.objects.remove(&key), key.strip_prefix(&from))
            {
                state.objects.insert(to.join(rest), object);
            }
        }
        let markers: Vec<PathBuf> = state
            .markers
            .iter()
            .filter(|m| m.starts_with(&from))
            .cloned()
            .collect();
        for marker in markers {
            state.markers.remove(&marker);
            if let Ok(rest) = marker.strip_prefix(&from) {
                let target = if rest.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(rest)
                };
                state.markers.insert(target);
            }
        }
        Ok(())
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable("mkdir")?;
        self.pause();
        let path = normalize(path);
        let mut state = self.state.lock();
        if state.objects.contains_key(&path) || state.is_dir(&path) {
            return Err(FsError::AlreadyExists {
                path,
                operation: "mkdir",
            });
        }
        state.markers.insert(path);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn supports_partial_overwrite(&self) -> bool {
        self.partial_overwrite
    }

    fn truncate_support(&self) -> TruncateSupport {
        self.truncate.unwrap_or(TruncateSupport {
            shrink: ShrinkStrategy::CopyDown,
            grow: if self.partial_overwrite {
                GrowStrategy::WriteLastNull
            } else {
                GrowStrategy::PadWithNulls
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MIB;

    #[test]
    fn list_reports_files_and_implied_directories() {
        let backend = MemoryBackend::new();
        backend.insert("/a/one.txt", b"1".to_vec());
        backend.insert("/a/sub/two.txt", b"22".to_vec());
        backend.mkdir(Path::new("/a/empty")).unwrap();

        let entries = backend.list(Path::new("/a")).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["empty", "one.txt", "sub"]);
        assert!(entries[0].is_dir());
        assert_eq!(entries[1].size, 1);
        assert!(entries[2].is_dir());

        let root = backend.list(Path::new("/")).unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name, "a");
    }

    #[test]
    fn list_missing_or_file_path_fails() {
        let backend = MemoryBackend::new();
        backend.insert("/f", b"x".to_vec());
        assert!(matches!(
            backend.list(Path::new("/nope")),
            Err(FsError::NotFound { .. })
        ));
        assert!(matches!(
            backend.list(Path::new("/f")),
            Err(FsError::NotADirectory { .. })
        ));
    }

    #[test]
    fn get_range_is_short_at_end() {
        let backend = MemoryBackend::new();
        backend.insert("/f", b"0123456789".to_vec());
        assert_eq!(backend.get_range(Path::new("/f"), 8, 10).unwrap(), b"89");
        assert!(backend.get_range(Path::new("/f"), 20, 10).unwrap().is_empty());
        assert_eq!(backend.stats().range_reads, vec![10, 10]);
    }

    #[test]
    fn multipart_is_invisible_until_complete() {
        let backend = MemoryBackend::new();
        let upload = backend.begin_multipart(Path::new("/big")).unwrap();
        let p0 = backend
            .upload_part(&upload, 0, &vec![1u8; 5 * MIB as usize])
            .unwrap();
        let p1 = backend.upload_part(&upload, 1, b"tail").unwrap();
        assert!(backend.object("/big").is_none());

        backend.complete_multipart(&upload, &[p0, p1]).unwrap();
        assert_eq!(backend.object("/big").unwrap().len(), 5 * MIB as usize + 4);
        assert_eq!(backend.pending_uploads(), 0);
    }

    #[test]
    fn complete_rejects_small_non_final_parts() {
        let backend = MemoryBackend::new();
        let upload = backend.begin_multipart(Path::new("/big")).unwrap();
        let p0 = backend.upload_part(&upload, 0, b"small").unwrap();
        let p1 = backend.upload_part(&upload, 1, b"tail").unwrap();
        assert!(backend.complete_multipart(&upload, &[p0, p1]).is_err());
        assert!(backend.object("/big").is_none());
    }

    #[test]
    fn injected_part_failure_is_transient() {
        let backend = MemoryBackend::new();
        backend.fail_part(1);
        let upload = backend.begin_multipart(Path::new("/big")).unwrap();
        backend.upload_part(&upload, 0, b"ok").unwrap();
        let err = backend.upload_part(&upload, 1, b"boom").unwrap_err();
        assert!(err.is_transient());
        backend.abort_multipart(&upload).unwrap();
        assert_eq!(backend.pending_uploads(), 0);
        assert_eq!(backend.stats().uploads_aborted, 1);
    }

    #[test]
    fn put_range_zero_fills_gaps() {
        let backend = MemoryBackend::new().with_partial_overwrite();
        backend.insert("/f", b"abc".to_vec());
        backend.put_range(Path::new("/f"), 5, b"z").unwrap();
        assert_eq!(backend.object("/f").unwrap(), b"abc\0\0z");
        backend.put_range(Path::new("/f"), 1, b"XY").unwrap();
        assert_eq!(backend.object("/f").unwrap(), b"aXY\0\0z");
    }

    #[test]
    fn put_range_requires_capability() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.put_range(Path::new("/f"), 0, b"x"),
            Err(FsError::Unsupported { .. })
        ));
    }

    #[test]
    fn read_only_refuses_mutations() {
        let backend = MemoryBackend::new().read_only();
        assert!(matches!(
            backend.put(Path::new("/f"), b"x"),
            Err(FsError::ReadOnly { .. })
        ));
        assert!(matches!(
            backend.mkdir(Path::new("/d")),
            Err(FsError::ReadOnly { .. })
        ));
    }

    #[test]
    fn delete_refuses_non_empty_directory() {
        let backend = MemoryBackend::new();
        backend.insert("/d/f", b"x".to_vec());
        assert!(matches!(
            backend.delete(Path::new("/d")),
            Err(FsError::DirectoryNotEmpty { .. })
        ));
        backend.delete(Path::new("/d/f")).unwrap();
        assert!(matches!(
            backend.delete(Path::new("/d/f")),
            Err(FsError::NotFound { .. })
        ));
    }

    #[test]
    fn rename_moves_directory_trees() {
        let backend = MemoryBackend::new();
        backend.insert("/src/a", b"1".to_vec());
        backend.insert("/src/deep/b", b"2".to_vec());
        backend.mkdir(Path::new("/src/empty")).unwrap();

        backend.rename(Path::new("/src"), Path::new("/dst")).unwrap();

        assert_eq!(backend.object("/dst/a").unwrap(), b"1");
        assert_eq!(backend.object("/dst/deep/b").unwrap(), b"2");
        assert!(backend.stat(Path::new("/dst/empty")).unwrap().is_dir());
        assert!(backend.stat(Path::new("/src")).is_err());
    }

    #[test]
    fn default_truncate_support_follows_capabilities() {
        let s3 = MemoryBackend::new();
        assert_eq!(s3.truncate_support().grow, GrowStrategy::PadWithNulls);
        let dav = MemoryBackend::new().with_partial_overwrite();
        assert_eq!(dav.truncate_support().grow, GrowStrategy::WriteLastNull);
        let shrink_only = MemoryBackend::new().with_truncate_support(TruncateSupport::SHRINK_ONLY);
        assert_eq!(shrink_only.truncate_support(), TruncateSupport::SHRINK_ONLY);
    }
}
