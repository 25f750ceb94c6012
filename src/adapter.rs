//! The kernel-facing edge of the mount.
//!
//! [`FilesystemAdapter`] owns the handle table and the [`PathLock`], turns
//! filesystem operations into chain calls and reports failures as
//! [`FsError`]s whose [`errno`](FsError::errno) the FUSE glue hands back to
//! the kernel.
//!
//! | Operation | Path lock | Chain calls |
//! |-----------|-----------|-------------|
//! | `getattr`, `readdir`, `read`, `statfs` | none | `attrs`, `list`, `download_range` |
//! | `open`, `create` | path | `attrs`, `upload` / `truncate` |
//! | `write`, `flush`, `truncate`, `fallocate` | path | `upload_range`, `flush`, `truncate` |
//! | `unlink`, `mkdir`, `rmdir` | path | `delete`, `mkdir`, `list` + `rmdir` |
//! | `rename` | both paths | `flush` of dirty handles, `rename` |
//! | `release` | path (if dirty) | `flush`, `release` |
//!
//! Reads take no lock and may see listings up to the cache TTL old.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::path_resolver::normalize;
use crate::{
    DirEntry, FileType, FsClient, FsError, Handle, Metadata, OpenFlags, PathLock, StatFs,
};

const STATFS_BLOCK_SIZE: u64 = 4096;
const STATFS_BLOCKS: u64 = 1 << 32;
const MAX_NAME_LEN: u64 = 255;

/// Where an open handle is in its life.
///
/// `Open → (Reading | Writing)`. Release removes the handle from the table,
/// so a released handle has no state and every later call on it is
/// `EBADF`. Handle ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Opened, no I/O yet.
    Open,
    /// Last I/O was a read.
    Reading,
    /// Written through; may hold unflushed bytes.
    Writing,
}

#[derive(Debug, Clone)]
struct OpenFile {
    path: PathBuf,
    flags: OpenFlags,
    state: HandleState,
    dirty: bool,
}

/// Dispatches filesystem operations onto an assembled client chain.
pub struct FilesystemAdapter {
    client: Arc<dyn FsClient>,
    locks: Arc<PathLock>,
    handles: RwLock<HashMap<Handle, OpenFile>>,
    next_handle: AtomicU64,
    default_mode: u32,
}

impl FilesystemAdapter {
    /// Serve `client`, serializing mutations through `locks`. Every file and
    /// directory reports permission bits `default_mode`.
    pub fn new(client: Arc<dyn FsClient>, locks: Arc<PathLock>, default_mode: u32) -> Self {
        Self {
            client,
            locks,
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            default_mode,
        }
    }

    /// The chain behind this adapter.
    pub fn client(&self) -> &Arc<dyn FsClient> {
        &self.client
    }

    /// The lock table shared by all handles.
    pub fn locks(&self) -> &Arc<PathLock> {
        &self.locks
    }

    /// State of an open handle.
    pub fn handle_state(&self, handle: Handle) -> Option<HandleState> {
        self.handles.read().get(&handle).map(|f| f.state)
    }

    /// Current logical path of an open handle.
    pub fn handle_path(&self, handle: Handle) -> Option<PathBuf> {
        self.handles.read().get(&handle).map(|f| f.path.clone())
    }

    /// Number of open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.read().len()
    }

    fn allocate(&self) -> Handle {
        Handle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn lookup(&self, handle: Handle) -> Result<OpenFile, FsError> {
        self.handles
            .read()
            .get(&handle)
            .cloned()
            .ok_or(FsError::InvalidHandle { handle })
    }

    fn update(&self, handle: Handle, f: impl FnOnce(&mut OpenFile)) {
        if let Some(file) = self.handles.write().get_mut(&handle) {
            f(file);
        }
    }

    fn check_writable(&self, operation: &'static str) -> Result<(), FsError> {
        if self.client.capabilities().read_only {
            return Err(FsError::ReadOnly { operation });
        }
        Ok(())
    }

    fn metadata(&self, entry: &DirEntry) -> Metadata {
        Metadata {
            file_type: entry.file_type,
            size: entry.size,
            mode: self.default_mode,
            nlink: if entry.is_dir() { 2 } else { 1 },
            mtime: entry.mtime,
        }
    }

    /// Attributes of `path`.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if nothing exists at `path`
    pub fn getattr(&self, path: &Path) -> Result<Metadata, FsError> {
        let path = normalize(path);
        if path == Path::new("/") {
            return Ok(Metadata {
                file_type: FileType::Directory,
                size: 0,
                mode: self.default_mode,
                nlink: 2,
                mtime: SystemTime::UNIX_EPOCH,
            });
        }
        match self.client.attrs(&path)? {
            Some(entry) => Ok(self.metadata(&entry)),
            None => Err(FsError::NotFound { path }),
        }
    }

    /// Entries of the directory at `path`.
    pub fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        self.client.list(&normalize(path))
    }

    /// Open an existing file, or create it when `flags.create` is set.
    ///
    /// With `flags.truncate` on a writable open the file is emptied first.
    ///
    /// # Errors
    ///
    /// - [`FsError::ReadOnly`] when opening for write on a read-only mount
    /// - [`FsError::NotFound`] if the file is missing and `create` is unset
    /// - [`FsError::NotAFile`] when opening a directory for write
    pub fn open(&self, path: &Path, flags: OpenFlags) -> Result<Handle, FsError> {
        let path = normalize(path);
        if flags.writes() {
            self.check_writable("open")?;
        }
        let existing = self.client.attrs(&path)?;
        match &existing {
            None if !flags.create => return Err(FsError::NotFound { path }),
            Some(entry) if entry.is_dir() && flags.writes() => {
                return Err(FsError::NotAFile { path });
            }
            _ => {}
        }

        let handle = self.allocate();
        if flags.writes() && (existing.is_none() || flags.truncate) {
            self.locks.with(&path, || match existing {
                None => self.client.upload(&path, &[]),
                Some(_) => self.client.truncate(handle, &path, 0),
            })?;
        }
        debug!(handle = handle.0, path = %path.display(), ?flags, "open");
        self.handles.write().insert(
            handle,
            OpenFile {
                path,
                flags,
                state: HandleState::Open,
                dirty: false,
            },
        );
        Ok(handle)
    }

    /// Create an empty file and open it for writing.
    pub fn create(&self, path: &Path, flags: OpenFlags) -> Result<Handle, FsError> {
        self.check_writable("create")?;
        let path = normalize(path);
        self.locks.with(&path, || self.client.upload(&path, &[]))?;
        let handle = self.allocate();
        let flags = OpenFlags {
            write: true,
            create: true,
            ..flags
        };
        debug!(handle = handle.0, path = %path.display(), "create");
        self.handles.write().insert(
            handle,
            OpenFile {
                path,
                flags,
                state: HandleState::Open,
                dirty: false,
            },
        );
        Ok(handle)
    }

    /// Read up to `len` bytes at `offset`. Short at end of file.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidHandle`] for an unknown handle
    /// - [`FsError::PermissionDenied`] if the handle was not opened for reading
    pub fn read(&self, handle: Handle, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
        let file = self.lookup(handle)?;
        if !file.flags.read {
            return Err(FsError::PermissionDenied {
                path: file.path,
                operation: "read",
            });
        }
        let data = self.client.download_range(handle, &file.path, offset, len)?;
        self.update(handle, |f| {
            if f.state == HandleState::Open {
                f.state = HandleState::Reading;
            }
        });
        Ok(data)
    }

    /// Write `data` at `offset`. Returns the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidHandle`] for an unknown handle
    /// - [`FsError::PermissionDenied`] if the handle was not opened for writing
    /// - [`FsError::Unsupported`] for a non-sequential write the backend cannot take
    pub fn write(&self, handle: Handle, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let file = self.lookup(handle)?;
        if !file.flags.writes() {
            return Err(FsError::PermissionDenied {
                path: file.path,
                operation: "write",
            });
        }
        self.check_writable("write")?;
        self.locks.with(&file.path, || {
            self.client.upload_range(handle, &file.path, offset, data)
        })?;
        self.update(handle, |f| {
            f.state = HandleState::Writing;
            f.dirty = true;
        });
        Ok(data.len())
    }

    /// Set the length of `path`, through `handle` when the kernel supplies
    /// one.
    pub fn truncate(&self, path: &Path, len: u64, handle: Option<Handle>) -> Result<(), FsError> {
        self.check_writable("truncate")?;
        let (handle, path, temporary) = match handle {
            Some(handle) => (handle, self.lookup(handle)?.path, false),
            None => (self.allocate(), normalize(path), true),
        };
        let result = self
            .locks
            .with(&path, || self.client.truncate(handle, &path, len));
        if temporary {
            if let Err(e) = self.client.release(handle, &path) {
                warn!(path = %path.display(), error = %e, "releasing truncate handle failed");
            }
        } else if result.is_ok() {
            self.update(handle, |f| f.dirty = false);
        }
        result
    }

    /// Remove a file.
    pub fn unlink(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable("unlink")?;
        let path = normalize(path);
        self.locks.with(&path, || self.client.delete(&path))
    }

    /// Create a directory.
    pub fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable("mkdir")?;
        let path = normalize(path);
        self.locks.with(&path, || self.client.mkdir(&path))
    }

    /// Remove an empty directory.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotADirectory`] if `path` is a file
    /// - [`FsError::DirectoryNotEmpty`] if it has children
    pub fn rmdir(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable("rmdir")?;
        let path = normalize(path);
        self.locks.with(&path, || {
            match self.client.attrs(&path)? {
                None => return Err(FsError::NotFound { path: path.clone() }),
                Some(entry) if !entry.is_dir() => {
                    return Err(FsError::NotADirectory { path: path.clone() });
                }
                Some(_) => {}
            }
            if !self.client.list(&path)?.is_empty() {
                return Err(FsError::DirectoryNotEmpty { path: path.clone() });
            }
            self.client.rmdir(&path)
        })
    }

    /// Rename `from` to `to`.
    ///
    /// Dirty handles on `from` are flushed first. Handles open on `from`, or
    /// below it for a directory, follow the object to its new path.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.check_writable("rename")?;
        let from = normalize(from);
        let to = normalize(to);
        self.locks.with_pair(&from, &to, || {
            let dirty: Vec<(Handle, PathBuf)> = self
                .handles
                .read()
                .iter()
                .filter(|(_, f)| f.dirty && f.path.starts_with(&from))
                .map(|(h, f)| (*h, f.path.clone()))
                .collect();
            for (handle, path) in dirty {
                self.client.flush(handle, &path)?;
                self.update(handle, |f| f.dirty = false);
            }

            self.client.rename(&from, &to)?;

            for file in self.handles.write().values_mut() {
                if let Ok(rest) = file.path.strip_prefix(&from) {
                    file.path = if rest.as_os_str().is_empty() {
                        to.clone()
                    } else {
                        to.join(rest)
                    };
                }
            }
            Ok(())
        })
    }

    /// Push everything written through `handle` to the backend.
    pub fn flush(&self, handle: Handle) -> Result<(), FsError> {
        let file = self.lookup(handle)?;
        if !file.dirty {
            return Ok(());
        }
        self.locks
            .with(&file.path, || self.client.flush(handle, &file.path))?;
        self.update(handle, |f| f.dirty = false);
        Ok(())
    }

    /// Close `handle`, flushing unflushed bytes first.
    ///
    /// The handle is gone afterwards even when the flush fails; that
    /// failure is returned.
    pub fn release(&self, handle: Handle) -> Result<(), FsError> {
        let Some(file) = self.handles.write().remove(&handle) else {
            return Err(FsError::InvalidHandle { handle });
        };
        let flushed = if file.dirty {
            self.locks
                .with(&file.path, || self.client.flush(handle, &file.path))
        } else {
            Ok(())
        };
        let released = self.client.release(handle, &file.path);
        debug!(handle = handle.0, path = %file.path.display(), last_state = ?file.state, "release");

        if let Err(e) = flushed {
            warn!(path = %file.path.display(), error = %e, "flush on release failed, unflushed bytes lost");
            return Err(e);
        }
        released
    }

    /// Filesystem statistics. Object stores have no fixed capacity, so a
    /// large synthetic one is reported.
    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: STATFS_BLOCK_SIZE,
            blocks: STATFS_BLOCKS,
            blocks_free: STATFS_BLOCKS,
            blocks_available: STATFS_BLOCKS,
            max_name_len: MAX_NAME_LEN,
        }
    }

    /// Reserve `[offset, offset + len)`. Only mode 0 is supported; it grows
    /// the file through truncate when the range ends past the current size.
    pub fn fallocate(&self, handle: Handle, mode: i32, offset: u64, len: u64) -> Result<(), FsError> {
        let file = self.lookup(handle)?;
        if mode != 0 {
            return Err(FsError::unsupported(
                "fallocate",
                file.path,
                "only mode 0 is supported",
            ));
        }
        let end = offset.saturating_add(len);
        let current = self.getattr(&file.path)?.size;
        if end <= current {
            return Ok(());
        }
        self.truncate(&file.path, end, Some(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LayerExt, MemoryBackend, StorageFs, WriteBufferLayer, MIB};
    use std::time::Duration;

    fn adapter_over(backend: &Arc<MemoryBackend>) -> FilesystemAdapter {
        let client = StorageFs::new(backend.clone(), 10 * MIB).layer(WriteBufferLayer::new(MIB, MIB));
        FilesystemAdapter::new(
            Arc::new(client),
            Arc::new(PathLock::new(Duration::from_secs(600))),
            0o700,
        )
    }

    #[test]
    fn getattr_reports_type_mode_and_links() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/d/f.txt", b"abc".to_vec());
        let fs = adapter_over(&backend);

        let root = fs.getattr(Path::new("/")).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.nlink, 2);

        let file = fs.getattr(Path::new("/d/f.txt")).unwrap();
        assert_eq!(file.size, 3);
        assert_eq!(file.nlink, 1);
        assert_eq!(file.st_mode() & 0o777, 0o700);

        let err = fs.getattr(Path::new("/nope")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn write_then_read_back_after_release() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = adapter_over(&backend);

        let h = fs.create(Path::new("/f"), OpenFlags::WRITE).unwrap();
        assert_eq!(fs.write(h, 0, b"hello ").unwrap(), 6);
        assert_eq!(fs.write(h, 6, b"world").unwrap(), 5);
        assert_eq!(fs.handle_state(h), Some(HandleState::Writing));
        fs.release(h).unwrap();
        assert_eq!(fs.handle_state(h), None);
        assert_eq!(fs.write(h, 11, b"!").unwrap_err().errno(), libc::EBADF);
        assert_eq!(fs.release(h).unwrap_err().errno(), libc::EBADF);

        let r = fs.open(Path::new("/f"), OpenFlags::READ).unwrap();
        assert_eq!(fs.read(r, 0, 100).unwrap(), b"hello world");
        assert_eq!(fs.handle_state(r), Some(HandleState::Reading));
        fs.release(r).unwrap();
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn access_mode_is_enforced() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/f", b"abc".to_vec());
        let fs = adapter_over(&backend);

        let r = fs.open(Path::new("/f"), OpenFlags::READ).unwrap();
        assert_eq!(fs.write(r, 0, b"x").unwrap_err().errno(), libc::EACCES);
        let w = fs.open(Path::new("/f"), OpenFlags::APPEND).unwrap();
        assert_eq!(fs.read(w, 0, 1).unwrap_err().errno(), libc::EACCES);
        assert_eq!(
            fs.read(Handle(999), 0, 1).unwrap_err().errno(),
            libc::EBADF
        );
    }

    #[test]
    fn open_missing_without_create_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = adapter_over(&backend);
        assert!(matches!(
            fs.open(Path::new("/nope"), OpenFlags::READ),
            Err(FsError::NotFound { .. })
        ));
        fs.open(Path::new("/new"), OpenFlags::APPEND).unwrap();
        assert_eq!(backend.object("/new").unwrap(), b"");
    }

    #[test]
    fn open_with_truncate_empties_file() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/f", b"old contents".to_vec());
        let fs = adapter_over(&backend);
        let h = fs.open(Path::new("/f"), OpenFlags::WRITE).unwrap();
        assert_eq!(backend.object("/f").unwrap(), b"");
        fs.release(h).unwrap();
    }

    #[test]
    fn read_only_mount_rejects_mutations() {
        let backend = Arc::new(MemoryBackend::new().read_only());
        backend.insert("/f", b"abc".to_vec());
        let fs = adapter_over(&backend);

        for err in [
            fs.create(Path::new("/g"), OpenFlags::WRITE).unwrap_err(),
            fs.open(Path::new("/f"), OpenFlags::WRITE).unwrap_err(),
            fs.unlink(Path::new("/f")).unwrap_err(),
            fs.mkdir(Path::new("/d")).unwrap_err(),
            fs.rename(Path::new("/f"), Path::new("/g")).unwrap_err(),
            fs.truncate(Path::new("/f"), 0, None).unwrap_err(),
        ] {
            assert_eq!(err.errno(), libc::EROFS);
        }
        let r = fs.open(Path::new("/f"), OpenFlags::READ).unwrap();
        assert_eq!(fs.read(r, 0, 3).unwrap(), b"abc");
    }

    #[test]
    fn rmdir_refuses_files_and_non_empty_directories() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/d/f", b"x".to_vec());
        let fs = adapter_over(&backend);

        assert_eq!(fs.rmdir(Path::new("/d")).unwrap_err().errno(), libc::ENOTEMPTY);
        assert_eq!(fs.rmdir(Path::new("/d/f")).unwrap_err().errno(), libc::ENOTDIR);
        fs.unlink(Path::new("/d/f")).unwrap();
        fs.mkdir(Path::new("/e")).unwrap();
        fs.rmdir(Path::new("/e")).unwrap();
        assert!(fs.getattr(Path::new("/e")).is_err());
    }

    #[test]
    fn rename_moves_open_handles() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = adapter_over(&backend);

        let h = fs.create(Path::new("/a"), OpenFlags::WRITE).unwrap();
        fs.write(h, 0, b"data").unwrap();
        fs.rename(Path::new("/a"), Path::new("/b")).unwrap();

        assert_eq!(fs.handle_path(h).unwrap(), Path::new("/b"));
        assert_eq!(backend.object("/b").unwrap(), b"data");
        assert!(backend.object("/a").is_none());
        fs.release(h).unwrap();
    }

    #[test]
    fn truncate_without_handle_uses_a_temporary_one() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/f", b"0123456789".to_vec());
        let fs = StorageFs::new(backend.clone(), 10 * MIB).layer(crate::TruncateLayer::new(MIB));
        let fs = FilesystemAdapter::new(Arc::new(fs), Arc::new(PathLock::disabled()), 0o700);

        fs.truncate(Path::new("/f"), 3, None).unwrap();
        assert_eq!(backend.object("/f").unwrap(), b"012");
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn fallocate_grows_through_truncate() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/f", b"ab".to_vec());
        let fs = StorageFs::new(backend.clone(), 10 * MIB).layer(crate::TruncateLayer::new(MIB));
        let fs = FilesystemAdapter::new(Arc::new(fs), Arc::new(PathLock::disabled()), 0o700);

        let h = fs.open(Path::new("/f"), OpenFlags::READ_WRITE).unwrap();
        fs.fallocate(h, 0, 0, 1).unwrap();
        assert_eq!(backend.object("/f").unwrap(), b"ab");
        fs.fallocate(h, 0, 2, 2).unwrap();
        assert_eq!(backend.object("/f").unwrap(), b"ab\0\0");
        assert_eq!(fs.fallocate(h, 1, 0, 10).unwrap_err().errno(), libc::ENOTSUP);
        fs.release(h).unwrap();
    }

    #[test]
    fn statfs_is_synthetic() {
        let backend = Arc::new(MemoryBackend::new());
        let stats = adapter_over(&backend).statfs();
        assert_eq!(stats.block_size, 4096);
        assert!(stats.blocks_available > 0);
        assert_eq!(stats.max_name_len, 255);
    }

    #[test]
    fn release_unknown_handle_is_ebadf() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = adapter_over(&backend);
        assert_eq!(fs.release(Handle(42)).unwrap_err().errno(), libc::EBADF);
    }
}
