//! Mounting a sub-directory of a bucket.

use std::path::{Path, PathBuf};

use crate::path_resolver::{join_under, normalize};
use crate::{Capabilities, DirEntry, FsClient, FsError, Handle, Layer};

/// Chain link placing every mount path below a fixed bucket prefix.
pub struct PrefixFs<C> {
    inner: C,
    root: PathBuf,
}

impl<C: FsClient> PrefixFs<C> {
    /// Expose `root` (e.g. `/project/run1`) as the mount root.
    pub fn new(inner: C, root: impl AsRef<Path>) -> Self {
        Self {
            inner,
            root: normalize(root.as_ref()),
        }
    }

    /// The bucket prefix.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn inner_path(&self, path: &Path) -> PathBuf {
        join_under(&self.root, path)
    }
}

impl<C: FsClient> FsClient for PrefixFs<C> {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn attrs(&self, path: &Path) -> Result<Option<DirEntry>, FsError> {
        let found = self.inner.attrs(&self.inner_path(path))?;
        if found.is_none() && normalize(path) == Path::new("/") {
            return Ok(Some(DirEntry::dir("")));
        }
        Ok(found)
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        self.inner.list(&self.inner_path(path))
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        self.inner.mkdir(&self.inner_path(path))
    }

    fn rmdir(&self, path: &Path) -> Result<(), FsError> {
        self.inner.rmdir(&self.inner_path(path))
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        self.inner.delete(&self.inner_path(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.inner
            .rename(&self.inner_path(from), &self.inner_path(to))
    }

    fn upload(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.inner.upload(&self.inner_path(path), data)
    }

    fn download_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        self.inner
            .download_range(handle, &self.inner_path(path), offset, len)
    }

    fn upload_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<(), FsError> {
        self.inner
            .upload_range(handle, &self.inner_path(path), offset, data)
    }

    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        self.inner.truncate(handle, &self.inner_path(path), len)
    }

    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        self.inner.flush(handle, &self.inner_path(path))
    }

    fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        self.inner.release(handle, &self.inner_path(path))
    }

    fn describe(&self) -> String {
        format!("Prefix({}) -> {}", self.root.display(), self.inner.describe())
    }
}

/// Builds a [`PrefixFs`].
#[derive(Debug, Clone)]
pub struct PrefixLayer {
    root: PathBuf,
}

impl PrefixLayer {
    /// Expose `root` as the mount root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl<C: FsClient> Layer<C> for PrefixLayer {
    type Client = PrefixFs<C>;

    fn layer(self, client: C) -> Self::Client {
        PrefixFs::new(client, self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LayerExt, MemoryBackend, StorageFs, MIB};
    use std::sync::Arc;

    #[test]
    fn paths_are_translated_below_root() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("/project/run1/out.txt", b"result".to_vec());
        backend.insert("/project/other.txt", b"hidden".to_vec());
        let fs = StorageFs::new(backend.clone(), 10 * MIB).layer(PrefixLayer::new("project/run1"));

        let names: Vec<_> = fs
            .list(Path::new("/"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["out.txt"]);

        fs.upload(Path::new("/new.txt"), b"n").unwrap();
        assert_eq!(backend.object("/project/run1/new.txt").unwrap(), b"n");
        assert_eq!(
            fs.download_range(Handle(1), Path::new("/out.txt"), 0, 6)
                .unwrap(),
            b"result"
        );
        assert_eq!(fs.describe(), "Prefix(/project/run1) -> Storage(memory)");
    }

    #[test]
    fn mount_root_exists_even_without_objects() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = StorageFs::new(backend, 10 * MIB).layer(PrefixLayer::new("/empty/prefix"));
        assert!(fs.attrs(Path::new("/")).unwrap().unwrap().is_dir());
        assert!(fs.attrs(Path::new("/x")).unwrap().is_none());
    }

    #[test]
    fn parent_components_cannot_escape_root() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = StorageFs::new(backend.clone(), 10 * MIB).layer(PrefixLayer::new("/jail"));
        fs.upload(Path::new("/../escape.txt"), b"x").unwrap();
        assert!(backend.object("/escape.txt").is_none());
        assert!(backend.object("/jail/escape.txt").is_some());
    }
}
