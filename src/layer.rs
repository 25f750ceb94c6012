//! # Layer Trait
//!
//! Tower-style composition of client-chain links.
//!
//! ## Overview
//!
//! Every decorator in the chain comes as a pair: a link struct that
//! implements [`FsClient`] around an inner client, and a `Layer` that holds
//! the link's configuration and builds it.
//!
//! ```text
//! inner client ──▶ Layer::layer() ──▶ wrapped client
//! ```
//!
//! ## Fluent Composition
//!
//! Layers are applied innermost first. The last layer applied is the link
//! the adapter talks to:
//!
//! ```rust
//! use objmount::{CacheLayer, LayerExt, MemoryBackend, StorageFs, WriteBufferLayer, MIB};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = StorageFs::new(Arc::new(MemoryBackend::new()), 10 * MIB)
//!     .layer(WriteBufferLayer::new(64 * MIB, 10 * MIB))
//!     .layer(CacheLayer::new(Duration::from_secs(60), 100));
//! assert_eq!(
//!     objmount::FsClient::describe(&client),
//!     "Cache -> WriteBuffer -> Storage(memory)"
//! );
//! ```

use crate::FsClient;

/// A layer that wraps a client to add one concern.
///
/// # Type Parameters
///
/// - `C`: The client being wrapped (must implement [`FsClient`])
///
/// # Design Notes
///
/// - `layer(self, client)` consumes both the layer and the client
/// - The resulting `Client` type implements `FsClient` again, so layers stack
pub trait Layer<C: FsClient> {
    /// The link produced by this layer.
    type Client: FsClient;

    /// Wrap `client` with this layer's link.
    fn layer(self, client: C) -> Self::Client;
}

/// Extension trait for fluent layer composition.
///
/// Provides `.layer()` on any [`FsClient`].
pub trait LayerExt: FsClient + Sized {
    /// Apply a layer to this client.
    fn layer<L: Layer<Self>>(self, layer: L) -> L::Client {
        layer.layer(self)
    }
}

impl<C: FsClient> LayerExt for C {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Capabilities, DirEntry, FsError, Handle, TruncateSupport};
    use std::path::Path;

    struct Leaf;

    impl FsClient for Leaf {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                read_only: false,
                multipart: None,
                partial_overwrite: false,
                truncate: TruncateSupport::NONE,
            }
        }
        fn attrs(&self, _: &Path) -> Result<Option<DirEntry>, FsError> {
            Ok(None)
        }
        fn list(&self, _: &Path) -> Result<Vec<DirEntry>, FsError> {
            Ok(vec![])
        }
        fn mkdir(&self, _: &Path) -> Result<(), FsError> {
            Ok(())
        }
        fn rmdir(&self, _: &Path) -> Result<(), FsError> {
            Ok(())
        }
        fn delete(&self, _: &Path) -> Result<(), FsError> {
            Ok(())
        }
        fn rename(&self, _: &Path, _: &Path) -> Result<(), FsError> {
            Ok(())
        }
        fn upload(&self, _: &Path, _: &[u8]) -> Result<(), FsError> {
            Ok(())
        }
        fn download_range(
            &self,
            _: Handle,
            _: &Path,
            _: u64,
            _: usize,
        ) -> Result<Vec<u8>, FsError> {
            Ok(vec![])
        }
        fn upload_range(&self, _: Handle, _: &Path, _: u64, _: &[u8]) -> Result<(), FsError> {
            Ok(())
        }
        fn truncate(&self, _: Handle, _: &Path, _: u64) -> Result<(), FsError> {
            Ok(())
        }
        fn flush(&self, _: Handle, _: &Path) -> Result<(), FsError> {
            Ok(())
        }
        fn release(&self, _: Handle, _: &Path) -> Result<(), FsError> {
            Ok(())
        }
        fn describe(&self) -> String {
            "Leaf".into()
        }
    }

    struct Named<C> {
        name: &'static str,
        inner: C,
    }

    impl<C: FsClient> FsClient for Named<C> {
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
            self.inner.truncate(handle, path, len)
        }
        fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
            self.inner.flush(handle, path)
        }
        fn release(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
            self.inner.release(handle, path)
        }
        fn describe(&self) -> String {
            format!("{} -> {}", self.name, self.inner.describe())
        }
    }

    struct NamedLayer(&'static str);

    impl<C: FsClient> Layer<C> for NamedLayer {
        type Client = Named<C>;

        fn layer(self, client: C) -> Self::Client {
            Named {
                name: self.0,
                inner: client,
            }
        }
    }

    #[test]
    fn layer_ext_is_auto_implemented() {
        fn _check<C: FsClient + LayerExt>() {}
    }

    #[test]
    fn layers_apply_innermost_first() {
        let client = Leaf.layer(NamedLayer("Inner")).layer(NamedLayer("Outer"));
        assert_eq!(client.describe(), "Outer -> Inner -> Leaf");
    }
}
