//! # Client Traits
//!
//! The two seams of the crate.
//!
//! ```text
//! FilesystemAdapter ──▶ FsClient link ──▶ FsClient link ──▶ … ──▶ StorageFs ──▶ StorageBackend
//! ```
//!
//! | Trait | Implemented by | Role |
//! |-------|----------------|------|
//! | [`StorageBackend`] | vendor drivers, [`MemoryBackend`](crate::MemoryBackend) | raw object-store primitives |
//! | [`FsClient`] | every chain link | filesystem-shaped client used by the adapter |
//!
//! ## Thread Safety
//!
//! Both traits require `Send + Sync`. Methods take `&self`; implementations
//! use interior mutability.
//!
//! ## Object Safety
//!
//! Both traits are object-safe:
//!
//! ```rust
//! use objmount::{FsClient, StorageBackend};
//!
//! fn chain_name(client: &dyn FsClient) -> String {
//!     client.describe()
//! }
//!
//! fn backend_name(backend: &dyn StorageBackend) -> &str {
//!     backend.name()
//! }
//! ```

mod fs_client;
mod storage_backend;

pub use fs_client::FsClient;
pub use storage_backend::StorageBackend;
