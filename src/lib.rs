//! # objmount
//!
//! Present an **object store** (S3-like buckets, whole-object or ranged
//! storage) as a **POSIX-like filesystem**.
//!
//! Object stores cannot seek-write, resize or cheaply list. This crate
//! bridges the gap with a chain of decorating clients between the
//! kernel-facing adapter and the backend. Each link adds one concern:
//! listing cache, write buffering, read-ahead, truncate emulation.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use objmount::{mount, MemoryBackend, MountConfig, OpenFlags};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let fs = mount(&MountConfig::default(), Arc::new(MemoryBackend::new()))?;
//!
//! let h = fs.create(Path::new("/hello.txt"), OpenFlags::WRITE)?;
//! fs.write(h, 0, b"hello")?;
//! fs.release(h)?;
//!
//! let h = fs.open(Path::new("/hello.txt"), OpenFlags::READ)?;
//! assert_eq!(fs.read(h, 0, 64)?, b"hello");
//! fs.release(h)?;
//! # Ok::<(), objmount::FsError>(())
//! ```
//!
//! ---
//!
//! ## The Chain
//!
//! ```text
//! FilesystemAdapter
//!   └─ Recording ─ Prefix ─ Cache ─ WriteBuffer ─ ReadAhead ─ Truncate ─ Storage
//!                                                                          └─ StorageBackend
//! ```
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`FilesystemAdapter`] | Handle table, path locks, errno mapping |
//! | [`CachingFs`] | TTL listing cache, invalidated by mutations |
//! | [`WriteBufferFs`] | Coalesces small writes into chunk-sized uploads |
//! | [`ReadAheadFs`] | Geometric prefetch window for sequential reads |
//! | [`TruncateFs`] | Copy-and-shrink / pad-with-nulls truncate emulation |
//! | [`StorageFs`] | Multipart upload sessions over a [`StorageBackend`] |
//! | [`PrefixFs`] | Mounts a sub-directory of a bucket |
//! | [`RecordingFs`] | Logs every call and its outcome |
//!
//! [`mount`] assembles the chain from a [`MountConfig`]. Hand-built chains
//! use [`LayerExt::layer`].
//!
//! ---
//!
//! ## Error Handling
//!
//! All operations return `Result<T, FsError>`. [`FsError::errno`] gives the
//! code to hand back to the kernel:
//!
//! ```rust
//! use objmount::FsError;
//!
//! let err = FsError::ReadOnly { operation: "write" };
//! assert_eq!(err.errno(), libc::EROFS);
//! ```
//!
//! ---
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync` and takes `&self`. Links keep their
//! state behind `parking_lot` locks. When a mount runs multi-threaded,
//! [`PathLock`] serializes writes, truncates, renames and deletes per path.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Serialization for [`MountConfig`], [`DirEntry`], [`FileType`]; adds `MountConfig::from_json` |

// Private modules
mod adapter;
mod cache;
mod clock;
mod config;
mod error;
mod ext;
mod layer;
mod memory;
mod path_lock;
mod pipeline;
mod prefix;
mod read_ahead;
mod record;
mod storage;
mod traits;
mod truncate;
mod types;
mod write_buffer;

pub mod path_resolver;

// Public re-exports - error types
pub use error::FsError;

// Public re-exports - core types
pub use types::{
    Capabilities, DirEntry, FileType, GrowStrategy, Handle, Metadata, OpenFlags, PartSizeBounds,
    PartToken, ShrinkStrategy, StatFs, TruncateSupport, UploadId, GIB, KIB, MIB,
};

// Public re-exports - seams
pub use traits::{FsClient, StorageBackend};

// Public re-exports - chain links
pub use cache::{CacheLayer, CachingFs, ThreadSafeListingCache};
pub use prefix::{PrefixFs, PrefixLayer};
pub use read_ahead::{ReadAheadFs, ReadAheadLayer, ReadAheadWindow};
pub use record::{RecordingFs, RecordingLayer};
pub use storage::{SessionState, StorageFs};
pub use truncate::{TruncateFs, TruncateLayer};
pub use write_buffer::{WriteBufferFs, WriteBufferLayer, WriteMode};

// Public re-exports - adapter and assembly
pub use adapter::{FilesystemAdapter, HandleState};
pub use path_lock::{HolderId, LockToken, PathLock, StaleLock};
pub use pipeline::{assemble, assemble_with_clock, mount, mount_with_clock};

// Public re-exports - configuration
pub use config::{
    parse_mode, parse_mount_options, MountConfig, ENV_CHUNK_SIZE, ENV_READ_AHEAD_MAX_SIZE,
    ENV_READ_AHEAD_MIN_SIZE, ENV_READ_AHEAD_SIZE_MULTIPLIER,
};

// Public re-exports - infrastructure
pub use clock::{Clock, ManualClock, SystemClock};
pub use ext::FsClientExt;
pub use layer::{Layer, LayerExt};
pub use memory::{BackendStats, MemoryBackend};
