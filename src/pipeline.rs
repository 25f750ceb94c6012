//! Mount-time chain assembly.
//!
//! Links are stacked innermost first; the first row of the table is the
//! outermost link a call meets.
//!
//! | Link | Present when |
//! |------|--------------|
//! | [`RecordingFs`](crate::RecordingFs) | `recording` |
//! | [`PrefixFs`](crate::PrefixFs) | `root_path` names a sub-directory |
//! | [`CachingFs`](crate::CachingFs) | `cache_ttl_secs > 0` and `cache_size > 0` |
//! | [`WriteBufferFs`](crate::WriteBufferFs) | `write_buffer_size > 0` |
//! | [`ReadAheadFs`](crate::ReadAheadFs) | `read_buffer_size > 0` |
//! | [`TruncateFs`](crate::TruncateFs) | `trunc_buffer_size > 0` |
//! | [`StorageFs`](crate::StorageFs) | always |

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::path_resolver::normalize;
use crate::{
    CacheLayer, Clock, FilesystemAdapter, FsClient, FsError, LayerExt, MountConfig, PathLock,
    PrefixLayer, ReadAheadLayer, RecordingLayer, StorageBackend, StorageFs, SystemClock,
    TruncateLayer, WriteBufferLayer,
};

/// Build the client chain described by `config` over `backend`.
pub fn assemble(config: &MountConfig, backend: Arc<dyn StorageBackend>) -> Arc<dyn FsClient> {
    assemble_with_clock(config, backend, Arc::new(SystemClock))
}

/// Like [`assemble`], with the listing cache reading time from `clock`.
pub fn assemble_with_clock(
    config: &MountConfig,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
) -> Arc<dyn FsClient> {
    let storage = StorageFs::new(backend, config.chunk_size);
    let part_size = storage.part_size();
    let mut client: Arc<dyn FsClient> = Arc::new(storage);

    if config.trunc_buffer_size > 0 {
        client = Arc::new(client.layer(TruncateLayer::new(config.trunc_buffer_size)));
    }
    if config.read_buffer_size > 0 {
        client = Arc::new(client.layer(ReadAheadLayer::new(
            config.read_buffer_size,
            config.read_ahead_min_size,
            config.read_ahead_max_size,
            config.read_ahead_size_multiplier,
        )));
    }
    if config.write_buffer_size > 0 {
        client = Arc::new(client.layer(WriteBufferLayer::new(config.write_buffer_size, part_size)));
    }
    // Links are shared across threads either way, so `threads` does not
    // pick the cache flavour.
    if config.caching_enabled() {
        client = Arc::new(
            client.layer(CacheLayer::new(config.cache_ttl(), config.cache_size).with_clock(clock)),
        );
    }
    if let Some(root) = &config.root_path {
        if normalize(Path::new(root)) != Path::new("/") {
            client = Arc::new(client.layer(PrefixLayer::new(root)));
        }
    }
    if config.recording {
        client = Arc::new(client.layer(RecordingLayer));
    }

    info!(chain = %client.describe(), part_size, "assembled client chain");
    client
}

/// Validate `config` and build a ready-to-serve adapter over `backend`.
///
/// Path locks are only enforced when `config.threads` is set; a
/// single-threaded mount cannot race with itself.
///
/// # Errors
///
/// - [`FsError::InvalidConfig`] if `config` fails [`MountConfig::validate`]
pub fn mount(config: &MountConfig, backend: Arc<dyn StorageBackend>) -> Result<FilesystemAdapter, FsError> {
    mount_with_clock(config, backend, Arc::new(SystemClock))
}

/// Like [`mount`], with an injected clock.
pub fn mount_with_clock(
    config: &MountConfig,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
) -> Result<FilesystemAdapter, FsError> {
    config.validate(backend.multipart_bounds())?;
    let locks = if config.threads {
        PathLock::new(config.monitoring_delay())
    } else {
        PathLock::disabled()
    };
    let client = assemble_with_clock(config, backend, clock);
    Ok(FilesystemAdapter::new(
        client,
        Arc::new(locks),
        config.default_mode,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBackend, MIB};

    #[test]
    fn default_chain_has_every_core_link() {
        let config = MountConfig::default();
        let client = assemble(&config, Arc::new(MemoryBackend::new()));
        assert_eq!(
            client.describe(),
            "Cache -> WriteBuffer -> ReadAhead -> Truncate -> Storage(memory)"
        );
    }

    #[test]
    fn zero_capacities_drop_links() {
        let config = MountConfig {
            read_buffer_size: 0,
            write_buffer_size: 0,
            cache_ttl_secs: 0,
            ..MountConfig::default()
        };
        let client = assemble(&config, Arc::new(MemoryBackend::new()));
        assert_eq!(client.describe(), "Truncate -> Storage(memory)");
    }

    #[test]
    fn recording_and_prefix_wrap_the_chain() {
        let config = MountConfig {
            recording: true,
            root_path: Some("/bucket/sub".to_string()),
            cache_size: 0,
            ..MountConfig::default()
        };
        let client = assemble(&config, Arc::new(MemoryBackend::new()));
        assert_eq!(
            client.describe(),
            "Recording -> Prefix(/bucket/sub) -> WriteBuffer -> ReadAhead -> Truncate -> Storage(memory)"
        );
    }

    #[test]
    fn root_prefix_is_skipped() {
        let config = MountConfig {
            root_path: Some("/".to_string()),
            ..MountConfig::default()
        };
        let client = assemble(&config, Arc::new(MemoryBackend::new()));
        assert!(!client.describe().contains("Prefix"));
    }

    #[test]
    fn mount_rejects_chunk_outside_backend_limits() {
        let config = MountConfig {
            chunk_size: MIB,
            ..MountConfig::default()
        };
        let err = mount(&config, Arc::new(MemoryBackend::new())).err().unwrap();
        assert!(matches!(err, FsError::InvalidConfig(_)));
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn threads_flag_enables_path_locks() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let single = mount(&MountConfig::default(), backend.clone()).unwrap();
        assert!(!single.locks().is_enabled());

        let config = MountConfig {
            threads: true,
            ..MountConfig::default()
        };
        let threaded = mount(&config, backend).unwrap();
        assert!(threaded.locks().is_enabled());
    }
}
