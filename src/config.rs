//! Mount-time configuration.
//!
//! Every size is in bytes and every delay in seconds, with `Duration`
//! accessors for the latter. A zero capacity or TTL disables the matching
//! chain link.

use std::time::Duration;

use indexmap::IndexMap;

use crate::{FsError, MIB, PartSizeBounds};

/// Environment variable overriding [`MountConfig::chunk_size`].
pub const ENV_CHUNK_SIZE: &str = "OBJMOUNT_CHUNK_SIZE";
/// Environment variable overriding [`MountConfig::read_ahead_min_size`].
pub const ENV_READ_AHEAD_MIN_SIZE: &str = "OBJMOUNT_READ_AHEAD_MIN_SIZE";
/// Environment variable overriding [`MountConfig::read_ahead_max_size`].
pub const ENV_READ_AHEAD_MAX_SIZE: &str = "OBJMOUNT_READ_AHEAD_MAX_SIZE";
/// Environment variable overriding [`MountConfig::read_ahead_size_multiplier`].
pub const ENV_READ_AHEAD_SIZE_MULTIPLIER: &str = "OBJMOUNT_READ_AHEAD_SIZE_MULTIPLIER";

/// Configuration of one mount.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct MountConfig {
    // ---- Read path ----
    /// Total prefetched bytes kept across all handles (0 disables read-ahead).
    pub read_buffer_size: u64,

    /// Initial read-ahead window.
    pub read_ahead_min_size: u64,

    /// Upper bound of the read-ahead window.
    pub read_ahead_max_size: u64,

    /// Factor applied to the window on each sequential read.
    pub read_ahead_size_multiplier: u64,

    // ---- Write path ----
    /// Bytes buffered per handle before parts are sent (0 disables write buffering).
    pub write_buffer_size: u64,

    /// Staging capacity for copy-and-shrink truncation (0 disables truncate emulation).
    pub trunc_buffer_size: u64,

    /// Multipart part size.
    pub chunk_size: u64,

    // ---- Listing cache ----
    /// Listing cache time-to-live in seconds (0 disables the cache).
    pub cache_ttl_secs: u64,

    /// Maximum number of cached listings (0 disables the cache).
    pub cache_size: usize,

    // ---- Concurrency ----
    /// Whether the kernel glue runs calls on several threads. Only turns
    /// on per-path locking; the listing cache is always the thread-safe one.
    pub threads: bool,

    /// Age in seconds after which a path lock may be reclaimed.
    pub monitoring_delay_secs: u64,

    // ---- Presentation ----
    /// Permission bits reported for every file and directory.
    pub default_mode: u32,

    /// Log every chain call at `info` level.
    pub recording: bool,

    /// Sub-directory of the bucket exposed as the mount root.
    pub root_path: Option<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 40 * MIB,
            read_ahead_min_size: MIB,
            read_ahead_max_size: 20 * MIB,
            read_ahead_size_multiplier: 2,
            write_buffer_size: 512 * MIB,
            trunc_buffer_size: 512 * MIB,
            chunk_size: 10 * MIB,
            cache_ttl_secs: 60,
            cache_size: 100,
            threads: false,
            monitoring_delay_secs: 600,
            default_mode: 0o700,
            recording: false,
            root_path: None,
        }
    }
}

impl MountConfig {
    /// Listing cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Lock monitoring delay as a [`Duration`].
    pub fn monitoring_delay(&self) -> Duration {
        Duration::from_secs(self.monitoring_delay_secs)
    }

    /// Returns `true` if the listing cache link is part of the chain.
    pub fn caching_enabled(&self) -> bool {
        self.cache_ttl_secs > 0 && self.cache_size > 0
    }

    /// Apply `OBJMOUNT_*` overrides from the process environment.
    pub fn with_process_env(self) -> Result<Self, FsError> {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `OBJMOUNT_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidConfig`] if a variable is set but not an integer
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, FsError> {
        let read = |key: &str, current: u64| -> Result<u64, FsError> {
            match lookup(key) {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    FsError::InvalidConfig(format!("{key} must be an integer, got {raw:?}"))
                }),
                None => Ok(current),
            }
        };
        self.chunk_size = read(ENV_CHUNK_SIZE, self.chunk_size)?;
        self.read_ahead_min_size = read(ENV_READ_AHEAD_MIN_SIZE, self.read_ahead_min_size)?;
        self.read_ahead_max_size = read(ENV_READ_AHEAD_MAX_SIZE, self.read_ahead_max_size)?;
        self.read_ahead_size_multiplier = read(
            ENV_READ_AHEAD_SIZE_MULTIPLIER,
            self.read_ahead_size_multiplier,
        )?;
        Ok(self)
    }

    /// Check the configuration against itself and the backend's part limits.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidConfig`] describing the first offending field
    pub fn validate(&self, bounds: Option<PartSizeBounds>) -> Result<(), FsError> {
        if self.read_buffer_size > 0 {
            if self.read_ahead_min_size == 0 {
                return Err(invalid("read_ahead_min_size must be positive"));
            }
            if self.read_ahead_min_size > self.read_ahead_max_size {
                return Err(invalid(
                    "read_ahead_min_size must not exceed read_ahead_max_size",
                ));
            }
            if self.read_ahead_size_multiplier == 0 {
                return Err(invalid("read_ahead_size_multiplier must be at least 1"));
            }
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be positive"));
        }
        if let Some(bounds) = bounds {
            if !bounds.contains(self.chunk_size) {
                return Err(FsError::InvalidConfig(format!(
                    "chunk_size {} outside backend part limits {}..={}",
                    self.chunk_size, bounds.min, bounds.max
                )));
            }
        }
        if self.write_buffer_size > 0 && self.write_buffer_size < self.chunk_size {
            return Err(invalid("write_buffer_size must hold at least one chunk"));
        }
        if self.default_mode > 0o7777 {
            return Err(FsError::InvalidConfig(format!(
                "default_mode {:o} is not a permission mask",
                self.default_mode
            )));
        }
        Ok(())
    }

    /// Parse a JSON document; missing fields keep their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, FsError> {
        serde_json::from_str(json).map_err(|e| FsError::InvalidConfig(e.to_string()))
    }
}

fn invalid(message: &str) -> FsError {
    FsError::InvalidConfig(message.to_string())
}

/// Parse an octal permission string such as `"700"` or `"0644"`.
pub fn parse_mode(mode: &str) -> Result<u32, FsError> {
    let bits = u32::from_str_radix(mode.trim(), 8)
        .map_err(|_| FsError::InvalidConfig(format!("mode {mode:?} is not octal")))?;
    if bits > 0o7777 {
        return Err(FsError::InvalidConfig(format!(
            "mode {mode:?} is not a permission mask"
        )));
    }
    Ok(bits)
}

/// Split a FUSE option string (`"allow_other,uid=1000"`) into key/value pairs.
///
/// Bare keys map to `None`. Order is preserved.
pub fn parse_mount_options(options: &str) -> IndexMap<String, Option<String>> {
    options
        .split(',')
        .map(str::trim)
        .filter(|option| !option.is_empty())
        .map(|option| match option.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (option.to_string(), None),
        })
        .collect()
}
