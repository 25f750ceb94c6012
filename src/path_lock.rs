//! Per-path mutual exclusion with stale-holder reclaim.
//!
//! Mutating operations on one path (write, truncate, rename, delete, create,
//! mkdir, rmdir, flush) hold that path's lock. A waiter blocks until the
//! holder releases or until the holder has held the lock for longer than
//! the monitoring delay; then it takes the lock over and the token reports
//! the [`StaleLock`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::FsError;

/// Who holds a path lock.
pub type HolderId = u64;

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    holder: HolderId,
    acquired_at: Instant,
}

/// A lock taken over from a holder that exceeded the monitoring delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleLock {
    /// The holder that lost the lock.
    pub previous_holder: HolderId,
    /// How long it had held it.
    pub held_for: Duration,
}

/// Proof of holding a path lock. Pass it back to [`PathLock::release`].
#[derive(Debug)]
#[must_use = "a lock token must be released"]
pub struct LockToken {
    path: PathBuf,
    holder: HolderId,
    stale: Option<StaleLock>,
}

impl LockToken {
    /// The locked path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set when this lock was reclaimed from a stale holder.
    pub fn stale(&self) -> Option<StaleLock> {
        self.stale
    }
}

struct LockTable {
    entries: Mutex<HashMap<PathBuf, LockEntry>>,
    released: Condvar,
    monitoring_delay: Duration,
}

/// Process-wide table of path locks.
///
/// A disabled lock (for single-threaded mounts) grants every request at
/// once.
pub struct PathLock {
    table: Option<LockTable>,
    next_holder: AtomicU64,
}

impl PathLock {
    /// An active lock table that reclaims holders older than `monitoring_delay`.
    pub fn new(monitoring_delay: Duration) -> Self {
        Self {
            table: Some(LockTable {
                entries: Mutex::new(HashMap::new()),
                released: Condvar::new(),
                monitoring_delay,
            }),
            next_holder: AtomicU64::new(1),
        }
    }

    /// A lock that never blocks.
    pub fn disabled() -> Self {
        Self {
            table: None,
            next_holder: AtomicU64::new(1),
        }
    }

    /// Returns `true` unless created with [`PathLock::disabled`].
    pub fn is_enabled(&self) -> bool {
        self.table.is_some()
    }

    fn token(&self, path: &Path, stale: Option<StaleLock>) -> LockToken {
        LockToken {
            path: path.to_path_buf(),
            holder: self.next_holder.fetch_add(1, Ordering::Relaxed),
            stale,
        }
    }

    /// Block until `path` is free or its holder is stale.
    pub fn acquire(&self, path: &Path) -> LockToken {
        let Some(table) = &self.table else {
            return self.token(path, None);
        };
        let mut entries = table.entries.lock();
        loop {
            let now = Instant::now();
            let stale = match entries.get(path).copied() {
                None => None,
                Some(entry) => {
                    let held_for = now.saturating_duration_since(entry.acquired_at);
                    if held_for < table.monitoring_delay {
                        let remaining = table.monitoring_delay - held_for;
                        table.released.wait_for(&mut entries, remaining);
                        continue;
                    }
                    warn!(
                        path = %path.display(),
                        holder = entry.holder,
                        held_ms = held_for.as_millis() as u64,
                        "reclaiming stale path lock"
                    );
                    Some(StaleLock {
                        previous_holder: entry.holder,
                        held_for,
                    })
                }
            };
            let token = self.token(path, stale);
            entries.insert(
                path.to_path_buf(),
                LockEntry {
                    holder: token.holder,
                    acquired_at: now,
                },
            );
            return token;
        }
    }

    /// Take the lock only if it is free.
    ///
    /// # Errors
    ///
    /// - [`FsError::LockContention`] if another holder has it
    pub fn try_acquire(&self, path: &Path) -> Result<LockToken, FsError> {
        let Some(table) = &self.table else {
            return Ok(self.token(path, None));
        };
        let mut entries = table.entries.lock();
        if entries.contains_key(path) {
            return Err(FsError::LockContention {
                path: path.to_path_buf(),
            });
        }
        let token = self.token(path, None);
        entries.insert(
            path.to_path_buf(),
            LockEntry {
                holder: token.holder,
                acquired_at: Instant::now(),
            },
        );
        Ok(token)
    }

    /// Give the lock back. A token whose lock was reclaimed releases nothing.
    pub fn release(&self, token: LockToken) {
        let Some(table) = &self.table else {
            return;
        };
        let mut entries = table.entries.lock();
        if entries
            .get(&token.path)
            .is_some_and(|e| e.holder == token.holder)
        {
            entries.remove(&token.path);
            table.released.notify_all();
        }
    }

    /// Run `f` holding the lock of `path`.
    pub fn with<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let token = self.acquire(path);
        let result = f();
        self.release(token);
        result
    }

    /// Run `f` holding the locks of both paths, taken in sorted order.
    pub fn with_pair<T>(&self, a: &Path, b: &Path, f: impl FnOnce() -> T) -> T {
        if a == b {
            return self.with(a, f);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.acquire(first);
        let second = self.acquire(second);
        let result = f();
        self.release(second);
        self.release(first);
        result
    }

    /// Number of paths currently held.
    pub fn held(&self) -> usize {
        self.table.as_ref().map_or(0, |t| t.entries.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn second_acquirer_waits_for_release() {
        let lock = Arc::new(PathLock::new(Duration::from_secs(600)));
        let token = lock.acquire(Path::new("/f"));
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let token = lock.acquire(Path::new("/f"));
                acquired.store(true, Ordering::SeqCst);
                assert!(token.stale().is_none());
                lock.release(token);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        lock.release(token);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(lock.held(), 0);
    }

    #[test]
    fn stale_holder_is_reclaimed_with_warning() {
        let lock = PathLock::new(Duration::from_millis(50));
        let stuck = lock.acquire(Path::new("/f"));

        let started = Instant::now();
        let token = lock.acquire(Path::new("/f"));
        assert!(started.elapsed() >= Duration::from_millis(40));
        let stale = token.stale().expect("reclaimed lock reports staleness");
        assert!(stale.held_for >= Duration::from_millis(50));

        lock.release(stuck);
        assert_eq!(lock.held(), 1, "late release of a reclaimed lock is a no-op");
        lock.release(token);
        assert_eq!(lock.held(), 0);
    }

    #[test]
    fn try_acquire_reports_contention() {
        let lock = PathLock::new(Duration::from_secs(600));
        let token = lock.try_acquire(Path::new("/f")).unwrap();
        let err = lock.try_acquire(Path::new("/f")).unwrap_err();
        assert!(matches!(err, FsError::LockContention { .. }));
        assert_eq!(err.errno(), libc::EAGAIN);
        assert!(lock.try_acquire(Path::new("/g")).is_ok());
        lock.release(token);
        assert!(lock.try_acquire(Path::new("/f")).is_ok());
    }

    #[test]
    fn disabled_lock_never_blocks() {
        let lock = PathLock::disabled();
        let a = lock.acquire(Path::new("/f"));
        let b = lock.try_acquire(Path::new("/f")).unwrap();
        assert_eq!(lock.held(), 0);
        lock.release(a);
        lock.release(b);
    }

    #[test]
    fn with_pair_locks_both_paths() {
        let lock = PathLock::new(Duration::from_secs(600));
        lock.with_pair(Path::new("/b"), Path::new("/a"), || {
            assert_eq!(lock.held(), 2);
            assert!(lock.try_acquire(Path::new("/a")).is_err());
        });
        assert_eq!(lock.held(), 0);
        lock.with_pair(Path::new("/a"), Path::new("/a"), || {
            assert_eq!(lock.held(), 1);
        });
    }
}
