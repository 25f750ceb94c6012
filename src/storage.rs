//! The innermost chain link.
//!
//! [`StorageFs`] turns a [`StorageBackend`] into an [`FsClient`]. Handle
//! writes become upload sessions: sequential bytes are cut into multipart
//! parts as they arrive and committed on flush, or collected for a single
//! put when the backend has no multipart upload. Backends with ranged puts
//! are written in place.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    Capabilities, DirEntry, FsClient, FsError, Handle, PartToken, StorageBackend, UploadId,
};

/// Lifecycle of an [`UploadSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting bytes.
    Open,
    /// Final part and commit in progress.
    Completing,
    /// Committed; the object is visible.
    Completed,
    /// A part failed; nothing was committed.
    Aborted,
}

#[derive(Debug)]
struct UploadedPart {
    range: Range<u64>,
    token: PartToken,
}

/// Bytes written through one handle and not yet committed.
///
/// The committed object is the existing bytes before `start_offset`, the
/// written bytes, then the existing bytes past `next_offset` up to
/// `object_end`.
#[derive(Debug)]
struct UploadSession {
    path: PathBuf,
    start_offset: u64,
    prefilled: bool,
    object_end: u64,
    next_offset: u64,
    pending: Vec<u8>,
    upload: Option<UploadId>,
    parts: Vec<UploadedPart>,
    state: SessionState,
}

impl UploadSession {
    fn new(path: &Path, start_offset: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            start_offset,
            prefilled: false,
            object_end: 0,
            next_offset: 0,
            pending: Vec::new(),
            upload: None,
            parts: Vec::new(),
            state: SessionState::Open,
        }
    }

    fn uploaded_bytes(&self) -> u64 {
        self.parts.last().map_or(0, |p| p.range.end)
    }
}

struct SessionSlot {
    path: PathBuf,
    session: Arc<Mutex<UploadSession>>,
}

#[derive(Default)]
struct SessionTable {
    open: HashMap<Handle, SessionSlot>,
    aborted: HashSet<Handle>,
}

/// Adapts a [`StorageBackend`] to the chain interface.
///
/// At most one open session exists per path; a second handle writing the
/// same path gets [`FsError::Conflict`] until the first flushes or releases.
pub struct StorageFs {
    backend: Arc<dyn StorageBackend>,
    chunk_size: u64,
    sessions: Mutex<SessionTable>,
}

impl StorageFs {
    /// Wrap `backend`. `chunk_size` is clamped into the backend's part limits.
    pub fn new(backend: Arc<dyn StorageBackend>, chunk_size: u64) -> Self {
        let chunk_size = match backend.multipart_bounds() {
            Some(bounds) => bounds.clamp(chunk_size),
            None => chunk_size.max(1),
        };
        Self {
            backend,
            chunk_size,
            sessions: Mutex::new(SessionTable::default()),
        }
    }

    /// Effective multipart part size.
    pub fn part_size(&self) -> u64 {
        self.chunk_size
    }

    /// State of the session `handle` is writing through, if any.
    pub fn session_state(&self, handle: Handle) -> Option<SessionState> {
        let table = self.sessions.lock();
        if table.aborted.contains(&handle) {
            return Some(SessionState::Aborted);
        }
        let session = table.open.get(&handle)?.session.clone();
        drop(table);
        let state = session.lock().state;
        Some(state)
    }

    fn check_writable(&self, operation: &'static str) -> Result<(), FsError> {
        if self.backend.is_read_only() {
            return Err(FsError::ReadOnly { operation });
        }
        Ok(())
    }

    fn session_for(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
    ) -> Result<Arc<Mutex<UploadSession>>, FsError> {
        let mut table = self.sessions.lock();
        if table.aborted.contains(&handle) {
            return Err(FsError::UploadAborted {
                path: path.to_path_buf(),
            });
        }
        if let Some(slot) = table.open.get(&handle) {
            return Ok(slot.session.clone());
        }
        if table.open.values().any(|slot| slot.path == path) {
            return Err(FsError::Conflict {
                path: path.to_path_buf(),
            });
        }
        let session = Arc::new(Mutex::new(UploadSession::new(path, offset)));
        table.open.insert(
            handle,
            SessionSlot {
                path: path.to_path_buf(),
                session: session.clone(),
            },
        );
        Ok(session)
    }

    fn open_session(&self, handle: Handle) -> Option<Arc<Mutex<UploadSession>>> {
        self.sessions
            .lock()
            .open
            .get(&handle)
            .map(|slot| slot.session.clone())
    }

    /// Carry over the existing bytes that precede the first write, zero
    /// filling past the end of the object.
    fn prefill(&self, session: &mut UploadSession) -> Result<(), FsError> {
        let object_size = match self.backend.stat(&session.path) {
            Ok(entry) if entry.is_file() => entry.size,
            Ok(_) | Err(FsError::NotFound { .. }) => 0,
            Err(e) => return Err(e),
        };
        session.object_end = object_size;
        session.prefilled = true;

        let keep = session.start_offset;
        self.copy_existing(session, 0, object_size.min(keep))?;
        let copied = session.next_offset;
        self.fill_zeros(session, keep)?;
        debug!(
            path = %session.path.display(),
            object_size,
            kept = copied,
            padded = keep - copied,
            "prefilled upload session"
        );
        Ok(())
    }

    /// Stream `[from, to)` of the existing object into the session one
    /// chunk at a time.
    fn copy_existing(&self, session: &mut UploadSession, from: u64, to: u64) -> Result<(), FsError> {
        let mut offset = from;
        while offset < to {
            let want = (to - offset).min(self.chunk_size) as usize;
            let data = self.backend.get_range(&session.path, offset, want)?;
            if data.is_empty() {
                break;
            }
            offset += data.len() as u64;
            self.push(session, &data)?;
        }
        Ok(())
    }

    fn fill_zeros(&self, session: &mut UploadSession, to: u64) -> Result<(), FsError> {
        if session.next_offset >= to {
            return Ok(());
        }
        let zeros = vec![0u8; (to - session.next_offset).min(self.chunk_size) as usize];
        while session.next_offset < to {
            let n = ((to - session.next_offset) as usize).min(zeros.len());
            self.push(session, &zeros[..n])?;
        }
        Ok(())
    }

    /// Append to the session, sending every full part.
    fn push(&self, session: &mut UploadSession, data: &[u8]) -> Result<(), FsError> {
        session.pending.extend_from_slice(data);
        session.next_offset += data.len() as u64;
        if self.backend.multipart_bounds().is_some() {
            let part = self.chunk_size as usize;
            while session.pending.len() >= part {
                self.upload_next_part(session, part)?;
            }
        }
        Ok(())
    }

    fn upload_next_part(&self, session: &mut UploadSession, len: usize) -> Result<(), FsError> {
        let upload = match &session.upload {
            Some(id) => id.clone(),
            None => {
                let id = self.backend.begin_multipart(&session.path)?;
                debug!(path = %session.path.display(), upload = %id.0, "began multipart upload");
                session.upload = Some(id.clone());
                id
            }
        };
        let index = session.parts.len() as u32;
        let start = session.uploaded_bytes();
        let data: Vec<u8> = session.pending.drain(..len).collect();
        match self.backend.upload_part(&upload, index, &data) {
            Ok(token) => {
                debug!(path = %session.path.display(), part = index, size = data.len(), "uploaded part");
                session.parts.push(UploadedPart {
                    range: start..start + data.len() as u64,
                    token,
                });
                Ok(())
            }
            Err(source) => Err(FsError::PartialUpload {
                path: session.path.clone(),
                part: index,
                source: Box::new(source),
            }),
        }
    }

    fn abort(&self, handle: Handle, session: &mut UploadSession) {
        session.state = SessionState::Aborted;
        session.pending.clear();
        if let Some(upload) = session.upload.take() {
            if let Err(e) = self.backend.abort_multipart(&upload) {
                warn!(path = %session.path.display(), upload = %upload.0, error = %e, "abort failed");
            }
        }
        let mut table = self.sessions.lock();
        table.open.remove(&handle);
        table.aborted.insert(handle);
    }

    fn complete(&self, session: &mut UploadSession) -> Result<(), FsError> {
        session.state = SessionState::Completing;
        let tail_start = session.next_offset;
        if session.object_end > tail_start {
            let tail_end = session.object_end;
            debug!(
                path = %session.path.display(),
                from = tail_start,
                to = tail_end,
                "keeping existing tail"
            );
            self.copy_existing(session, tail_start, tail_end)?;
        }
        let Some(upload) = session.upload.clone() else {
            self.backend.put(&session.path, &session.pending)?;
            debug!(path = %session.path.display(), size = session.pending.len(), "put object");
            session.pending.clear();
            session.state = SessionState::Completed;
            return Ok(());
        };
        if !session.pending.is_empty() {
            let len = session.pending.len();
            self.upload_next_part(session, len)?;
        }
        let tokens: Vec<PartToken> = session.parts.iter().map(|p| p.token.clone()).collect();
        self.backend.complete_multipart(&upload, &tokens)?;
        debug!(
            path = %session.path.display(),
            parts = tokens.len(),
            size = session.uploaded_bytes(),
            "completed multipart upload"
        );
        session.upload = None;
        session.state = SessionState::Completed;
        Ok(())
    }
}

impl FsClient for StorageFs {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_only: self.backend.is_read_only(),
            multipart: self.backend.multipart_bounds(),
            partial_overwrite: self.backend.supports_partial_overwrite(),
            truncate: self.backend.truncate_support(),
        }
    }

    fn attrs(&self, path: &Path) -> Result<Option<DirEntry>, FsError> {
        if path == Path::new("/") {
            return Ok(Some(DirEntry::dir("")));
        }
        match self.backend.stat(path) {
            Ok(entry) => Ok(Some(entry)),
            Err(FsError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        self.backend.list(path)
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable("mkdir")?;
        self.backend.mkdir(path)
    }

    fn rmdir(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable("rmdir")?;
        self.backend.delete(path)
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable("delete")?;
        self.backend.delete(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.check_writable("rename")?;
        self.backend.rename(from, to)
    }

    fn upload(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.check_writable("upload")?;
        self.backend.put(path, data)
    }

    fn download_range(
        &self,
        _handle: Handle,
        path: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        self.backend.get_range(path, offset, len)
    }

    fn upload_range(
        &self,
        handle: Handle,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<(), FsError> {
        self.check_writable("upload_range")?;
        if self.backend.supports_partial_overwrite() {
            return self.backend.put_range(path, offset, data);
        }

        let session = self.session_for(handle, path, offset)?;
        let mut session = session.lock();
        if session.state == SessionState::Aborted {
            return Err(FsError::UploadAborted {
                path: path.to_path_buf(),
            });
        }
        if !session.prefilled {
            if let Err(e) = self.prefill(&mut session) {
                self.abort(handle, &mut session);
                return Err(e);
            }
        }
        if offset != session.next_offset {
            return Err(FsError::unsupported(
                "upload_range",
                path,
                "object storage only accepts sequential writes",
            ));
        }

        if let Err(e) = self.push(&mut session, data) {
            warn!(path = %path.display(), error = %e, "part upload failed, aborting session");
            self.abort(handle, &mut session);
            return Err(e);
        }
        Ok(())
    }

    /// Truncating to the end of what `handle` has written so far drops the
    /// existing tail from the pending commit. Any other length commits
    /// first; only the current length and zero are realizable then.
    fn truncate(&self, handle: Handle, path: &Path, len: u64) -> Result<(), FsError> {
        self.check_writable("truncate")?;
        if let Some(session) = self.open_session(handle) {
            let mut session = session.lock();
            if session.state == SessionState::Open && session.next_offset == len {
                session.object_end = session.object_end.min(len);
                return Ok(());
            }
        }
        self.flush(handle, path)?;
        let current = self.attrs(path)?.map_or(0, |e| e.size);
        if current == len {
            return Ok(());
        }
        if len == 0 {
            return self.backend.put(path, &[]);
        }
        Err(FsError::unsupported(
            "truncate",
            path,
            "objects cannot be resized in place",
        ))
    }

    fn flush(&self, handle: Handle, path: &Path) -> Result<(), FsError> {
        let slot = {
            let mut table = self.sessions.lock();
            if table.aborted.contains(&handle) {
                return Err(FsError::UploadAborted {
                    path: path.to_path_buf(),
                });
            }
            table.open.remove(&handle)
        };
        let Some(slot) = slot else {
            return Ok(());
        };
        let mut session = slot.session.lock();
        if let Err(e) = self.complete(&mut session) {
            warn!(path = %session.path.display(), error = %e, "commit failed, aborting session");
            self.abort(handle, &mut session);
            return Err(e);
        }
        Ok(())
    }

    fn release(&self, handle: Handle, _path: &Path) -> Result<(), FsError> {
        let slot = {
            let mut table = self.sessions.lock();
            table.aborted.remove(&handle);
            table.open.remove(&handle)
        };
        if let Some(slot) = slot {
            let mut session = slot.session.lock();
            if let Some(upload) = session.upload.take() {
                debug!(path = %session.path.display(), upload = %upload.0, "discarding unflushed upload");
                self.backend.abort_multipart(&upload)?;
            }
            session.state = SessionState::Aborted;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("Storage({})", self.backend.name())
    }
}
