/*!
 * Core data types shared across the chunker, hash pipeline, upload queue,
 * and controller.
 */

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

/// A contiguous, non-overlapping slice of the source file.
///
/// Chunks form a strictly increasing, gapless cover of `[0, file_size)`.
/// `hash` starts empty and is filled in exactly once by the Hash Pipeline;
/// after that it is immutable.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub index: u64,
    pub start: u64,
    pub end: u64,
    /// Shared handle to the already-open source file; reading the byte range
    /// is a zero-copy view, not a buffered duplicate of the file contents.
    pub(crate) source: Arc<std::fs::File>,
    pub hash: Option<String>,
}

impl ChunkDescriptor {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    /// Read this chunk's bytes from the source file. Cheap relative to the
    /// network operations the bytes feed into, but not free — this is the
    /// point where the "view, not a copy" descriptor actually touches disk.
    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        use std::io::Read;
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            let mut buf = vec![0u8; self.size() as usize];
            self.source.read_exact_at(&mut buf, self.start)?;
            Ok(buf)
        }
        #[cfg(not(unix))]
        {
            use std::io::Seek;
            let mut file = self.source.try_clone()?;
            file.seek(std::io::SeekFrom::Start(self.start))?;
            let mut buf = vec![0u8; self.size() as usize];
            file.read_exact(&mut buf)?;
            Ok(buf)
        }
    }

    pub fn with_hash(&self, hash: String) -> Self {
        Self {
            index: self.index,
            start: self.start,
            end: self.end,
            source: self.source.clone(),
            hash: Some(hash),
        }
    }
}

/// Status of an upload task. Transitions only ever go
/// `Pending -> InFlight -> (Completed | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// One unit of work in the Upload Queue: a hashed chunk plus its current
/// status and, if it failed, the error that caused the failure.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub task_id: String,
    pub chunk: ChunkDescriptor,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl UploadTask {
    pub fn new(chunk: ChunkDescriptor) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            chunk,
            status: TaskStatus::Pending,
            error: None,
        }
    }
}

/// A point-in-time snapshot of the Upload Queue's internal bookkeeping.
///
/// Invariant, checked continuously in tests: `pending + in_flight +
/// completed + failed == total_chunks`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total_chunks: u64,
    pub pending: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub all_chunks_hashed: bool,
}

/// The server-side logical upload this Controller run is driving.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub chunk_count: u64,
    pub file_hash: Option<String>,
    pub uploaded_bytes: u64,
    pub server_has_file: bool,
}

impl Session {
    pub fn new(token: String, file_name: String, file_type: String, file_size: u64, chunk_count: u64) -> Self {
        Self {
            token,
            file_name,
            file_type,
            file_size,
            chunk_count,
            file_hash: None,
            uploaded_bytes: 0,
            server_has_file: false,
        }
    }
}

/// Metadata describing the file being uploaded, derived from its path and
/// size. Used to build the session-creation request.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
}

impl FileMeta {
    pub fn from_path(path: &Path, file_size: u64) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let file_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            file_name,
            file_type,
            file_size,
        }
    }
}
