//! Chunked upload assembly.
//!
//! A per-upload state machine: `Start` opens an entry, `Chunk` accepts
//! out-of-order pieces idempotently, `Complete` concatenates them in
//! ascending order and verifies the declared size, `Cancel`/the stale sweep
//! tear it down. Styled after the teacher's `chunk_file`/`reassemble_file` in
//! `umbra-core`'s chunking module, minus content-addressed hashing — this
//! wire only promises byte-for-byte round trip, not integrity verification.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::ids;
use crate::store::ConnectionId;

#[derive(Debug, Clone)]
pub struct UploadState {
    pub upload_id: String,
    pub session_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub total_chunks: u32,
    pub chunks: HashMap<u32, Vec<u8>>,
    pub received_count: u32,
    pub started_at: i64,
    pub last_activity_at: i64,
    pub completed: bool,
    pub uploaded_by: ConnectionId,
}

impl UploadState {
    fn is_complete(&self) -> bool {
        self.received_count >= self.total_chunks
    }
}

/// Result of [`ChunkedUploadAssembler::complete`]: the assembled payload
/// plus the declared metadata the caller forwards into `MemoryStore::add_file`.
pub struct AssembledUpload {
    pub payload: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

pub struct ChunkedUploadAssembler {
    config: RelayConfig,
    clock: Arc<dyn Clock>,
    uploads: Arc<DashMap<String, UploadState>>,
}

impl ChunkedUploadAssembler {
    pub fn new(config: RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, uploads: Arc::new(DashMap::new()) }
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    fn open_upload_count(&self, session_id: &str) -> usize {
        self.uploads
            .iter()
            .filter(|u| u.session_id == session_id && !u.completed)
            .count()
    }

    pub fn start(
        &self,
        session_id: &str,
        uploaded_by: ConnectionId,
        filename: String,
        mime_type: String,
        size: u64,
        total_chunks: u32,
    ) -> Result<String, RelayError> {
        if size > self.config.max_file_size_bytes {
            return Err(RelayError::FileTooLarge { limit: self.config.max_file_size_bytes });
        }
        if self.open_upload_count(session_id) >= self.config.max_concurrent_uploads_per_session {
            return Err(RelayError::TooManyConcurrentUploads);
        }

        let upload_id = ids::new_upload_id();
        let now = self.now();
        self.uploads.insert(
            upload_id.clone(),
            UploadState {
                upload_id: upload_id.clone(),
                session_id: session_id.to_string(),
                filename,
                mime_type,
                size,
                total_chunks,
                chunks: HashMap::new(),
                received_count: 0,
                started_at: now,
                last_activity_at: now,
                completed: false,
                uploaded_by,
            },
        );
        Ok(upload_id)
    }

    /// Returns `(received_count, total_chunks, is_complete, duplicate)`.
    pub fn chunk(&self, upload_id: &str, index: u32, bytes: Vec<u8>) -> Result<(u32, u32, bool, bool), RelayError> {
        let mut upload = self.uploads.get_mut(upload_id).ok_or(RelayError::UploadNotFound)?;
        if upload.completed {
            return Err(RelayError::UploadAlreadyCompleted);
        }
        if index >= upload.total_chunks {
            return Err(RelayError::ChunkIndexOutOfRange { index, total: upload.total_chunks });
        }

        let duplicate = upload.chunks.contains_key(&index);
        if !duplicate {
            upload.chunks.insert(index, bytes);
            upload.received_count += 1;
        }
        upload.last_activity_at = self.now();
        let is_complete = upload.is_complete();
        Ok((upload.received_count, upload.total_chunks, is_complete, duplicate))
    }

    pub fn complete(&self, upload_id: &str) -> Result<AssembledUpload, RelayError> {
        let mut upload = self.uploads.get_mut(upload_id).ok_or(RelayError::UploadNotFound)?;
        if upload.received_count != upload.total_chunks {
            return Err(RelayError::UploadIncomplete {
                missing: upload.total_chunks - upload.received_count,
                total: upload.total_chunks,
            });
        }

        let mut payload = Vec::with_capacity(upload.size as usize);
        for index in 0..upload.total_chunks {
            match upload.chunks.get(&index) {
                Some(bytes) => payload.extend_from_slice(bytes),
                None => return Err(RelayError::MissingChunk(index)),
            }
        }

        let actual = payload.len() as u64;
        if actual != upload.size {
            return Err(RelayError::SizeMismatch { expected: upload.size, actual });
        }

        upload.completed = true;
        upload.chunks.clear();
        let result = AssembledUpload {
            payload,
            filename: upload.filename.clone(),
            mime_type: upload.mime_type.clone(),
            size: upload.size,
        };
        Ok(result)
    }

    pub fn cancel(&self, upload_id: &str) -> bool {
        self.uploads.remove(upload_id).is_some()
    }

    /// Drops uploads that went silent for too long, and completed uploads
    /// past their retention window (see `COMPLETED_UPLOAD_RETENTION_MS`).
    pub fn sweep(&self) -> usize {
        let now = self.now();
        let stale: Vec<String> = self
            .uploads
            .iter()
            .filter(|u| {
                if u.completed {
                    now - u.last_activity_at > crate::config::COMPLETED_UPLOAD_RETENTION_MS
                } else {
                    now - u.last_activity_at > self.config.stale_upload_threshold_ms
                }
            })
            .map(|u| u.upload_id.clone())
            .collect();
        for id in &stale {
            self.uploads.remove(id);
        }
        stale.len()
    }

    pub fn session_of(&self, upload_id: &str) -> Option<String> {
        self.uploads.get(upload_id).map(|u| u.session_id.clone())
    }

    pub fn open_count(&self) -> usize {
        self.uploads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use uuid::Uuid;

    fn assembler() -> (ChunkedUploadAssembler, TestClock) {
        let clock = TestClock::new(1_000_000);
        let assembler = ChunkedUploadAssembler::new(RelayConfig::default(), Arc::new(clock.clone()));
        (assembler, clock)
    }

    #[test]
    fn test_start_then_complete_happy_path() {
        let (assembler, _clock) = assembler();
        let conn = Uuid::new_v4();
        let upload_id = assembler
            .start("AB2DE", conn, "hello.txt".to_string(), "text/plain".to_string(), 5, 2)
            .unwrap();

        let (received, total, complete, dup) = assembler.chunk(&upload_id, 1, b"llo".to_vec()).unwrap();
        assert_eq!((received, total, complete, dup), (1, 2, false, false));

        let (received, total, complete, dup) = assembler.chunk(&upload_id, 0, b"he".to_vec()).unwrap();
        assert_eq!((received, total, complete, dup), (2, 2, true, false));

        let assembled = assembler.complete(&upload_id).unwrap();
        assert_eq!(assembled.payload, b"hello");
        assert_eq!(assembled.size, 5);
    }

    #[test]
    fn test_chunks_accepted_out_of_order() {
        let (assembler, _clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "application/octet-stream".to_string(), 6, 3)
            .unwrap();
        assembler.chunk(&upload_id, 2, b"gh".to_vec()).unwrap();
        assembler.chunk(&upload_id, 0, b"ab".to_vec()).unwrap();
        assembler.chunk(&upload_id, 1, b"cd".to_vec()).unwrap();
        let assembled = assembler.complete(&upload_id).unwrap();
        assert_eq!(assembled.payload, b"abcdgh");
    }

    #[test]
    fn test_duplicate_chunk_is_idempotent() {
        let (assembler, _clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 2, 1)
            .unwrap();
        let (r1, _, _, dup1) = assembler.chunk(&upload_id, 0, b"ab".to_vec()).unwrap();
        let (r2, _, _, dup2) = assembler.chunk(&upload_id, 0, b"zz".to_vec()).unwrap();
        assert_eq!(r1, 1);
        assert_eq!(r2, 1);
        assert!(!dup1);
        assert!(dup2);
        // the original bytes win, not the duplicate resend
        let assembled = assembler.complete(&upload_id).unwrap();
        assert_eq!(assembled.payload, b"ab");
    }

    #[test]
    fn test_chunk_index_out_of_range() {
        let (assembler, _clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 2, 1)
            .unwrap();
        let err = assembler.chunk(&upload_id, 5, b"ab".to_vec()).unwrap_err();
        assert_eq!(err, RelayError::ChunkIndexOutOfRange { index: 5, total: 1 });
    }

    #[test]
    fn test_complete_before_all_chunks_fails() {
        let (assembler, _clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 4, 2)
            .unwrap();
        assembler.chunk(&upload_id, 0, b"ab".to_vec()).unwrap();
        assert!(assembler.complete(&upload_id).is_err());
    }

    #[test]
    fn test_size_mismatch_detected() {
        let (assembler, _clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 10, 1)
            .unwrap();
        assembler.chunk(&upload_id, 0, b"short".to_vec()).unwrap();
        let err = assembler.complete(&upload_id).unwrap_err();
        assert_eq!(err, RelayError::SizeMismatch { expected: 10, actual: 5 });
    }

    #[test]
    fn test_too_many_concurrent_uploads() {
        let mut config = RelayConfig::default();
        config.max_concurrent_uploads_per_session = 1;
        let assembler = ChunkedUploadAssembler::new(config, Arc::new(TestClock::new(0)));
        assembler.start("AB2DE", Uuid::new_v4(), "a".to_string(), "text/plain".to_string(), 1, 1).unwrap();
        let err = assembler
            .start("AB2DE", Uuid::new_v4(), "b".to_string(), "text/plain".to_string(), 1, 1)
            .unwrap_err();
        assert_eq!(err, RelayError::TooManyConcurrentUploads);
    }

    #[test]
    fn test_cancel_drops_state() {
        let (assembler, _clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 1, 1)
            .unwrap();
        assert!(assembler.cancel(&upload_id));
        assert_eq!(assembler.chunk(&upload_id, 0, b"a".to_vec()).unwrap_err(), RelayError::UploadNotFound);
    }

    #[test]
    fn test_stale_upload_swept() {
        let (assembler, clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 1, 1)
            .unwrap();
        clock.advance_ms(RelayConfig::default().stale_upload_threshold_ms + 1);
        let swept = assembler.sweep();
        assert_eq!(swept, 1);
        assert_eq!(assembler.chunk(&upload_id, 0, b"a".to_vec()).unwrap_err(), RelayError::UploadNotFound);
    }

    #[test]
    fn test_chunk_after_complete_rejected() {
        let (assembler, _clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 1, 1)
            .unwrap();
        assembler.chunk(&upload_id, 0, b"a".to_vec()).unwrap();
        assembler.complete(&upload_id).unwrap();
        let err = assembler.chunk(&upload_id, 0, b"a".to_vec()).unwrap_err();
        assert_eq!(err, RelayError::UploadAlreadyCompleted);
    }

    #[test]
    fn test_completed_upload_retained_then_swept() {
        let (assembler, clock) = assembler();
        let upload_id = assembler
            .start("AB2DE", Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 1, 1)
            .unwrap();
        assembler.chunk(&upload_id, 0, b"a".to_vec()).unwrap();
        assembler.complete(&upload_id).unwrap();

        // immediately after completion, a retry still resolves (no-op sweep)
        assert_eq!(assembler.sweep(), 0);

        clock.advance_ms(crate::config::COMPLETED_UPLOAD_RETENTION_MS + 1);
        assert_eq!(assembler.sweep(), 1);
    }
}
