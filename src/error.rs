//! Closed error type for the relay.
//!
//! One variant per failure the wire protocol can name. Every error carries a
//! machine-readable `code()` tag and a human `message()` string; the
//! dispatcher is the only place that turns one into an `ack` or `error`
//! frame, mirroring how the teacher keeps `Error` free of transport concerns.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("session not found")]
    SessionNotFound,

    #[error("session has expired")]
    SessionExpired,

    #[error("invalid session code")]
    InvalidSessionCode,

    #[error("file not found")]
    FileNotFound,

    #[error("file payload is empty")]
    EmptyFile,

    #[error("message not found")]
    MessageNotFound,

    #[error("not authorized to delete this message")]
    Forbidden,

    #[error("invalid file id")]
    InvalidFileId,

    #[error("upload not found")]
    UploadNotFound,

    #[error("upload already completed")]
    UploadAlreadyCompleted,

    #[error("chunk index {index} out of range for {total} declared chunks")]
    ChunkIndexOutOfRange { index: u32, total: u32 },

    #[error("duplicate chunk at index {0}")]
    DuplicateChunk(u32),

    #[error("upload incomplete: missing {missing} of {total} chunks")]
    UploadIncomplete { missing: u32, total: u32 },

    #[error("chunk {0} missing at assembly time")]
    MissingChunk(u32),

    #[error("assembled size {actual} does not match declared size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("file exceeds per-file size limit of {limit} bytes")]
    FileTooLarge { limit: u64 },

    #[error("session file count limit of {limit} reached")]
    SessionFileLimitReached { limit: usize },

    #[error("session message count limit of {limit} reached")]
    SessionMessageLimitReached { limit: usize },

    #[error("global storage budget exhausted")]
    StorageBudgetExhausted,

    #[error("too many concurrent uploads for this session")]
    TooManyConcurrentUploads,

    #[error("message payload is empty")]
    EmptyMessage,

    #[error("message exceeds maximum length")]
    MessageTooLong,

    #[error("not joined to a session")]
    NotJoined,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Stable, machine-readable tag used in the `error` wire message and in
    /// logs. Kept separate from the `Display` text so clients can branch on
    /// it without string-matching human prose.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::SessionNotFound => "SESSION_NOT_FOUND",
            RelayError::SessionExpired => "SESSION_EXPIRED",
            RelayError::InvalidSessionCode => "INVALID_SESSION_CODE",
            RelayError::FileNotFound => "FILE_NOT_FOUND",
            RelayError::EmptyFile => "EMPTY_FILE",
            RelayError::MessageNotFound => "MESSAGE_NOT_FOUND",
            RelayError::Forbidden => "FORBIDDEN",
            RelayError::InvalidFileId => "INVALID_FILE_ID",
            RelayError::UploadNotFound => "UPLOAD_NOT_FOUND",
            RelayError::UploadAlreadyCompleted => "UPLOAD_ALREADY_COMPLETED",
            RelayError::ChunkIndexOutOfRange { .. } => "CHUNK_INDEX_OUT_OF_RANGE",
            RelayError::DuplicateChunk(_) => "DUPLICATE_CHUNK",
            RelayError::UploadIncomplete { .. } => "UPLOAD_INCOMPLETE",
            RelayError::MissingChunk(_) => "MISSING_CHUNK",
            RelayError::SizeMismatch { .. } => "SIZE_MISMATCH",
            RelayError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            RelayError::SessionFileLimitReached { .. } => "SESSION_FILE_LIMIT_REACHED",
            RelayError::SessionMessageLimitReached { .. } => "SESSION_MESSAGE_LIMIT_REACHED",
            RelayError::StorageBudgetExhausted => "STORAGE_BUDGET_EXHAUSTED",
            RelayError::TooManyConcurrentUploads => "TOO_MANY_CONCURRENT_UPLOADS",
            RelayError::EmptyMessage => "EMPTY_MESSAGE",
            RelayError::MessageTooLong => "MESSAGE_TOO_LONG",
            RelayError::NotJoined => "NOT_JOINED",
            RelayError::MalformedRequest(_) => "MALFORMED_REQUEST",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Human-readable message suitable for surfacing to a client.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether the caller can retry the same request unmodified and expect a
    /// different outcome (e.g. after waiting), as opposed to errors that
    /// require changing the request itself.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::StorageBudgetExhausted | RelayError::TooManyConcurrentUploads
        )
    }
}
