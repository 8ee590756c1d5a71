//! In-memory session store.
//!
//! Grounded on the teacher's `state.rs`: rather than one giant
//! `Mutex<HashMap<...>>`, each logical table gets its own `Arc<DashMap<K, V>>`
//! (`sessions`, `connection_to_session`), with an `AtomicU64` for
//! `total_bytes`. DashMap's own per-shard locking stands in for the
//! per-session write lock the design calls for, so these methods stay plain
//! synchronous functions exactly like `RelayState::register_client` and
//! friends — no `tokio::sync::RwLock` wrapper needed around `Session` itself.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::ids;

/// Opaque per-connection identifier, minted once when a WebSocket opens.
pub type ConnectionId = Uuid;

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub payload: Arc<Vec<u8>>,
    pub mime_type: String,
    pub filename: String,
    pub uploaded_at: i64,
    pub uploaded_by: ConnectionId,
}

impl FileRecord {
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub content: String,
    pub sent_by: ConnectionId,
    pub sent_by_name: String,
    pub sent_at: i64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub files: Vec<FileRecord>,
    pub messages: Vec<MessageRecord>,
    pub members: HashSet<ConnectionId>,
    pub creator: Option<ConnectionId>,
}

impl Session {
    fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    fn file_bytes_total(&self) -> u64 {
        self.files.iter().map(FileRecord::size).sum()
    }
}

/// Process-wide owner of every session's bytes.
pub struct MemoryStore {
    config: RelayConfig,
    clock: Arc<dyn Clock>,
    sessions: Arc<DashMap<String, Session>>,
    connection_to_session: Arc<DashMap<ConnectionId, String>>,
    total_bytes: AtomicU64,
}

impl MemoryStore {
    pub fn new(config: RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            sessions: Arc::new(DashMap::new()),
            connection_to_session: Arc::new(DashMap::new()),
            total_bytes: AtomicU64::new(0),
        }
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Generates a fresh, non-colliding 5-character code.
    fn fresh_session_id(&self) -> String {
        loop {
            let candidate = ids::new_session_code();
            if !self.sessions.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn create_session(&self) -> Session {
        let id = self.fresh_session_id();
        let now = self.now();
        let session = Session {
            id: id.clone(),
            created_at: now,
            expires_at: now + self.config.session_ttl_ms,
            files: Vec::new(),
            messages: Vec::new(),
            members: HashSet::new(),
            creator: None,
        };
        self.sessions.insert(id, session.clone());
        session
    }

    /// Case-insensitive lookup that does not check or enforce TTL expiry —
    /// for callers (the cleanup scheduler) that need a session's last state,
    /// including its member set, right before deleting it themselves.
    pub fn peek_session(&self, id: &str) -> Option<Session> {
        let canonical = ids::canonical_session_code(id);
        self.sessions.get(&canonical).map(|s| s.clone())
    }

    /// Case-insensitive lookup; transparently evicts and reports `NotFound`
    /// if the session has expired since the last access.
    pub fn get_session(&self, id: &str) -> Result<Session, RelayError> {
        let canonical = ids::canonical_session_code(id);
        let now = self.now();
        let expired = self
            .sessions
            .get(&canonical)
            .map(|s| s.is_expired(now))
            .unwrap_or(false);
        if expired {
            self.delete_session(&canonical);
            return Err(RelayError::SessionNotFound);
        }
        self.sessions
            .get(&canonical)
            .map(|s| s.clone())
            .ok_or(RelayError::SessionNotFound)
    }

    /// Idempotent; replaces any prior binding for this connection.
    pub fn add_member(&self, session_id: &str, connection_id: ConnectionId) -> Result<usize, RelayError> {
        let canonical = ids::canonical_session_code(session_id);
        let now = self.now();
        let mut entry = self
            .sessions
            .get_mut(&canonical)
            .ok_or(RelayError::SessionNotFound)?;
        if entry.is_expired(now) {
            drop(entry);
            self.delete_session(&canonical);
            return Err(RelayError::SessionNotFound);
        }
        if entry.creator.is_none() {
            entry.creator = Some(connection_id);
        }
        entry.members.insert(connection_id);
        let count = entry.members.len();
        drop(entry);
        self.connection_to_session.insert(connection_id, canonical);
        Ok(count)
    }

    /// Returns the session the connection was bound to, if any, along with
    /// the remaining member count. Safe to call for an unknown connection.
    pub fn remove_member(&self, connection_id: ConnectionId) -> Option<(String, usize)> {
        let (_, session_id) = self.connection_to_session.remove(&connection_id)?;
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.members.remove(&connection_id);
            if session.creator == Some(connection_id) {
                session.creator = None;
            }
            let count = session.members.len();
            return Some((session_id, count));
        }
        None
    }

    pub fn add_file(&self, session_id: &str, record: FileRecord) -> Result<FileRecord, RelayError> {
        let canonical = ids::canonical_session_code(session_id);
        let size = record.size();
        if size == 0 {
            return Err(RelayError::EmptyFile);
        }
        if size > self.config.max_file_size_bytes {
            return Err(RelayError::FileTooLarge { limit: self.config.max_file_size_bytes });
        }

        let now = self.now();
        let mut entry = self
            .sessions
            .get_mut(&canonical)
            .ok_or(RelayError::SessionNotFound)?;
        if entry.is_expired(now) {
            drop(entry);
            self.delete_session(&canonical);
            return Err(RelayError::SessionExpired);
        }
        if entry.files.len() >= self.config.max_files_per_session {
            return Err(RelayError::SessionFileLimitReached { limit: self.config.max_files_per_session });
        }

        let current_total = self.total_bytes.load(Ordering::SeqCst);
        if current_total.saturating_add(size) > self.config.max_total_bytes {
            return Err(RelayError::StorageBudgetExhausted);
        }

        entry.files.push(record.clone());
        drop(entry);
        self.total_bytes.fetch_add(size, Ordering::SeqCst);
        Ok(record)
    }

    pub fn get_file_metadata(&self, session_id: &str, file_id: &str) -> Result<FileRecord, RelayError> {
        let session = self.get_session(session_id)?;
        session
            .files
            .iter()
            .find(|f| f.id == file_id)
            .cloned()
            .ok_or(RelayError::FileNotFound)
    }

    pub fn get_file_payload(&self, session_id: &str, file_id: &str) -> Result<Arc<Vec<u8>>, RelayError> {
        self.get_file_metadata(session_id, file_id).map(|f| f.payload)
    }

    pub fn list_files(&self, session_id: &str) -> Result<Vec<FileRecord>, RelayError> {
        self.get_session(session_id).map(|s| s.files)
    }

    pub fn delete_file(&self, session_id: &str, file_id: &str) -> Result<bool, RelayError> {
        let canonical = ids::canonical_session_code(session_id);
        let mut entry = self
            .sessions
            .get_mut(&canonical)
            .ok_or(RelayError::SessionNotFound)?;
        let before = entry.files.len();
        let freed: u64 = entry
            .files
            .iter()
            .filter(|f| f.id == file_id)
            .map(FileRecord::size)
            .sum();
        entry.files.retain(|f| f.id != file_id);
        let removed = entry.files.len() != before;
        drop(entry);
        if removed && freed > 0 {
            self.total_bytes.fetch_sub(freed, Ordering::SeqCst);
        }
        Ok(removed)
    }

    pub fn add_message(&self, session_id: &str, record: MessageRecord) -> Result<MessageRecord, RelayError> {
        let trimmed = record.content.trim();
        if trimmed.is_empty() {
            return Err(RelayError::EmptyMessage);
        }
        if trimmed.chars().count() > 10_000 {
            return Err(RelayError::MessageTooLong);
        }

        let canonical = ids::canonical_session_code(session_id);
        let now = self.now();
        let mut entry = self
            .sessions
            .get_mut(&canonical)
            .ok_or(RelayError::SessionNotFound)?;
        if entry.is_expired(now) {
            drop(entry);
            self.delete_session(&canonical);
            return Err(RelayError::SessionExpired);
        }
        if entry.messages.len() >= self.config.max_messages_per_session {
            return Err(RelayError::SessionMessageLimitReached { limit: self.config.max_messages_per_session });
        }

        let mut stored = record;
        stored.content = trimmed.to_string();
        entry.messages.push(stored.clone());
        Ok(stored)
    }

    /// Allowed iff `caller` sent the message or is the session creator. If
    /// the creator has left and the session no longer remembers one, this
    /// falls back to sender-only authorization. Returns `Forbidden` rather
    /// than a membership error, since the caller has already proven
    /// membership to reach this call.
    pub fn delete_message(
        &self,
        session_id: &str,
        message_id: &str,
        caller: ConnectionId,
    ) -> Result<bool, RelayError> {
        let canonical = ids::canonical_session_code(session_id);
        let mut entry = self
            .sessions
            .get_mut(&canonical)
            .ok_or(RelayError::SessionNotFound)?;
        let creator = entry.creator;
        let message = entry
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .ok_or(RelayError::MessageNotFound)?;
        let authorized = message.sent_by == caller || creator == Some(caller);
        if !authorized {
            return Err(RelayError::Forbidden);
        }
        let before = entry.messages.len();
        entry.messages.retain(|m| m.id != message_id);
        Ok(entry.messages.len() != before)
    }

    /// Frees all payload bytes, drops the message list, and unbinds every
    /// member. Returns `false` if the session did not exist.
    pub fn delete_session(&self, session_id: &str) -> bool {
        let canonical = ids::canonical_session_code(session_id);
        if let Some((_, session)) = self.sessions.remove(&canonical) {
            let freed = session.file_bytes_total();
            if freed > 0 {
                self.total_bytes.fetch_sub(freed, Ordering::SeqCst);
            }
            for member in session.members {
                self.connection_to_session.remove(&member);
            }
            true
        } else {
            false
        }
    }

    pub fn expired_session_ids(&self, now: i64) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Returns the `n` oldest sessions by `created_at`, for emergency
    /// eviction under memory pressure.
    pub fn oldest_sessions(&self, n: usize) -> Vec<String> {
        let mut all: Vec<(String, i64)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.created_at))
            .collect();
        all.sort_by_key(|(_, created_at)| *created_at);
        all.into_iter().take(n).map(|(id, _)| id).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn file_count(&self) -> usize {
        self.sessions.iter().map(|s| s.files.len()).sum()
    }

    pub fn session_of_connection(&self, connection_id: ConnectionId) -> Option<String> {
        self.connection_to_session.get(&connection_id).map(|s| s.clone())
    }

    pub fn member_count(&self, session_id: &str) -> Result<usize, RelayError> {
        self.get_session(session_id).map(|s| s.members.len())
    }
}
