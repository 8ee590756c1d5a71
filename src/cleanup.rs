//! Periodic sweep: expires sessions past TTL, runs the upload assembler's
//! stale sweep, and checks global memory pressure.
//!
//! Grounded on the teacher's `main.rs` cleanup task: `tokio::spawn` a loop
//! around `tokio::time::interval`, calling a `cleanup_expired`-shaped method
//! on a cloned, shared state handle. Here the tick also drives the upload
//! assembler's sweep and the pressure check, and returns a report instead of
//! mutating connections directly — broadcasting `session:expired` is the
//! dispatcher's job, not the scheduler's.

use std::sync::Arc;

use tracing::warn;

use crate::config::RelayConfig;
use crate::store::{ConnectionId, MemoryStore};
use crate::upload::ChunkedUploadAssembler;

/// A session reclaimed by a cleanup tick, with its member set captured
/// *before* `DeleteSession` ran so the caller can still notify everyone who
/// was in the room — `MemoryStore` no longer has the session by the time the
/// caller gets this report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimedSession {
    pub id: String,
    pub members: Vec<ConnectionId>,
}

/// What a single tick found. Member lists are snapshotted before the
/// corresponding session is deleted, so the caller can still broadcast
/// `session:expired` to every affected connection.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_sessions: Vec<ReclaimedSession>,
    pub evicted_sessions: Vec<ReclaimedSession>,
    pub stale_uploads_dropped: usize,
    pub pressure_warning: bool,
}

pub struct CleanupScheduler {
    config: RelayConfig,
    store: Arc<MemoryStore>,
    uploads: Arc<ChunkedUploadAssembler>,
}

impl CleanupScheduler {
    pub fn new(config: RelayConfig, store: Arc<MemoryStore>, uploads: Arc<ChunkedUploadAssembler>) -> Self {
        Self { config, store, uploads }
    }

    /// Runs one sweep. Each reclaimed session's member list is captured
    /// before `DeleteSession` runs, so the caller can still broadcast
    /// `session:expired` to every connection that was in the room — by the
    /// time this method returns, the session itself is already gone from the
    /// store and can no longer answer `GetSession`.
    pub fn tick(&self, now: i64) -> CleanupReport {
        let mut report = CleanupReport::default();

        let expired_ids = self.store.expired_session_ids(now);
        report.expired_sessions = self.reclaim(&expired_ids);

        report.stale_uploads_dropped = self.uploads.sweep();

        let total = self.store.total_bytes() as f64;
        let budget = self.config.max_total_bytes as f64;
        let usage = if budget > 0.0 { total / budget } else { 0.0 };

        if usage >= self.config.critical_memory_threshold {
            let victim_ids = self.store.oldest_sessions(self.config.emergency_eviction_batch);
            report.evicted_sessions = self.reclaim(&victim_ids);
        } else if usage >= self.config.warning_memory_threshold {
            warn!(usage = usage, "memory usage above warning threshold");
            report.pressure_warning = true;
        }

        report
    }

    /// Snapshots each session's member set, then deletes it. Ids that no
    /// longer resolve (already reclaimed by a concurrent tick) are skipped.
    fn reclaim(&self, ids: &[String]) -> Vec<ReclaimedSession> {
        let mut reclaimed = Vec::with_capacity(ids.len());
        for id in ids {
            let members = self.store.peek_session(id).map(|s| s.members.into_iter().collect()).unwrap_or_default();
            self.store.delete_session(id);
            reclaimed.push(ReclaimedSession { id: id.clone(), members });
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, TestClock};
    use crate::store::FileRecord;
    use std::sync::Arc as StdArc;
    use uuid::Uuid;

    fn build(config: RelayConfig) -> (CleanupScheduler, StdArc<MemoryStore>, StdArc<ChunkedUploadAssembler>, TestClock) {
        let clock = TestClock::new(0);
        let store = StdArc::new(MemoryStore::new(config.clone(), StdArc::new(clock.clone())));
        let uploads = StdArc::new(ChunkedUploadAssembler::new(config.clone(), StdArc::new(clock.clone())));
        let scheduler = CleanupScheduler::new(config, store.clone(), uploads.clone());
        (scheduler, store, uploads, clock)
    }

    #[test]
    fn test_tick_expires_sessions_past_ttl() {
        let (scheduler, store, _uploads, clock) = build(RelayConfig::default());
        let session = store.create_session();
        let member = Uuid::new_v4();
        store.add_member(&session.id, member).unwrap();
        clock.advance_ms(RelayConfig::default().session_ttl_ms + 1);
        let report = scheduler.tick(clock.now_ms());
        assert_eq!(report.expired_sessions.len(), 1);
        assert_eq!(report.expired_sessions[0].id, session.id);
        assert_eq!(report.expired_sessions[0].members, vec![member]);
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_tick_sweeps_stale_uploads() {
        let (scheduler, store, uploads, clock) = build(RelayConfig::default());
        let session = store.create_session();
        uploads.start(&session.id, Uuid::new_v4(), "f".to_string(), "text/plain".to_string(), 1, 1).unwrap();
        clock.advance_ms(RelayConfig::default().stale_upload_threshold_ms + 1);
        let report = scheduler.tick(clock.now_ms());
        assert_eq!(report.stale_uploads_dropped, 1);
    }

    #[test]
    fn test_tick_evicts_oldest_under_critical_pressure() {
        let mut config = RelayConfig::default();
        config.max_total_bytes = 10;
        config.max_file_size_bytes = 10;
        config.critical_memory_threshold = 0.9;
        let (scheduler, store, _uploads, clock) = build(config);

        let session = store.create_session();
        store
            .add_file(
                &session.id,
                FileRecord {
                    id: "f1".to_string(),
                    payload: StdArc::new(vec![0u8; 9]),
                    mime_type: "application/octet-stream".to_string(),
                    filename: "big".to_string(),
                    uploaded_at: 0,
                    uploaded_by: Uuid::new_v4(),
                },
            )
            .unwrap();

        let member = Uuid::new_v4();
        store.add_member(&session.id, member).unwrap();

        let report = scheduler.tick(clock.now_ms());
        assert_eq!(report.evicted_sessions.len(), 1);
        assert_eq!(report.evicted_sessions[0].id, session.id);
        assert_eq!(report.evicted_sessions[0].members, vec![member]);
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_tick_warns_under_warning_pressure_without_evicting() {
        let mut config = RelayConfig::default();
        config.max_total_bytes = 10;
        config.max_file_size_bytes = 10;
        config.warning_memory_threshold = 0.5;
        config.critical_memory_threshold = 0.99;
        let (scheduler, store, _uploads, clock) = build(config);

        let session = store.create_session();
        store
            .add_file(
                &session.id,
                FileRecord {
                    id: "f1".to_string(),
                    payload: StdArc::new(vec![0u8; 6]),
                    mime_type: "application/octet-stream".to_string(),
                    filename: "mid".to_string(),
                    uploaded_at: 0,
                    uploaded_by: Uuid::new_v4(),
                },
            )
            .unwrap();

        let report = scheduler.tick(clock.now_ms());
        assert!(report.pressure_warning);
        assert!(report.evicted_sessions.is_empty());
        assert_eq!(store.session_count(), 1);
    }
}
