//! Shared, clonable handle to everything a connection task needs.
//!
//! Grounded on the teacher's `RelayState`: an `Arc<DashMap<Did, Sender>>` of
//! outbound channels plus the data tables, cloned cheaply into every spawned
//! connection task and the cleanup task. Here the outbound table is keyed by
//! connection id instead of DID, and session membership (who to broadcast
//! to) is resolved through the `MemoryStore` rather than a separate presence
//! map.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::protocol::ServerMessage;
use crate::store::{ConnectionId, MemoryStore};
use crate::upload::ChunkedUploadAssembler;

#[derive(Clone)]
pub struct RelayState {
    pub config: RelayConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<MemoryStore>,
    pub uploads: Arc<ChunkedUploadAssembler>,
    outbound: Arc<DashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl RelayState {
    pub fn new(config: RelayConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(MemoryStore::new(config.clone(), clock.clone()));
        let uploads = Arc::new(ChunkedUploadAssembler::new(config.clone(), clock.clone()));
        Self {
            config,
            clock,
            store,
            uploads,
            outbound: Arc::new(DashMap::new()),
        }
    }

    pub fn register_connection(&self, id: ConnectionId, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.outbound.insert(id, tx);
    }

    pub fn unregister_connection(&self, id: ConnectionId) {
        self.outbound.remove(&id);
    }

    pub fn send_to(&self, id: ConnectionId, msg: ServerMessage) {
        if let Some(tx) = self.outbound.get(&id) {
            if tx.send(msg).is_err() {
                warn!(connection = %id, "outbound channel closed, dropping message");
            }
        }
    }

    /// Delivers `msg` to every current member of `session_id`, optionally
    /// skipping one connection (typically the requester, who gets an ack
    /// instead). Best-effort: disconnected members are silently skipped.
    pub fn broadcast_to_session(&self, session_id: &str, msg: ServerMessage, exclude: Option<ConnectionId>) {
        let Ok(session) = self.store.get_session(session_id) else {
            return;
        };
        for member in session.members {
            if Some(member) == exclude {
                continue;
            }
            self.send_to(member, msg.clone());
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }
}
