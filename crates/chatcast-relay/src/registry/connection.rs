//! In-memory registry of live sessions.
//!
//! Owned by the router task, so it needs no lock: every change happens on
//! that one task.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::session::{SessionHandle, SessionId, SessionInfo};

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapReason {
    /// The session flagged itself disconnected.
    Disconnected,
    /// Its delivery queue was full under the drop-and-reap policy.
    QueueFull,
    /// Its delivery queue has no receiver any more.
    Closed,
}

impl ReapReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// Live sessions keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. Returns `false` (and keeps the existing entry) if
    /// the id is already registered.
    pub fn register(&mut self, handle: SessionHandle) -> bool {
        if self.sessions.contains_key(&handle.id) {
            warn!(session_id = %handle.id, "Session already registered");
            return false;
        }
        info!(session_id = %handle.id, peer = %handle.peer, "Session registered");
        self.sessions.insert(handle.id, handle);
        true
    }

    /// Remove a session.
    pub fn reap(&mut self, id: &SessionId, reason: ReapReason) -> Option<SessionHandle> {
        let handle = self.sessions.remove(id);
        match &handle {
            Some(h) => {
                info!(session_id = %id, peer = %h.peer, reason = reason.as_str(), "Session reaped");
            }
            None => warn!(session_id = %id, "Tried to reap unknown session"),
        }
        handle
    }

    /// Ids of every session currently flagged disconnected.
    pub fn disconnected(&self) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|h| h.is_disconnected())
            .map(|h| h.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Describe every registered session.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.values().map(SessionHandle::info).collect();
        sessions.sort_by(|a, b| a.peer.cmp(&b.peer));
        sessions
    }
}
