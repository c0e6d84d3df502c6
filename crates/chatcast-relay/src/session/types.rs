//! Session identity, shared state flag and routed messages.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Process-unique session identifier, minted when a connection is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection state as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-way `Connected -> Disconnected` flag.
///
/// Written only by the owning session task, read by the router.
#[derive(Debug, Default)]
pub struct StateFlag {
    disconnected: AtomicBool,
}

impl StateFlag {
    pub fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub fn get(&self) -> ConnectionState {
        if self.is_disconnected() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        }
    }
}

/// A formatted line ready for transmission, tagged with its origin.
///
/// The payload is shared, so fanning a message out to N sessions costs N
/// reference-count bumps rather than N copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: SessionId,
    payload: Arc<[u8]>,
}

impl Message {
    pub fn new(origin: SessionId, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            origin,
            payload: payload.into(),
        }
    }

    /// `"<peer>: <bytes>"`
    pub fn chat(origin: SessionId, peer: &str, bytes: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(peer.len() + 2 + bytes.len());
        payload.extend_from_slice(peer.as_bytes());
        payload.extend_from_slice(b": ");
        payload.extend_from_slice(bytes);
        Self::new(origin, payload)
    }

    /// `"<peer> disconnected\n"`
    pub fn disconnected(origin: SessionId, peer: &str) -> Self {
        Self::new(origin, format!("{peer} disconnected\n").into_bytes())
    }

    pub const fn origin(&self) -> SessionId {
        self.origin
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Lossy text rendering for logs.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// The router's non-owning view of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Remote address, used as the message tag.
    pub peer: String,
    pub state: Arc<StateFlag>,
    /// Delivery queue drained by the session task.
    pub deliver_tx: mpsc::Sender<Message>,
}

impl SessionHandle {
    pub fn is_disconnected(&self) -> bool {
        self.state.is_disconnected()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            peer: self.peer.clone(),
            state: self.state.get(),
            queued: self.deliver_tx.max_capacity() - self.deliver_tx.capacity(),
        }
    }
}

/// Point-in-time description of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: String,
    pub state: ConnectionState,
    /// Messages waiting in the delivery queue.
    pub queued: usize,
}

/// Why a session task stopped.
#[derive(Debug, thiserror::Error)]
pub enum SessionEnd {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("evicted by router")]
    Evicted,

    #[error("router closed")]
    RouterClosed,
}
