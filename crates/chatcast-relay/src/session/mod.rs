//! Session lifecycle.
//!
//! Each accepted connection becomes one session task that owns the socket,
//! forwards what it reads to the router and writes what the router delivers.

mod handler;
mod types;

pub use handler::{Session, SessionConfig};
pub use types::{
    ConnectionState, Message, SessionEnd, SessionHandle, SessionId, SessionInfo, StateFlag,
};
