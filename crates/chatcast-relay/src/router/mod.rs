//! Broadcast routing across live sessions.

pub mod forwarder;

pub use forwarder::{
    BroadcastPermit, Router, RouterCommand, RouterConfig, RouterError, RouterHandle,
    RouterSnapshot, RouterStats,
};
