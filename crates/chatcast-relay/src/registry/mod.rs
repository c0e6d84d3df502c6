//! Session registry owned by the router.

mod connection;

pub use connection::{ReapReason, SessionRegistry};
