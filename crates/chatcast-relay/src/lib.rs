//! chatcast Relay Library
//!
//! Core functionality for the chatcast broadcast relay:
//! - Connection reader that turns socket reads into bounded events
//! - Session tasks that own one connection each
//! - Router that fans every message out and reaps dead sessions
//! - TCP acceptor, status reporter and echo mode

pub mod reader;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_helpers;
