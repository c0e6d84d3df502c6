//! Network-facing side of the relay: acceptor, echo mode, status reporting.

pub mod acceptor;
pub mod echo;
pub mod runtime;
pub mod status;

pub use acceptor::{RelayServer, ServerError};
pub use echo::EchoServer;
pub use runtime::RelayRuntime;
pub use status::{render_snapshot, spawn_status_reporter};
