//! TCP acceptor that turns each inbound connection into a session.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::router::RouterHandle;
use crate::session::{Session, SessionConfig, SessionId};

/// Listening socket plus what every new session needs.
pub struct RelayServer {
    listener: TcpListener,
    router: RouterHandle,
    session_config: SessionConfig,
}

impl RelayServer {
    /// Bind the listening socket. Failure here is fatal to the process.
    pub async fn bind(
        addr: SocketAddr,
        router: RouterHandle,
        session_config: SessionConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            router,
            session_config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips or its sender is dropped.
    ///
    /// A failed accept is logged and skipped; it never stops the loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(addr = ?self.listener.local_addr().ok(), "Accepting connections");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                _ = shutdown.changed() => {
                    info!("Acceptor shutting down");
                    return;
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let id = SessionId::new();
        let router = self.router.clone();
        let config = self.session_config.clone();

        tokio::spawn(async move {
            info!(session_id = %id, peer = %peer, "Connection established");
            match Session::register(id, peer.to_string(), stream, router, config).await {
                Ok(session) => {
                    session.run().await;
                }
                Err(e) => {
                    warn!(session_id = %id, peer = %peer, error = %e, "Failed to register session");
                }
            }
        });
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
