//! Standalone echo mode: every chunk is written straight back to its sender.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::acceptor::ServerError;

const ECHO_PREFIX: &[u8] = b"echo: ";

pub struct EchoServer {
    listener: TcpListener,
    buffer_size: usize,
}

impl EchoServer {
    pub async fn bind(addr: SocketAddr, buffer_size: usize) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            buffer_size,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(addr = ?self.listener.local_addr().ok(), "Echo server accepting connections");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let buffer_size = self.buffer_size;
                        tokio::spawn(async move {
                            info!(peer = %peer, "Connection established");
                            match echo_connection(stream, buffer_size).await {
                                Ok(()) => info!(peer = %peer, "Done handling connection"),
                                Err(e) => warn!(peer = %peer, error = %e, "Echo connection failed"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                _ = shutdown.changed() => {
                    info!("Echo server shutting down");
                    return;
                }
            }
        }
    }
}

/// Echo chunks back until the peer closes. EOF is a clean end.
pub async fn echo_connection<S>(mut stream: S, buffer_size: usize) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut reply = Vec::with_capacity(ECHO_PREFIX.len() + buffer_size);

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        debug!(bytes = n, "Echoing chunk");

        reply.clear();
        reply.extend_from_slice(ECHO_PREFIX);
        reply.extend_from_slice(&buf[..n]);
        stream.write_all(&reply).await?;
    }
}
