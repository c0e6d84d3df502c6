//! Per-connection session task.
//!
//! A session bridges its reader's events into router broadcasts and the
//! router's deliveries into socket writes. It ends on the first read failure,
//! write failure, or eviction, and then closes its socket exactly once.
//!
//! Inbound chunks wait in a small local backlog until the router has room,
//! so a full router queue never stops the session draining its deliveries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use chatcast_core::RelayConfig;

use super::types::{Message, SessionEnd, SessionHandle, SessionId, StateFlag};
use crate::reader::{ReadEvent, ReaderConfig, spawn_reader};
use crate::router::{RouterError, RouterHandle};

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delivery queue capacity.
    pub capacity: usize,
    pub reader: ReaderConfig,
    pub write_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            reader: ReaderConfig::default(),
            write_timeout: None,
        }
    }
}

impl From<&RelayConfig> for SessionConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            capacity: config.session_capacity,
            reader: ReaderConfig {
                buffer_size: config.read_buffer_size,
                capacity: config.reader_capacity,
                idle_timeout: config.idle_timeout(),
            },
            write_timeout: config.write_timeout(),
        }
    }
}

/// One connected client.
pub struct Session<S> {
    id: SessionId,
    peer: String,
    stream: S,
    state: Arc<StateFlag>,
    deliver_rx: mpsc::Receiver<Message>,
    router: RouterHandle,
    config: SessionConfig,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Build a session around `stream` and queue its registration.
    ///
    /// Registration is queued ahead of anything the session later broadcasts,
    /// so the router always knows a session before routing its messages.
    pub async fn register(
        id: SessionId,
        peer: String,
        stream: S,
        router: RouterHandle,
        config: SessionConfig,
    ) -> Result<Self, RouterError> {
        let (deliver_tx, deliver_rx) = mpsc::channel(config.capacity);
        let state = Arc::new(StateFlag::default());

        router
            .register(SessionHandle {
                id,
                peer: peer.clone(),
                state: Arc::clone(&state),
                deliver_tx,
            })
            .await?;

        Ok(Self {
            id,
            peer,
            stream,
            state,
            deliver_rx,
            router,
            config,
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> Arc<StateFlag> {
        Arc::clone(&self.state)
    }

    /// Run the event loop to completion.
    #[instrument(skip(self), fields(session_id = %self.id, peer = %self.peer))]
    pub async fn run(self) -> SessionEnd {
        let Self {
            id,
            peer,
            stream,
            state,
            mut deliver_rx,
            router,
            config,
        } = self;

        let (read_half, mut write_half) = tokio::io::split(stream);
        let (mut events, reader_task) = spawn_reader(read_half, peer.clone(), &config.reader);
        info!("Session started");

        // Reading pauses once the backlog is full; deliveries keep flowing.
        let backlog_limit = config.reader.capacity;
        let mut outbound: VecDeque<Message> = VecDeque::with_capacity(backlog_limit);

        let end = loop {
            tokio::select! {
                event = events.recv(), if outbound.len() < backlog_limit => match event {
                    Some(ReadEvent::Data(bytes)) => {
                        debug!(bytes = bytes.len(), "Received data");
                        outbound.push_back(Message::chat(id, &peer, &bytes));
                    }
                    Some(ReadEvent::Error(e)) => break SessionEnd::Read(e),
                    None => {
                        break SessionEnd::Read(std::io::Error::other("reader task stopped"));
                    }
                },
                permit = router.reserve(), if !outbound.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(message) = outbound.pop_front() {
                            permit.send(message);
                        }
                    }
                    Err(_) => break SessionEnd::RouterClosed,
                },
                delivery = deliver_rx.recv() => match delivery {
                    Some(message) => {
                        if let Err(end) =
                            write_message(&mut write_half, &message, config.write_timeout).await
                        {
                            break end;
                        }
                    }
                    None => break SessionEnd::Evicted,
                },
            }
        };

        state.mark_disconnected();
        // Nothing reads deliveries from here on; closing the queue also
        // releases a router blocked on sending to us.
        drop(deliver_rx);
        reader_task.abort();
        close(write_half).await;

        if !matches!(end, SessionEnd::RouterClosed) {
            // Chunks read before the failure still go out ahead of the notice.
            outbound.push_back(Message::disconnected(id, &peer));
            for message in outbound {
                if router.broadcast(message).await.is_err() {
                    debug!("Router closed before disconnect notice");
                    break;
                }
            }
        }

        info!(reason = %end, "Session ended");
        end
    }
}

async fn write_message<W>(
    writer: &mut W,
    message: &Message,
    limit: Option<Duration>,
) -> Result<(), SessionEnd>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(message.as_bytes()).await?;
        writer.flush().await
    };
    match limit {
        Some(limit) => match timeout(limit, write).await {
            Ok(result) => result.map_err(SessionEnd::Write),
            Err(_) => Err(SessionEnd::WriteTimeout(limit)),
        },
        None => write.await.map_err(SessionEnd::Write),
    }
}

/// Shut the write side down. Consumes the half so it cannot happen twice.
async fn close<S>(mut write_half: WriteHalf<S>)
where
    S: AsyncWrite,
{
    if let Err(e) = write_half.shutdown().await {
        warn!(error = %e, "Socket shutdown failed");
    }
}
