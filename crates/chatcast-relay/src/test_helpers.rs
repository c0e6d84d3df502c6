//! Shared test helpers for the relay's unit tests.
//!
//! Provides in-memory stream doubles that count socket shutdowns, and
//! observer sessions that expose their delivery queue directly.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::router::RouterHandle;
use crate::session::{Message, SessionHandle, SessionId, StateFlag};

const WAIT: Duration = Duration::from_secs(2);

/// A registered-by-hand session whose deliveries land in the returned queue.
pub fn observer(peer: &str, capacity: usize) -> (SessionHandle, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = SessionHandle {
        id: SessionId::new(),
        peer: peer.to_string(),
        state: Arc::new(StateFlag::default()),
        deliver_tx: tx,
    };
    (handle, rx)
}

/// Next delivery as text, failing the test after two seconds.
pub async fn recv_text(rx: &mut mpsc::Receiver<Message>) -> String {
    let message = timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery queue closed");
    message.text().into_owned()
}

/// Poll the router until exactly `count` sessions are registered.
pub async fn wait_for_sessions(router: &RouterHandle, count: usize) {
    timeout(WAIT, async {
        loop {
            if router.snapshot().await.unwrap().sessions.len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached expected size");
}

/// In-memory duplex endpoint that counts `shutdown` calls.
pub struct TrackedStream {
    inner: DuplexStream,
    shutdowns: Arc<AtomicUsize>,
}

impl TrackedStream {
    /// Returns the client end, the tracked server end and the shutdown counter.
    pub fn pair(max_buf_size: usize) -> (DuplexStream, Self, Arc<AtomicUsize>) {
        let (client, server) = tokio::io::duplex(max_buf_size);
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let tracked = Self {
            inner: server,
            shutdowns: Arc::clone(&shutdowns),
        };
        (client, tracked, shutdowns)
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Endpoint whose reads never complete and whose writes always fail.
pub struct BrokenPipeStream {
    shutdowns: Arc<AtomicUsize>,
}

impl BrokenPipeStream {
    /// Returns the stream and its shutdown counter.
    pub fn pair() -> (Self, Arc<AtomicUsize>) {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        (
            Self {
                shutdowns: Arc::clone(&shutdowns),
            },
            shutdowns,
        )
    }
}

impl AsyncRead for BrokenPipeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenPipeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "peer went away",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
