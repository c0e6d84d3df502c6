//! Connection reader.
//!
//! Turns blocking reads on one connection into a bounded stream of events so
//! the session loop never waits on the socket directly. The stream is finite:
//! zero or more `Data` events followed by exactly one `Error`.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

/// One step of the read loop.
#[derive(Debug)]
pub enum ReadEvent {
    /// Exactly the bytes returned by one read.
    Data(Vec<u8>),
    /// Terminal failure. EOF is reported as `UnexpectedEof`.
    Error(io::Error),
}

/// Reader tuning.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub buffer_size: usize,
    /// Event queue capacity.
    pub capacity: usize,
    pub idle_timeout: Option<Duration>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            capacity: 10,
            idle_timeout: None,
        }
    }
}

/// Spawn the read loop for `reader` and return its event queue.
pub fn spawn_reader<R>(
    reader: R,
    peer: String,
    config: &ReaderConfig,
) -> (mpsc::Receiver<ReadEvent>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.capacity);
    let handle = tokio::spawn(read_loop(
        reader,
        tx,
        peer,
        config.buffer_size,
        config.idle_timeout,
    ));
    (rx, handle)
}

async fn read_loop<R>(
    mut reader: R,
    tx: mpsc::Sender<ReadEvent>,
    peer: String,
    buffer_size: usize,
    idle_timeout: Option<Duration>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        trace!(peer = %peer, "Waiting for data");
        let result = match idle_timeout {
            Some(limit) => timeout(limit, reader.read(&mut buf))
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data received for {limit:?}"),
                    ))
                }),
            None => reader.read(&mut buf).await,
        };

        let event = match result {
            Ok(0) => ReadEvent::Error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Ok(n) => ReadEvent::Data(buf[..n].to_vec()),
            Err(e) => ReadEvent::Error(e),
        };
        let terminal = matches!(event, ReadEvent::Error(_));

        if tx.send(event).await.is_err() {
            debug!(peer = %peer, "Session dropped its reader queue");
            break;
        }
        if terminal {
            break;
        }
    }

    debug!(peer = %peer, "Read loop exited");
}
