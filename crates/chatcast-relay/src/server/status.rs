//! Periodic dump of the session registry for debugging.

use std::fmt::Write as _;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::router::{RouterHandle, RouterSnapshot};

/// Spawn a task that logs the registry every `interval`.
///
/// The registry is read through the router, never shared directly.
pub fn spawn_status_reporter(
    router: RouterHandle,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match router.snapshot().await {
                        Ok(snapshot) => {
                            info!(
                                connected = snapshot.sessions.len(),
                                routed = snapshot.stats.messages_routed,
                                reaped = snapshot.stats.reaped,
                                "Connected clients"
                            );
                            debug!("{}", render_snapshot(&snapshot));
                        }
                        Err(_) => {
                            debug!("Router gone, status reporter exiting");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Status reporter shutting down");
                    return;
                }
            }
        }
    })
}

/// Multi-line registry listing: a count header then one line per session.
pub fn render_snapshot(snapshot: &RouterSnapshot) -> String {
    let mut out = format!("connected clients: {}", snapshot.sessions.len());
    for session in &snapshot.sessions {
        let _ = write!(
            out,
            "\n{} peer={} state={} queued={}",
            session.id, session.peer, session.state, session.queued
        );
    }
    out
}
