//! Router that fans each broadcast out to every live session.
//!
//! The router is a single task draining one bounded command queue. Because
//! the registry lives inside that task, registration, fan-out and reaping are
//! serialized without a lock, and messages are routed in the order the queue
//! received them.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chatcast_core::{OverflowPolicy, RelayConfig};

use crate::registry::{ReapReason, SessionRegistry};
use crate::session::{Message, SessionHandle, SessionId, SessionInfo};

/// Requests accepted by the router task.
#[derive(Debug)]
pub enum RouterCommand {
    Register(SessionHandle),
    Broadcast(Message),
    Snapshot(oneshot::Sender<RouterSnapshot>),
}

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Inbound command queue capacity.
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub echo_to_sender: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            overflow_policy: OverflowPolicy::default(),
            echo_to_sender: true,
        }
    }
}

impl From<&RelayConfig> for RouterConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            capacity: config.router_capacity,
            overflow_policy: config.overflow_policy,
            echo_to_sender: config.echo_to_sender,
        }
    }
}

/// Running totals kept by the router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub messages_routed: u64,
    pub deliveries: u64,
    /// Deliveries dropped because a queue was full.
    pub dropped: u64,
    pub reaped: u64,
}

/// Registry contents plus counters at one point in the command stream.
#[derive(Debug, Clone, Default)]
pub struct RouterSnapshot {
    pub sessions: Vec<SessionInfo>,
    pub stats: RouterStats,
}

/// Cloneable sender side of the router.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Wrap a raw command sender so tests can drive the queue themselves.
    #[cfg(test)]
    pub(crate) const fn from_sender(tx: mpsc::Sender<RouterCommand>) -> Self {
        Self { tx }
    }

    /// Queue a session for insertion into the registry.
    pub async fn register(&self, handle: SessionHandle) -> Result<(), RouterError> {
        self.tx
            .send(RouterCommand::Register(handle))
            .await
            .map_err(|_| RouterError::Closed)
    }

    /// Queue a message for fan-out. Waits while the queue is full.
    pub async fn broadcast(&self, message: Message) -> Result<(), RouterError> {
        self.tx
            .send(RouterCommand::Broadcast(message))
            .await
            .map_err(|_| RouterError::Closed)
    }

    /// Wait for a free slot in the router queue.
    ///
    /// Cancel-safe: dropping the future before it resolves releases nothing
    /// and loses no message.
    pub async fn reserve(&self) -> Result<BroadcastPermit<'_>, RouterError> {
        self.tx
            .reserve()
            .await
            .map(BroadcastPermit)
            .map_err(|_| RouterError::Closed)
    }

    /// Ask the router for the current registry contents.
    pub async fn snapshot(&self) -> Result<RouterSnapshot, RouterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RouterCommand::Snapshot(reply_tx))
            .await
            .map_err(|_| RouterError::Closed)?;
        reply_rx.await.map_err(|_| RouterError::Closed)
    }

}

/// A reserved slot in the router queue.
#[derive(Debug)]
pub struct BroadcastPermit<'a>(mpsc::Permit<'a, RouterCommand>);

impl BroadcastPermit<'_> {
    /// Queue `message` for fan-out without waiting.
    pub fn send(self, message: Message) {
        self.0.send(RouterCommand::Broadcast(message));
    }
}

/// The router task state.
pub struct Router {
    registry: SessionRegistry,
    rx: mpsc::Receiver<RouterCommand>,
    config: RouterConfig,
    stats: RouterStats,
}

impl Router {
    pub fn new(config: RouterConfig) -> (Self, RouterHandle) {
        let (tx, rx) = mpsc::channel(config.capacity);
        let router = Self {
            registry: SessionRegistry::new(),
            rx,
            config,
            stats: RouterStats::default(),
        };
        (router, RouterHandle { tx })
    }

    /// Create a router and run it on its own task.
    pub fn spawn(config: RouterConfig) -> (RouterHandle, JoinHandle<RouterStats>) {
        let (router, handle) = Self::new(config);
        (handle, tokio::spawn(router.run()))
    }

    /// Process commands until every handle has been dropped.
    pub async fn run(mut self) -> RouterStats {
        info!(
            capacity = self.config.capacity,
            overflow_policy = %self.config.overflow_policy,
            echo_to_sender = self.config.echo_to_sender,
            "Router started"
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                RouterCommand::Register(handle) => {
                    self.registry.register(handle);
                }
                RouterCommand::Broadcast(message) => self.fan_out(message).await,
                RouterCommand::Snapshot(reply) => {
                    let _ = reply.send(RouterSnapshot {
                        sessions: self.registry.snapshot(),
                        stats: self.stats,
                    });
                }
            }
        }

        info!(
            messages_routed = self.stats.messages_routed,
            reaped = self.stats.reaped,
            "Router stopped"
        );
        self.stats
    }

    async fn fan_out(&mut self, message: Message) {
        self.stats.messages_routed += 1;
        debug!(
            origin = %message.origin(),
            bytes = message.len(),
            recipients = self.registry.len(),
            "Routing message"
        );

        for id in self.registry.disconnected() {
            self.reap(&id, ReapReason::Disconnected);
        }

        let echo = self.config.echo_to_sender;
        let targets: Vec<(SessionId, mpsc::Sender<Message>)> = self
            .registry
            .iter()
            .filter(|h| echo || h.id != message.origin())
            .map(|h| (h.id, h.deliver_tx.clone()))
            .collect();

        for (id, tx) in targets {
            match self.deliver(id, &tx, message.clone()).await {
                Ok(()) => self.stats.deliveries += 1,
                Err(RouterError::QueueFull(_)) => {
                    warn!(session_id = %id, "Delivery queue full, dropping message");
                    self.stats.dropped += 1;
                    self.reap(&id, ReapReason::QueueFull);
                }
                Err(_) => self.reap(&id, ReapReason::Closed),
            }
        }
    }

    async fn deliver(
        &self,
        id: SessionId,
        tx: &mpsc::Sender<Message>,
        message: Message,
    ) -> Result<(), RouterError> {
        match self.config.overflow_policy {
            OverflowPolicy::Block => tx
                .send(message)
                .await
                .map_err(|_| RouterError::RecipientGone(id)),
            OverflowPolicy::DropAndReap => tx.try_send(message).map_err(|e| match e {
                TrySendError::Full(_) => RouterError::QueueFull(id),
                TrySendError::Closed(_) => RouterError::RecipientGone(id),
            }),
        }
    }

    fn reap(&mut self, id: &SessionId, reason: ReapReason) {
        if self.registry.reap(id, reason).is_some() {
            self.stats.reaped += 1;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Router closed")]
    Closed,

    #[error("Delivery queue full for session {0}")]
    QueueFull(SessionId),

    #[error("Delivery queue closed for session {0}")]
    RecipientGone(SessionId),
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::test_helpers::{observer, recv_text, wait_for_sessions};

    fn spawn_router(policy: OverflowPolicy, echo: bool) -> RouterHandle {
        let (handle, _task) = Router::spawn(RouterConfig {
            capacity: 10,
            overflow_policy: policy,
            echo_to_sender: echo,
        });
        handle
    }

    #[tokio::test]
    async fn fans_out_to_every_session_including_sender() {
        let router = spawn_router(OverflowPolicy::DropAndReap, true);
        let (a, mut a_rx) = observer("a", 10);
        let (b, mut b_rx) = observer("b", 10);
        let (c, mut c_rx) = observer("c", 10);
        let a_id = a.id;
        router.register(a).await.unwrap();
        router.register(b).await.unwrap();
        router.register(c).await.unwrap();

        router.broadcast(Message::chat(a_id, "a", b"hi")).await.unwrap();

        assert_eq!(recv_text(&mut a_rx).await, "a: hi");
        assert_eq!(recv_text(&mut b_rx).await, "a: hi");
        assert_eq!(recv_text(&mut c_rx).await, "a: hi");
    }

    #[tokio::test]
    async fn reserved_slot_routes_like_broadcast() {
        let router = spawn_router(OverflowPolicy::DropAndReap, true);
        let (a, mut a_rx) = observer("a", 10);
        let a_id = a.id;
        router.register(a).await.unwrap();

        let permit = router.reserve().await.unwrap();
        permit.send(Message::chat(a_id, "a", b"first"));
        router.broadcast(Message::chat(a_id, "a", b"second")).await.unwrap();

        assert_eq!(recv_text(&mut a_rx).await, "a: first");
        assert_eq!(recv_text(&mut a_rx).await, "a: second");
    }

    #[tokio::test]
    async fn sender_is_skipped_without_echo() {
        let router = spawn_router(OverflowPolicy::DropAndReap, false);
        let (a, mut a_rx) = observer("a", 10);
        let (b, mut b_rx) = observer("b", 10);
        let a_id = a.id;
        router.register(a).await.unwrap();
        router.register(b).await.unwrap();

        router.broadcast(Message::chat(a_id, "a", b"hi")).await.unwrap();

        assert_eq!(recv_text(&mut b_rx).await, "a: hi");
        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.stats.deliveries, 1);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnected_session_is_reaped_and_gets_nothing() {
        let router = spawn_router(OverflowPolicy::DropAndReap, true);
        let (a, mut a_rx) = observer("a", 10);
        let (b, mut b_rx) = observer("b", 10);
        let (a_id, b_id) = (a.id, b.id);
        let b_state = std::sync::Arc::clone(&b.state);
        router.register(a).await.unwrap();
        router.register(b).await.unwrap();

        b_state.mark_disconnected();
        router.broadcast(Message::disconnected(b_id, "b")).await.unwrap();
        router.broadcast(Message::chat(a_id, "a", b"after")).await.unwrap();

        assert_eq!(recv_text(&mut a_rx).await, "b disconnected\n");
        assert_eq!(recv_text(&mut a_rx).await, "a: after");

        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].id, a_id);
        assert_eq!(snapshot.stats.reaped, 1);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_delivery_queue_is_reaped() {
        let router = spawn_router(OverflowPolicy::DropAndReap, true);
        let (a, mut a_rx) = observer("a", 10);
        let (b, b_rx) = observer("b", 10);
        let a_id = a.id;
        router.register(a).await.unwrap();
        router.register(b).await.unwrap();
        drop(b_rx);

        router.broadcast(Message::chat(a_id, "a", b"x")).await.unwrap();
        assert_eq!(recv_text(&mut a_rx).await, "a: x");
        wait_for_sessions(&router, 1).await;
    }

    #[tokio::test]
    async fn routing_order_is_preserved_across_senders() {
        let router = spawn_router(OverflowPolicy::DropAndReap, true);
        let (r, mut r_rx) = observer("r", 10);
        router.register(r).await.unwrap();

        let senders: Vec<SessionId> = (0..3).map(|_| SessionId::new()).collect();
        for i in 0..6 {
            let origin = senders[i % senders.len()];
            router
                .broadcast(Message::chat(origin, "s", format!("{i}").as_bytes()))
                .await
                .unwrap();
        }

        for i in 0..6 {
            assert_eq!(recv_text(&mut r_rx).await, format!("s: {i}"));
        }
    }

    #[tokio::test]
    async fn late_joiner_gets_no_history() {
        let router = spawn_router(OverflowPolicy::DropAndReap, true);
        let (a, mut a_rx) = observer("a", 10);
        let a_id = a.id;
        router.register(a).await.unwrap();
        router.broadcast(Message::chat(a_id, "a", b"early")).await.unwrap();
        assert_eq!(recv_text(&mut a_rx).await, "a: early");

        let (b, mut b_rx) = observer("b", 10);
        router.register(b).await.unwrap();
        router.broadcast(Message::chat(a_id, "a", b"late")).await.unwrap();
        assert_eq!(recv_text(&mut b_rx).await, "a: late");
    }

    #[tokio::test]
    async fn full_queue_reaps_recipient_under_drop_and_reap() {
        let router = spawn_router(OverflowPolicy::DropAndReap, true);
        let (stalled, mut stalled_rx) = observer("stalled", 10);
        let (healthy, mut healthy_rx) = observer("healthy", 32);
        let stalled_id = stalled.id;
        router.register(stalled).await.unwrap();
        router.register(healthy).await.unwrap();

        let origin = SessionId::new();
        for i in 0..11 {
            router
                .broadcast(Message::chat(origin, "s", format!("{i}").as_bytes()))
                .await
                .unwrap();
        }

        for i in 0..11 {
            assert_eq!(recv_text(&mut healthy_rx).await, format!("s: {i}"));
        }

        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_ne!(snapshot.sessions[0].id, stalled_id);
        assert_eq!(snapshot.stats.dropped, 1);
        assert_eq!(snapshot.stats.reaped, 1);

        // The ten queued messages stay readable; the eleventh was dropped.
        let mut queued = 0;
        while stalled_rx.recv().await.is_some() {
            queued += 1;
        }
        assert_eq!(queued, 10);
    }

    #[tokio::test]
    async fn full_queue_stalls_router_under_block() {
        let router = spawn_router(OverflowPolicy::Block, true);
        let (stalled, mut stalled_rx) = observer("stalled", 10);
        let (healthy, mut healthy_rx) = observer("healthy", 10);
        router.register(stalled).await.unwrap();
        router.register(healthy).await.unwrap();

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = healthy_rx.recv().await {
                let _ = seen_tx.send(msg.text().into_owned());
            }
        });

        let origin = SessionId::new();
        for i in 0..12 {
            router
                .broadcast(Message::chat(origin, "s", format!("{i}").as_bytes()))
                .await
                .unwrap();
        }

        let stalled_snapshot = timeout(Duration::from_millis(200), router.snapshot()).await;
        assert!(stalled_snapshot.is_err(), "router should be stalled");

        let mut seen = Vec::new();
        while let Ok(Some(text)) = timeout(Duration::from_millis(100), seen_rx.recv()).await {
            seen.push(text);
        }
        assert!(!seen.contains(&"s: 11".to_string()));

        // Draining the stalled recipient lets routing resume.
        for _ in 0..12 {
            stalled_rx.recv().await.unwrap();
        }
        let resumed = timeout(Duration::from_secs(2), router.snapshot())
            .await
            .expect("router should resume")
            .unwrap();
        assert_eq!(resumed.stats.messages_routed, 12);
        while seen.len() < 12 {
            seen.push(seen_rx.recv().await.unwrap());
        }
        let expected: Vec<String> = (0..12).map(|i| format!("s: {i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn handle_reports_closed_router() {
        let (router, rx) = {
            let (tx, rx) = mpsc::channel(1);
            (RouterHandle::from_sender(tx), rx)
        };
        drop(rx);
        assert!(matches!(router.reserve().await, Err(RouterError::Closed)));
        let result = router.broadcast(Message::new(SessionId::new(), b"x".to_vec())).await;
        assert!(matches!(result, Err(RouterError::Closed)));
    }
}
