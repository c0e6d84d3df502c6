//! Wires the router, acceptor and status reporter together.

use std::net::SocketAddr;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chatcast_core::RelayConfig;

use super::acceptor::{RelayServer, ServerError};
use super::status::spawn_status_reporter;
use crate::router::{Router, RouterConfig, RouterHandle};
use crate::session::SessionConfig;

/// A running broadcast relay.
pub struct RelayRuntime {
    local_addr: SocketAddr,
    router: RouterHandle,
    acceptor: JoinHandle<()>,
    status: Option<JoinHandle<()>>,
}

impl RelayRuntime {
    /// Bind the listener and start every relay task.
    ///
    /// Nothing is spawned if binding fails.
    pub async fn start(
        config: &RelayConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ServerError> {
        let (router_task, router) = Router::new(RouterConfig::from(config));
        let server =
            RelayServer::bind(config.addr, router.clone(), SessionConfig::from(config)).await?;
        let local_addr = server
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: config.addr,
                source,
            })?;

        tokio::spawn(router_task.run());

        let status = config.status_interval().map(|interval| {
            spawn_status_reporter(router.clone(), interval, shutdown.clone())
        });
        let acceptor = tokio::spawn(server.run(shutdown));

        info!(
            addr = %local_addr,
            overflow_policy = %config.overflow_policy,
            echo_to_sender = config.echo_to_sender,
            "Relay listening"
        );

        Ok(Self {
            local_addr,
            router,
            acceptor,
            status,
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub const fn router(&self) -> &RouterHandle {
        &self.router
    }

    /// Wait for the acceptor and status reporter to stop after shutdown.
    ///
    /// Live sessions keep the router running until their connections end.
    pub async fn wait(self) {
        if let Err(e) = self.acceptor.await {
            warn!(error = %e, "Acceptor task failed");
        }
        if let Some(status) = self.status
            && let Err(e) = status.await
        {
            warn!(error = %e, "Status reporter task failed");
        }
    }
}
