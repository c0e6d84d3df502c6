//! chatcast Relay Server
//!
//! TCP broadcast relay: every chunk a client sends is relayed to every
//! connected client, tagged with the sender's address.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use chatcast_core::config::{Config, load_config};
use chatcast_core::tracing_init::{default_filter, init_tracing};
use chatcast_core::OverflowPolicy;
use chatcast_relay::server::{EchoServer, RelayRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Relay every chunk to every connected client.
    Broadcast,
    /// Echo every chunk back to its sender only.
    Echo,
}

#[derive(Parser, Debug)]
#[command(name = "chatcast-relay")]
#[command(version, about = "chatcast relay server - TCP broadcast chat relay")]
struct Args {
    /// Path to a JSON settings file (defaults to the global settings file).
    #[arg(long, env = "CHATCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Server mode.
    #[arg(long, value_enum, default_value_t = Mode::Broadcast)]
    mode: Mode,

    /// What to do when a client's delivery queue is full ("drop-and-reap" or "block").
    #[arg(long)]
    overflow_policy: Option<OverflowPolicy>,

    /// Whether senders receive their own messages.
    #[arg(long)]
    echo_to_sender: Option<bool>,

    /// Close connections idle for this many seconds.
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Drop clients whose socket writes stall for this many seconds.
    #[arg(long)]
    write_timeout: Option<u64>,

    /// Seconds between registry status dumps (0 disables them).
    #[arg(long)]
    status_interval: Option<u64>,

    /// Log level filter for the relay (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CHATCAST_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// CLI flags take priority over every other config layer.
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.relay.addr = addr;
        }
        if let Some(policy) = self.overflow_policy {
            config.relay.overflow_policy = policy;
        }
        if let Some(echo) = self.echo_to_sender {
            config.relay.echo_to_sender = echo;
        }
        if let Some(secs) = self.idle_timeout {
            config.relay.idle_timeout_secs = Some(secs);
        }
        if let Some(secs) = self.write_timeout {
            config.relay.write_timeout_secs = Some(secs);
        }
        if let Some(secs) = self.status_interval {
            config.relay.status_interval_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.relay.validate()?;

    init_tracing(
        &default_filter("chatcast_relay", &config.logging.level),
        config.logging.json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.relay.addr,
        mode = ?args.mode,
        "Starting chatcast-relay"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = match args.mode {
        Mode::Broadcast => Some(RelayRuntime::start(&config.relay, shutdown_rx).await?),
        Mode::Echo => {
            let echo = EchoServer::bind(config.relay.addr, config.relay.read_buffer_size).await?;
            info!(addr = %echo.local_addr()?, "Echo server started");
            tokio::spawn(echo.run(shutdown_rx));
            None
        }
    };

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(relay) = relay {
        relay.wait().await;
    }

    info!("Relay stopped");
    Ok(())
}
