//! Configuration resolution for chatcast.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/chatcast/settings.json), or an explicit file
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Complete chatcast configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the router does when a recipient's delivery queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Drop the message for that recipient and reap it immediately.
    #[default]
    DropAndReap,
    /// Wait for queue space. A recipient that never drains stalls the router.
    Block,
}

impl OverflowPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DropAndReap => "drop-and-reap",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "drop-and-reap" => Ok(Self::DropAndReap),
            "block" => Ok(Self::Block),
            other => Err(Error::Config(format!(
                "Unknown overflow policy '{other}' (expected 'drop-and-reap' or 'block')"
            ))),
        }
    }
}

/// Relay runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address for the TCP acceptor.
    pub addr: SocketAddr,
    /// Capacity of the router's inbound command queue.
    pub router_capacity: usize,
    /// Capacity of each session's delivery queue.
    pub session_capacity: usize,
    /// Capacity of each reader's event queue.
    pub reader_capacity: usize,
    /// Size of the per-connection read buffer in bytes.
    pub read_buffer_size: usize,
    pub overflow_policy: OverflowPolicy,
    /// Whether a sender receives its own broadcast.
    pub echo_to_sender: bool,
    /// Close a connection that sends nothing for this long.
    pub idle_timeout_secs: Option<u64>,
    /// Give up on a single socket write after this long.
    pub write_timeout_secs: Option<u64>,
    /// Interval between registry status dumps. 0 disables them.
    pub status_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            router_capacity: 10,
            session_capacity: 10,
            reader_capacity: 10,
            read_buffer_size: 1024,
            overflow_policy: OverflowPolicy::default(),
            echo_to_sender: true,
            idle_timeout_secs: None,
            write_timeout_secs: None,
            status_interval_secs: 5,
        }
    }
}

impl RelayConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_secs.map(Duration::from_secs)
    }

    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then_some(Duration::from_secs(self.status_interval_secs))
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("router_capacity", self.router_capacity),
            ("session_capacity", self.session_capacity),
            ("reader_capacity", self.reader_capacity),
            ("read_buffer_size", self.read_buffer_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(Error::Config(format!("relay.{name} must be greater than 0")));
            }
        }
        if self.idle_timeout_secs == Some(0) || self.write_timeout_secs == Some(0) {
            return Err(Error::Config(
                "relay timeouts must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON log lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit path must exist; the global file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global_path) if global_path.exists() => load_config_file(&global_path)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.relay.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join("Library/Application Support/chatcast/settings.json"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir().map(|p| p.join("chatcast").join("settings.json"))
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    debug!(path = %path.display(), "Loading config file");
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `CHATCAST_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("CHATCAST_ADDR") {
        match val.parse() {
            Ok(addr) => config.relay.addr = addr,
            Err(e) => warn!(value = %val, error = %e, "Ignoring invalid CHATCAST_ADDR"),
        }
    }
    if let Some(val) = lookup("CHATCAST_OVERFLOW_POLICY") {
        match val.parse() {
            Ok(policy) => config.relay.overflow_policy = policy,
            Err(e) => warn!(error = %e, "Ignoring invalid CHATCAST_OVERFLOW_POLICY"),
        }
    }
    if let Some(val) = lookup("CHATCAST_ECHO_TO_SENDER") {
        match val.parse() {
            Ok(echo) => config.relay.echo_to_sender = echo,
            Err(e) => warn!(value = %val, error = %e, "Ignoring invalid CHATCAST_ECHO_TO_SENDER"),
        }
    }
    if let Some(val) = lookup("CHATCAST_LOG_LEVEL") {
        config.logging.level = val;
    }
}
