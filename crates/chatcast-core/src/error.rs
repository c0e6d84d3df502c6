//! Error types for `chatcast` core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `chatcast` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `chatcast` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file could not be read
    #[error("Failed to read config file {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid settings JSON
    #[error("Failed to parse config file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
