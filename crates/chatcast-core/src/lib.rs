//! `chatcast` Core Library
//!
//! Shared functionality for `chatcast` components:
//! - Configuration resolution and hierarchy
//! - Tracing/logging initialization
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{Config, LoggingConfig, OverflowPolicy, RelayConfig};
pub use error::{Error, Result};
