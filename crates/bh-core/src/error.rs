//! Core error types for backhaul

use std::path::PathBuf;

use bh_protocol::ProtocolError;
use thiserror::Error;

/// Top-level error type for the backhaul ecosystem
#[derive(Error, Debug)]
pub enum CoreError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file could not be read
    #[error("Failed to read config: {0}")]
    Unreadable(String),

    /// JSON parse error
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Separator that could collide with header tokens
    #[error("Invalid separator: {0}")]
    InvalidSeparator(String),

    /// Unusable shared secret
    #[error("Invalid auth secret: {0}")]
    InvalidAuth(String),

    /// Unusable listen port
    #[error("Invalid listen port: {0}")]
    InvalidListen(String),

    /// Starter configured without any targets
    #[error("No targets configured")]
    NoTargets,

    /// Fragmentation cap of zero
    #[error("max_packet_size must be nonzero")]
    InvalidPacketSize,
}
