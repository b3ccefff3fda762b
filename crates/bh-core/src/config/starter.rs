//! Starter configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::serde_utils::duration_secs;
use super::{validate_auth, validate_separator};
use crate::error::ConfigError;

fn default_address() -> String {
    "127.0.0.1".to_string()
}

/// A TCP endpoint as it appears in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    #[serde(default = "default_address")]
    pub address: String,

    /// TCP port
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Configuration for the private-side starter daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StarterConfig {
    /// Shared admission secret; must match the redirector's
    pub auth: String,

    /// Header/body separator; must match the redirector's
    pub separator: String,

    /// The redirector's control endpoint
    pub redirect_to: Endpoint,

    /// Backends this starter is willing to open, keyed by port
    pub targets: Vec<Endpoint>,

    /// Timeout for outbound dials
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Payload size above which chunks are fragmented into SHRED frames
    pub max_packet_size: usize,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            auth: String::new(),
            separator: "\r\n".to_string(),
            redirect_to: Endpoint {
                address: "127.0.0.1".to_string(),
                port: 7835,
            },
            targets: vec![],
            connect_timeout: Duration::from_secs(30),
            max_packet_size: bh_protocol::MAX_PACKET_SIZE,
        }
    }
}

impl StarterConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_separator(&self.separator)?;
        validate_auth(&self.auth, &self.separator)?;
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if self.max_packet_size == 0 {
            return Err(ConfigError::InvalidPacketSize);
        }
        Ok(())
    }

    /// Ports advertised in the AUTH frame
    pub fn target_ports(&self) -> Vec<u16> {
        self.targets.iter().map(|t| t.port).collect()
    }

    /// Backend address for a target port, defaulting to localhost when the
    /// port is not configured
    pub fn target_address(&self, port: u16) -> String {
        self.targets
            .iter()
            .find(|t| t.port == port)
            .map(|t| t.address.clone())
            .unwrap_or_else(default_address)
    }
}
