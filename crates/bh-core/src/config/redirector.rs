//! Redirector configuration

use serde::{Deserialize, Serialize};

use super::{validate_auth, validate_separator};
use crate::error::ConfigError;

/// Configuration for the public-facing redirector daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectorConfig {
    /// Shared admission secret; must match the starter's
    pub auth: String,

    /// Header/body separator; must match the starter's
    pub separator: String,

    /// Port the control listener binds
    pub listen: u16,

    /// Address the control and public listeners bind
    pub bind_address: String,

    /// Payload size above which chunks are fragmented into SHRED frames
    pub max_packet_size: usize,
}

impl Default for RedirectorConfig {
    fn default() -> Self {
        Self {
            auth: String::new(),
            separator: "\r\n".to_string(),
            listen: 7835,
            bind_address: "0.0.0.0".to_string(),
            max_packet_size: bh_protocol::MAX_PACKET_SIZE,
        }
    }
}

impl RedirectorConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_separator(&self.separator)?;
        validate_auth(&self.auth, &self.separator)?;
        if self.listen == 0 {
            return Err(ConfigError::InvalidListen(
                "listen port must be nonzero".to_string(),
            ));
        }
        if self.max_packet_size == 0 {
            return Err(ConfigError::InvalidPacketSize);
        }
        Ok(())
    }
}
