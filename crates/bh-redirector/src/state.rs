//! Global redirector state

use std::sync::Mutex;

use dashmap::DashMap;

use bh_core::config::RedirectorConfig;
use bh_protocol::{SessionId, ShredBuffer};

use crate::session::SessionTable;

/// State derived from the currently established control session
///
/// The session table, fragment buffers, and port registry are populated
/// while a control session is established and cleared on teardown; the
/// configuration outlives control sessions.
pub struct RedirectorState {
    /// Configuration
    pub config: RedirectorConfig,
    /// Live public sessions
    pub sessions: SessionTable,
    /// In-flight fragmented payloads, by session
    pub shreds: DashMap<SessionId, ShredBuffer>,
    /// Ports advertised by the current control session
    ports: Mutex<Vec<u16>>,
}

impl RedirectorState {
    /// Create state for a freshly loaded configuration
    pub fn new(config: RedirectorConfig) -> Self {
        Self {
            config,
            sessions: SessionTable::new(),
            shreds: DashMap::new(),
            ports: Mutex::new(Vec::new()),
        }
    }

    /// Record the advertised ports, once per control session
    pub fn set_ports(&self, ports: Vec<u16>) {
        *self.ports.lock().unwrap_or_else(|e| e.into_inner()) = ports;
    }

    /// Ports advertised by the current control session
    pub fn ports(&self) -> Vec<u16> {
        self.ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Tear down everything derived from the control session
    pub fn clear(&self) {
        self.sessions.close_all();
        self.shreds.clear();
        self.set_ports(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_resets_derived_state() {
        let state = RedirectorState::new(RedirectorConfig::default());
        state.set_ports(vec![8080, 8081]);
        state
            .shreds
            .insert(SessionId::generate(), ShredBuffer::new(2));

        assert_eq!(state.ports(), vec![8080, 8081]);
        state.clear();

        assert!(state.ports().is_empty());
        assert!(state.shreds.is_empty());
        assert!(state.sessions.is_empty());
    }
}
