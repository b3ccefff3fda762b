//! Session registry

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bh_protocol::SessionId;

/// Handle to one public connection's session
pub struct SessionHandle {
    /// Session id assigned at accept time
    pub id: SessionId,
    /// Public port the client connected to
    pub port: u16,
    /// Channel for payload bound for the public socket
    pub tx: mpsc::Sender<Bytes>,
    /// Cancellation token ending both socket fibers
    pub cancel: CancellationToken,
}

impl SessionHandle {
    /// Signal the session's fibers to stop
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// All live sessions of the current control session, indexed by id
pub struct SessionTable {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Draw a fresh id not present in the table
    pub fn allocate_id(&self) -> SessionId {
        loop {
            let id = SessionId::generate();
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Get a session by id
    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(id).map(|r| Arc::clone(&r))
    }

    /// Check whether an id is live
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Add a session to the table
    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions.insert(handle.id.clone(), handle);
    }

    /// Remove a session from the table
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(id).map(|(_, v)| v)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cancel every session and empty the table
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().close();
        }
        self.sessions.clear();
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
