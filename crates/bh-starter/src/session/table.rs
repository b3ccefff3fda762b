//! Backend connection registry
//!
//! The starter never assigns ids; entries appear when the redirector first
//! addresses an unknown id and vanish on CLOSE, backend EOF, or control
//! teardown.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bh_protocol::SessionId;

/// Handle to one open backend connection
pub struct BackendHandle {
    /// Session id assigned by the redirector
    pub id: SessionId,
    /// Backend port this session is proxied to
    pub port: u16,
    /// Channel for payload bound for the backend socket
    pub tx: mpsc::Sender<Bytes>,
    /// Cancellation token ending both socket fibers
    pub cancel: CancellationToken,
}

impl BackendHandle {
    /// Signal the session's fibers to stop
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Backend connections of the current control session, indexed by id
pub struct BackendTable {
    backends: DashMap<SessionId, Arc<BackendHandle>>,
}

impl BackendTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
        }
    }

    /// Get a backend by session id
    pub fn get(&self, id: &SessionId) -> Option<Arc<BackendHandle>> {
        self.backends.get(id).map(|r| Arc::clone(&r))
    }

    /// Register a backend connection
    pub fn insert(&self, handle: Arc<BackendHandle>) {
        self.backends.insert(handle.id.clone(), handle);
    }

    /// Remove a backend connection
    pub fn remove(&self, id: &SessionId) -> Option<Arc<BackendHandle>> {
        self.backends.remove(id).map(|(_, v)| v)
    }

    /// Number of open backends
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Cancel every backend and empty the table
    pub fn close_all(&self) {
        for entry in self.backends.iter() {
            entry.value().close();
        }
        self.backends.clear();
    }
}

impl Default for BackendTable {
    fn default() -> Self {
        Self::new()
    }
}
