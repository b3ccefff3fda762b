//! Outbound control-channel connector
//!
//! Dials the redirector, authenticates, and serves frames until the
//! channel drops. Every disconnect destroys all backend sockets; after a
//! fixed delay the starter dials again and a fresh AUTH begins a new
//! session id namespace on the redirector.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use bh_core::config::StarterConfig;
use bh_protocol::{Frame, FrameCodec, SessionId, ShredBuffer};

use crate::session::{self, BackendTable};

/// Delay between reconnect attempts after the control channel drops
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the queue feeding the control-channel writer.
///
/// Every backend reader enqueues here; a slow control link blocks the
/// senders and stops backend reads, which is the backpressure path.
const CONTROL_QUEUE_CAPACITY: usize = 256;

type ControlSink = SplitSink<Framed<TcpStream, FrameCodec>, Frame>;
type ControlStream = SplitStream<Framed<TcpStream, FrameCodec>>;

/// State of one established control connection
pub(crate) struct Connection {
    /// Starter configuration
    pub config: StarterConfig,
    /// Open backend connections
    pub backends: BackendTable,
    /// In-flight fragmented payloads, by session
    pub shreds: DashMap<SessionId, ShredBuffer>,
}

/// Private-side daemon maintaining the control connection
pub struct Starter {
    /// Starter configuration
    config: StarterConfig,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
    /// Delay before redialing after a disconnect
    reconnect_delay: Duration,
}

impl Starter {
    /// Create a starter for a validated configuration
    pub fn new(config: StarterConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Override the reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Run the connect/serve/reconnect loop until cancelled
    pub async fn run(&self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.connect_and_serve().await {
                Ok(()) => tracing::info!("Control channel closed"),
                Err(e) => tracing::warn!("Control channel failed: {:#}", e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
            tracing::info!("Reconnecting to {}", self.config.redirect_to);
        }

        tracing::info!("Starter shutting down");
        Ok(())
    }

    /// Dial, authenticate, and serve one control connection to completion
    async fn connect_and_serve(&self) -> Result<()> {
        let target = &self.config.redirect_to;
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((target.address.as_str(), target.port)),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Connection to {} timed out", target))?
        .with_context(|| format!("Failed to connect to {}", target))?;

        tracing::info!("Connected to redirector at {}", target);

        let codec = FrameCodec::new(self.config.separator.clone());
        let mut framed = Framed::new(stream, codec);
        framed
            .send(Frame::Auth {
                secret: self.config.auth.clone(),
                ports: self.config.target_ports(),
            })
            .await
            .context("Failed to send AUTH")?;

        let conn = Arc::new(Connection {
            config: self.config.clone(),
            backends: BackendTable::new(),
            shreds: DashMap::new(),
        });
        let cancel = self.cancel.child_token();
        let (frame_tx, frame_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (sink, stream) = framed.split();

        let writer = tokio::spawn(write_loop(sink, frame_rx, cancel.clone()));

        let result = read_loop(stream, &conn, &frame_tx, &cancel).await;

        // Disconnected: destroy every backend before the next attempt
        cancel.cancel();
        conn.backends.close_all();
        conn.shreds.clear();
        drop(frame_tx);
        let _ = writer.await;
        result
    }
}

/// Serialize all outbound frames onto the control socket
async fn write_loop(mut sink: ControlSink, mut rx: mpsc::Receiver<Frame>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::warn!("Control channel write failed: {}", e);
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            }
        }
    }
    let _ = sink.close().await;
}

/// Dispatch inbound control frames until the channel ends
async fn read_loop(
    mut stream: ControlStream,
    conn: &Arc<Connection>,
    frame_tx: &mpsc::Sender<Frame>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next() => match next {
                None => {
                    tracing::info!("Control channel closed by redirector");
                    return Ok(());
                }
                Some(Err(e)) => {
                    tracing::warn!("Control channel read failed: {}", e);
                    return Err(e.into());
                }
                Some(Ok(frame)) => dispatch(conn, frame, frame_tx, cancel).await,
            }
        }
    }
}

/// Handle one frame from the redirector
async fn dispatch(
    conn: &Arc<Connection>,
    frame: Frame,
    frame_tx: &mpsc::Sender<Frame>,
    cancel: &CancellationToken,
) {
    match frame {
        Frame::Data { id, port, body } => {
            let Some(handle) = ensure_session(conn, id, port, frame_tx, cancel).await else {
                return;
            };
            // A send error means the session is already being torn down
            let _ = handle.tx.send(body).await;
        }

        Frame::Shred {
            id,
            port,
            index,
            total,
            body,
        } => {
            let Some(handle) = ensure_session(conn, id.clone(), port, frame_tx, cancel).await
            else {
                conn.shreds.remove(&id);
                return;
            };
            let result = {
                let mut buffer = conn
                    .shreds
                    .entry(id.clone())
                    .or_insert_with(|| ShredBuffer::new(total));
                buffer.insert(index, total, body)
            };
            match result {
                Ok(Some(joined)) => {
                    conn.shreds.remove(&id);
                    let _ = handle.tx.send(joined).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Reassembly failed for session {}: {}", id, e);
                    session::close_upstream(conn, &handle, frame_tx).await;
                }
            }
        }

        Frame::Close { id } => {
            if let Some(handle) = conn.backends.remove(&id) {
                tracing::debug!("Redirector closed session {}", id);
                handle.close();
            }
            conn.shreds.remove(&id);
        }

        Frame::Auth { .. } => {
            tracing::warn!("Unexpected AUTH from redirector, discarding");
        }
    }
}

/// Look up a session, dialing its backend on first sight
///
/// Returns `None` when the session cannot exist: the frame named no target
/// port, or the backend dial failed (the redirector is told with CLOSE).
async fn ensure_session(
    conn: &Arc<Connection>,
    id: SessionId,
    port: Option<u16>,
    frame_tx: &mpsc::Sender<Frame>,
    cancel: &CancellationToken,
) -> Option<Arc<crate::session::BackendHandle>> {
    if let Some(handle) = conn.backends.get(&id) {
        return Some(handle);
    }

    let Some(port) = port else {
        tracing::warn!("Frame for unknown session {} without a target port", id);
        return None;
    };

    match session::open(conn, id.clone(), port, frame_tx, cancel).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Session {}: {:#}", id, e);
            let _ = frame_tx.send(Frame::Close { id }).await;
            None
        }
    }
}
