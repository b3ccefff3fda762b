//! Per-backend-connection socket fibers
//!
//! Opened lazily: the first frame addressing an unknown session id dials
//! the backend chosen by the frame's target port. The read fiber frames
//! backend bytes into DATA/SHRED frames going back upstream (without the
//! port token, the redirector already knows it); the write fiber feeds the
//! backend socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bh_protocol::{package_chunk, Frame, SessionId};

use crate::session::BackendHandle;
use crate::tunnel::Connection;

/// Capacity of the per-session queue toward the backend socket.
///
/// A slow backend fills the queue, the control dispatcher blocks, and TCP
/// pushes back on the redirector.
pub(crate) const SESSION_QUEUE_CAPACITY: usize = 32;

/// Read buffer size for backend sockets
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Dial the backend for a new session and start its socket fibers
pub(crate) async fn open(
    conn: &Arc<Connection>,
    id: SessionId,
    port: u16,
    frame_tx: &mpsc::Sender<Frame>,
    cancel: &CancellationToken,
) -> Result<Arc<BackendHandle>> {
    let address = conn.config.target_address(port);
    let stream = tokio::time::timeout(
        conn.config.connect_timeout,
        TcpStream::connect((address.as_str(), port)),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Dial to {}:{} timed out", address, port))?
    .with_context(|| format!("Failed to connect to backend {}:{}", address, port))?;

    tracing::debug!("Session {} opened backend {}:{}", id, address, port);

    let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
    let handle = Arc::new(BackendHandle {
        id,
        port,
        tx,
        cancel: cancel.child_token(),
    });
    conn.backends.insert(Arc::clone(&handle));

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(read_loop(
        read_half,
        Arc::clone(&handle),
        Arc::clone(conn),
        frame_tx.clone(),
    ));
    tokio::spawn(write_loop(
        write_half,
        rx,
        Arc::clone(&handle),
        Arc::clone(conn),
        frame_tx.clone(),
    ));

    Ok(handle)
}

/// Remove the session and report the close to the redirector
///
/// The first fiber to observe the close wins the removal, so CLOSE is
/// emitted at most once per session.
pub(crate) async fn close_upstream(
    conn: &Connection,
    handle: &BackendHandle,
    frame_tx: &mpsc::Sender<Frame>,
) {
    handle.cancel.cancel();
    if conn.backends.remove(&handle.id).is_some() {
        conn.shreds.remove(&handle.id);
        let _ = frame_tx
            .send(Frame::Close {
                id: handle.id.clone(),
            })
            .await;
    }
}

/// Backend socket to control channel
async fn read_loop(
    mut read_half: OwnedReadHalf,
    handle: Arc<BackendHandle>,
    conn: Arc<Connection>,
    frame_tx: mpsc::Sender<Frame>,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => return,
            result = read_half.read_buf(&mut buf) => match result {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    let max = conn.config.max_packet_size;
                    if !forward_chunk(&handle, chunk, max, &frame_tx).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!("Backend read error on session {}: {}", handle.id, e);
                    break;
                }
            }
        }
    }
    close_upstream(&conn, &handle, &frame_tx).await;
}

/// Frame one chunk onto the control channel; false when the writer is gone
async fn forward_chunk(
    handle: &BackendHandle,
    chunk: Bytes,
    max: usize,
    frame_tx: &mpsc::Sender<Frame>,
) -> bool {
    // No port token on the return path
    for frame in package_chunk(&handle.id, None, chunk, max) {
        if frame_tx.send(frame).await.is_err() {
            return false;
        }
    }
    true
}

/// Control channel to backend socket
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    handle: Arc<BackendHandle>,
    conn: Arc<Connection>,
    frame_tx: mpsc::Sender<Frame>,
) {
    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => {
                // Flush payload that was queued before the cancellation
                while let Ok(body) = rx.try_recv() {
                    if write_half.write_all(&body).await.is_err() {
                        break;
                    }
                }
                return;
            }
            body = rx.recv() => match body {
                Some(body) => {
                    if let Err(e) = write_half.write_all(&body).await {
                        tracing::debug!("Backend write error on session {}: {}", handle.id, e);
                        close_upstream(&conn, &handle, &frame_tx).await;
                        return;
                    }
                }
                None => return,
            }
        }
    }
}
