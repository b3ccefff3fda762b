//! Per-public-connection socket fibers
//!
//! Each accepted public connection gets a read fiber (socket chunks become
//! DATA or SHRED frames on the control channel) and a write fiber (payload
//! delivered by the control dispatcher goes out the socket). Both stop when
//! the session's cancellation token fires.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bh_protocol::{package_chunk, Frame, SessionId};

use crate::session::SessionHandle;
use crate::state::RedirectorState;

/// Capacity of the per-session queue toward the public socket.
///
/// When the public client reads slowly the queue fills and the control
/// dispatcher blocks, which stalls the control reader and lets TCP push
/// back on the starter.
pub(crate) const SESSION_QUEUE_CAPACITY: usize = 32;

/// Read buffer size for public sockets
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Register a new session and start its socket fibers
pub(crate) fn spawn(
    state: Arc<RedirectorState>,
    stream: TcpStream,
    id: SessionId,
    port: u16,
    frame_tx: mpsc::Sender<Frame>,
    parent: &CancellationToken,
) {
    let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
    let handle = Arc::new(SessionHandle {
        id,
        port,
        tx,
        cancel: parent.child_token(),
    });
    state.sessions.insert(Arc::clone(&handle));

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(read_loop(
        read_half,
        Arc::clone(&handle),
        Arc::clone(&state),
        frame_tx.clone(),
    ));
    tokio::spawn(write_loop(write_half, rx, handle, state, frame_tx));
}

/// Remove the session and report the close to the starter
///
/// The first fiber to observe the close wins the removal; later calls are
/// no-ops, so CLOSE is emitted at most once per session.
pub(crate) async fn close_upstream(
    state: &RedirectorState,
    handle: &SessionHandle,
    frame_tx: &mpsc::Sender<Frame>,
) {
    handle.cancel.cancel();
    if state.sessions.remove(&handle.id).is_some() {
        state.shreds.remove(&handle.id);
        let _ = frame_tx
            .send(Frame::Close {
                id: handle.id.clone(),
            })
            .await;
    }
}

/// Public socket to control channel
async fn read_loop(
    mut read_half: OwnedReadHalf,
    handle: Arc<SessionHandle>,
    state: Arc<RedirectorState>,
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
                    let max = state.config.max_packet_size;
                    if !forward_chunk(&handle, chunk, max, &frame_tx).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!("Public socket read error on session {}: {}", handle.id, e);
                    break;
                }
            }
        }
    }
    close_upstream(&state, &handle, &frame_tx).await;
}

/// Frame one chunk onto the control channel; false when the writer is gone
async fn forward_chunk(
    handle: &SessionHandle,
    chunk: Bytes,
    max: usize,
    frame_tx: &mpsc::Sender<Frame>,
) -> bool {
    for frame in package_chunk(&handle.id, Some(handle.port), chunk, max) {
        if frame_tx.send(frame).await.is_err() {
            // Control writer has shut down; teardown is under way
            return false;
        }
    }
    true
}

/// Control channel to public socket
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    handle: Arc<SessionHandle>,
    state: Arc<RedirectorState>,
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
                        tracing::debug!(
                            "Public socket write error on session {}: {}",
                            handle.id,
                            e
                        );
                        close_upstream(&state, &handle, &frame_tx).await;
                        return;
                    }
                }
                None => return,
            }
        }
    }
}
