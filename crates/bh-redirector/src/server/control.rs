//! Control-session state machine
//!
//! One control session at a time: authenticate, bring up the advertised
//! public listeners, then shuttle frames until the channel drops. All
//! writes to the control socket are serialized through a single writer
//! task so frames stay atomic and slow links push back on every reader.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use bh_protocol::{Frame, FrameCodec, SessionId, ShredBuffer};

use crate::session;
use crate::state::RedirectorState;

/// Capacity of the queue feeding the control-channel writer.
///
/// Every public-socket reader enqueues here; when the control link is
/// slower than the public sockets combined, senders block and stop
/// reading, which is the backpressure path.
pub(crate) const CONTROL_QUEUE_CAPACITY: usize = 256;

/// How long an accepted control connection may take to present AUTH
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after an accept error before retrying, so fd exhaustion does not
/// spin the loop
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type ControlSink = SplitSink<Framed<TcpStream, FrameCodec>, Frame>;
type ControlStream = SplitStream<Framed<TcpStream, FrameCodec>>;

/// Drive one control session from AUTH to teardown
///
/// Returns once the control channel has closed or errored; derived state
/// is cleared before returning so the caller can accept the next starter.
pub(crate) async fn run_control_session(
    state: Arc<RedirectorState>,
    socket: TcpStream,
    peer: SocketAddr,
    shutdown: &CancellationToken,
) -> Result<()> {
    let codec = FrameCodec::new(state.config.separator.clone());
    let mut framed = Framed::new(socket, codec);

    let ports = match authenticate(&state, &mut framed, peer).await {
        Some(ports) => ports,
        None => return Ok(()),
    };
    tracing::info!(
        "Control session established with {}, advertised ports {:?}",
        peer,
        ports
    );

    let cancel = shutdown.child_token();
    let (frame_tx, frame_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
    let (sink, stream) = framed.split();

    let writer = tokio::spawn(write_loop(sink, frame_rx, cancel.clone()));

    let mut bound = Vec::new();
    for port in ports {
        match TcpListener::bind((state.config.bind_address.as_str(), port)).await {
            Ok(listener) => {
                tracing::info!("Public listener on port {}", port);
                bound.push(port);
                tokio::spawn(accept_loop(
                    listener,
                    port,
                    Arc::clone(&state),
                    frame_tx.clone(),
                    cancel.clone(),
                ));
            }
            Err(e) => {
                // The other advertised ports are unaffected
                tracing::error!("Failed to bind public port {}: {}", port, e);
            }
        }
    }
    state.set_ports(bound);

    let result = read_loop(stream, &state, &frame_tx, &cancel).await;

    cancel.cancel();
    state.clear();
    drop(frame_tx);
    let _ = writer.await;
    tracing::info!("Control session with {} closed", peer);
    result
}

/// Expect exactly one AUTH frame and check the secret
///
/// Any other frame, a bad secret, or silence past the timeout rejects the
/// connection. Malformed AUTH headers are discarded by the codec, so they
/// surface here as a timeout.
async fn authenticate(
    state: &RedirectorState,
    framed: &mut Framed<TcpStream, FrameCodec>,
    peer: SocketAddr,
) -> Option<Vec<u16>> {
    let first = match tokio::time::timeout(AUTH_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(frame))) => frame,
        Ok(Some(Err(e))) => {
            tracing::warn!("Rejecting control connection from {}: {}", peer, e);
            return None;
        }
        Ok(None) => {
            tracing::debug!("Control connection from {} closed before AUTH", peer);
            return None;
        }
        Err(_) => {
            tracing::warn!("Rejecting control connection from {}: no AUTH frame", peer);
            return None;
        }
    };

    match first {
        Frame::Auth { secret, ports } if secret == state.config.auth => Some(ports),
        Frame::Auth { .. } => {
            tracing::warn!("Rejecting control connection from {}: bad secret", peer);
            None
        }
        other => {
            tracing::warn!(
                "Rejecting control connection from {}: expected AUTH, got {}",
                peer,
                other.packet_type()
            );
            None
        }
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

/// Accept public connections on one advertised port
async fn accept_loop(
    listener: TcpListener,
    port: u16,
    state: Arc<RedirectorState>,
    frame_tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((socket, client)) => {
                    let id = state.sessions.allocate_id();
                    tracing::debug!(
                        "Public connection from {} on port {} assigned session {}",
                        client,
                        port,
                        id
                    );
                    session::spawn(
                        Arc::clone(&state),
                        socket,
                        id,
                        port,
                        frame_tx.clone(),
                        &cancel,
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to accept on public port {}: {}", port, e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
    // Dropping the listener closes the port
}

/// Dispatch inbound control frames until the channel ends
async fn read_loop(
    mut stream: ControlStream,
    state: &Arc<RedirectorState>,
    frame_tx: &mpsc::Sender<Frame>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next() => match next {
                None => {
                    tracing::info!("Control channel closed by starter");
                    return Ok(());
                }
                Some(Err(e)) => {
                    tracing::warn!("Control channel read failed: {}", e);
                    return Err(e.into());
                }
                Some(Ok(frame)) => dispatch(state, frame, frame_tx).await,
            }
        }
    }
}

/// Handle one frame from the starter
async fn dispatch(state: &Arc<RedirectorState>, frame: Frame, frame_tx: &mpsc::Sender<Frame>) {
    match frame {
        Frame::Data { id, body, .. } => deliver(state, id, body, frame_tx).await,

        Frame::Shred {
            id,
            index,
            total,
            body,
            ..
        } => {
            let Some(handle) = state.sessions.get(&id) else {
                reject_unknown(id, frame_tx).await;
                return;
            };
            let result = {
                let mut buffer = state
                    .shreds
                    .entry(id.clone())
                    .or_insert_with(|| ShredBuffer::new(total));
                buffer.insert(index, total, body)
            };
            match result {
                Ok(Some(joined)) => {
                    state.shreds.remove(&id);
                    deliver(state, id, joined, frame_tx).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Reassembly failed for session {}: {}", id, e);
                    session::close_upstream(state, &handle, frame_tx).await;
                }
            }
        }

        Frame::Close { id } => {
            if let Some(handle) = state.sessions.remove(&id) {
                tracing::debug!("Starter closed session {}", id);
                handle.close();
            }
            state.shreds.remove(&id);
        }

        Frame::Auth { .. } => {
            tracing::warn!("Unexpected AUTH on established control session, discarding");
        }
    }
}

/// Write payload to a session's public socket, or report the id as dead
async fn deliver(
    state: &Arc<RedirectorState>,
    id: SessionId,
    body: bytes::Bytes,
    frame_tx: &mpsc::Sender<Frame>,
) {
    match state.sessions.get(&id) {
        Some(handle) => {
            // A send error means the write fiber is gone and the session
            // is already being torn down
            let _ = handle.tx.send(body).await;
        }
        None => reject_unknown(id, frame_tx).await,
    }
}

/// Tell the starter an id is not live on this side
async fn reject_unknown(id: SessionId, frame_tx: &mpsc::Sender<Frame>) {
    tracing::debug!("Frame for unknown session {}, replying CLOSE", id);
    let _ = frame_tx.send(Frame::Close { id }).await;
}
