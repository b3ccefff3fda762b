//! Control-session integration tests
//!
//! Drives a real redirector over localhost TCP, playing the starter's side
//! of the protocol directly with the frame codec.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use bh_core::config::RedirectorConfig;
use bh_protocol::digest::{sha1_hex, sha512_hex};
use bh_protocol::{split_body, Frame, FrameCodec, SessionId};
use bh_redirector::Redirector;

const SECRET: &str = "hunter2";
const SEP: &str = "\r\n";

type Control = Framed<TcpStream, FrameCodec>;

/// Reserve a port that is free right now
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn test_config(listen: u16) -> RedirectorConfig {
    RedirectorConfig {
        auth: SECRET.to_string(),
        separator: SEP.to_string(),
        listen,
        bind_address: "127.0.0.1".to_string(),
        ..Default::default()
    }
}

async fn start_redirector(listen: u16) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let redirector = Redirector::bind(test_config(listen), cancel.clone())
        .await
        .expect("bind redirector");
    let handle = tokio::spawn(async move {
        let _ = redirector.run().await;
    });
    (cancel, handle)
}

/// Connect with retries in case the listener is not up yet
async fn connect_retry(port: u16) -> TcpStream {
    let mut last_err = None;
    for _ in 0..50 {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => return stream,
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
    panic!("failed to connect to 127.0.0.1:{}: {:?}", port, last_err);
}

async fn open_control(listen: u16) -> Control {
    let stream = connect_retry(listen).await;
    Framed::new(stream, FrameCodec::new(SEP))
}

/// Open a control session and advertise one public port
async fn establish(listen: u16, public: u16) -> Control {
    let mut control = open_control(listen).await;
    control
        .send(Frame::Auth {
            secret: SECRET.to_string(),
            ports: vec![public],
        })
        .await
        .unwrap();
    control
}

async fn next_frame(control: &mut Control) -> Frame {
    timeout(Duration::from_secs(2), control.next())
        .await
        .expect("timed out waiting for frame")
        .expect("control channel closed")
        .expect("decode error")
}

#[tokio::test]
async fn test_wrong_secret_closes_control() {
    let listen = free_port();
    let public = free_port();
    let (_cancel, _handle) = start_redirector(listen).await;

    let mut control = open_control(listen).await;
    control
        .send(Frame::Auth {
            secret: "not-the-secret".to_string(),
            ports: vec![public],
        })
        .await
        .unwrap();

    // The redirector drops the connection without a reply
    let next = timeout(Duration::from_secs(2), control.next())
        .await
        .expect("timed out waiting for close");
    assert!(next.is_none());

    // And never opened the advertised port
    assert!(TcpStream::connect(("127.0.0.1", public)).await.is_err());
}

#[tokio::test]
async fn test_non_auth_first_frame_is_rejected() {
    let listen = free_port();
    let (_cancel, _handle) = start_redirector(listen).await;

    let mut control = open_control(listen).await;
    control
        .send(Frame::Close {
            id: SessionId::generate(),
        })
        .await
        .unwrap();

    let next = timeout(Duration::from_secs(2), control.next())
        .await
        .expect("timed out waiting for close");
    assert!(next.is_none());
}

#[tokio::test]
async fn test_data_roundtrip_and_close() {
    let listen = free_port();
    let public = free_port();
    let (_cancel, _handle) = start_redirector(listen).await;
    let mut control = establish(listen, public).await;

    let mut client = connect_retry(public).await;
    let request = b"GET / HTTP/1.0\r\n\r\n";
    client.write_all(request).await.unwrap();

    // The request arrives framed, tagged with the public port
    let (id, port, body) = match next_frame(&mut control).await {
        Frame::Data { id, port, body } => (id, port, body),
        other => panic!("expected DATA, got {:?}", other),
    };
    assert_eq!(port, Some(public));
    assert_eq!(&body[..], request);

    // Reply on the same session, without a port token
    let response = b"HTTP/1.0 200 OK\r\n\r\nhi";
    control
        .send(Frame::Data {
            id: id.clone(),
            port: None,
            body: Bytes::from_static(response),
        })
        .await
        .unwrap();

    let mut received = vec![0u8; response.len()];
    timeout(Duration::from_secs(2), client.read_exact(&mut received))
        .await
        .expect("timed out reading response")
        .unwrap();
    assert_eq!(&received, response);

    // Closing the client surfaces as CLOSE upstream
    drop(client);
    match next_frame(&mut control).await {
        Frame::Close { id: closed } => assert_eq!(closed, id),
        other => panic!("expected CLOSE, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_session_gets_close_reply() {
    let listen = free_port();
    let public = free_port();
    let (_cancel, _handle) = start_redirector(listen).await;
    let mut control = establish(listen, public).await;

    let stray = SessionId::generate();
    control
        .send(Frame::Data {
            id: stray.clone(),
            port: None,
            body: Bytes::from_static(b"nobody home"),
        })
        .await
        .unwrap();

    match next_frame(&mut control).await {
        Frame::Close { id } => assert_eq!(id, stray),
        other => panic!("expected CLOSE, got {:?}", other),
    }
}

#[tokio::test]
async fn test_corrupt_digest_is_dropped_session_survives() {
    let listen = free_port();
    let public = free_port();
    let (_cancel, _handle) = start_redirector(listen).await;
    let mut control = establish(listen, public).await;

    let mut client = connect_retry(public).await;
    client.write_all(b"hello").await.unwrap();
    let id = match next_frame(&mut control).await {
        Frame::Data { id, .. } => id,
        other => panic!("expected DATA, got {:?}", other),
    };

    // Hand-craft a DATA frame with one flipped SHA-1 hex digit
    let body = b"poisoned";
    let mut sha1 = sha1_hex(body);
    let flipped = if sha1.starts_with('0') { "1" } else { "0" };
    sha1.replace_range(0..1, flipped);
    let raw = format!(
        "DATA {} {} {} {}{}",
        id,
        sha1,
        sha512_hex(body),
        body.len(),
        SEP
    );
    let stream = control.get_mut();
    stream.write_all(raw.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    // The next correctly framed DATA on the same session still delivers
    let good = b"clean payload";
    control
        .send(Frame::Data {
            id,
            port: None,
            body: Bytes::from_static(good),
        })
        .await
        .unwrap();

    let mut received = vec![0u8; good.len()];
    timeout(Duration::from_secs(2), client.read_exact(&mut received))
        .await
        .expect("timed out reading")
        .unwrap();
    assert_eq!(&received, good);
}

#[tokio::test]
async fn test_shreds_reassemble_out_of_order() {
    let listen = free_port();
    let public = free_port();
    let (_cancel, _handle) = start_redirector(listen).await;
    let mut control = establish(listen, public).await;

    let mut client = connect_retry(public).await;
    client.write_all(b"x").await.unwrap();
    let id = match next_frame(&mut control).await {
        Frame::Data { id, .. } => id,
        other => panic!("expected DATA, got {:?}", other),
    };

    let payload = Bytes::from((0..1024u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>());
    let fragments = split_body(&payload, 384);
    assert_eq!(fragments.len(), 3);

    for index in [2u32, 3, 1] {
        control
            .send(Frame::Shred {
                id: id.clone(),
                port: None,
                index,
                total: 3,
                body: fragments[index as usize - 1].clone(),
            })
            .await
            .unwrap();
    }

    let mut received = vec![0u8; payload.len()];
    timeout(Duration::from_secs(2), client.read_exact(&mut received))
        .await
        .expect("timed out reading reassembled payload")
        .unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_control_drop_tears_down_and_relistens() {
    let listen = free_port();
    let public = free_port();
    let (_cancel, _handle) = start_redirector(listen).await;

    let control = establish(listen, public).await;
    let mut client = connect_retry(public).await;

    // Dropping the control channel must close the public side
    drop(control);
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("timed out waiting for teardown");
    assert_eq!(read.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(("127.0.0.1", public)).await.is_err());

    // A new control session brings the port back
    let _control = establish(listen, public).await;
    let _client = connect_retry(public).await;
}
