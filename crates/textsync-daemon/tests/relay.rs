//! End-to-end tests for the relay server.
//!
//! Real WebSocket clients connect to a relay bound to a random port.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use textsync_core::{Operation, OperationMessage, SessionId};
use textsync_daemon::RelayServer;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Test client that connects to the relay.
struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{}", addr);
        let (ws, _) = connect_async(&url).await.expect("Failed to connect");
        Self { ws }
    }

    async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("Failed to send message");
    }

    async fn recv_message(&mut self) -> Vec<u8> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Text(text))) => return text.into_bytes(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => panic!("Connection closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {}", e),
                None => panic!("Stream ended unexpectedly"),
                _ => continue,
            }
        }
    }

    async fn recv_text(&mut self) -> String {
        let data = timeout(Duration::from_secs(5), self.recv_message())
            .await
            .expect("Timeout waiting for message");
        String::from_utf8(data).expect("Relay frames are UTF-8")
    }

    /// Assert nothing arrives within a short window.
    async fn expect_silence(&mut self) {
        let result = timeout(Duration::from_millis(300), self.recv_message()).await;
        assert!(result.is_err(), "Expected no message");
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn start_relay(echo_to_sender: bool) -> SocketAddr {
    spawn_relay(RelayServer::new(echo_to_sender)).await
}

async fn spawn_relay(server: RelayServer) -> SocketAddr {
    let listener = RelayServer::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get address");
    tokio::spawn(server.run(listener));
    addr
}

fn op_frame(op: Operation, seq: u64) -> String {
    OperationMessage::tagged(op, SessionId::from(0x42), seq).to_json()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_frame_reaches_other_writers_and_sender() {
    let addr = start_relay(true).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;

    let frame = op_frame(Operation::insert(6, "there "), 1);
    alice.send_text(&frame).await;

    assert_eq!(bob.recv_text().await, frame);
    assert_eq!(alice.recv_text().await, frame);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_no_echo_mode_skips_sender() {
    let addr = start_relay(false).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;

    let frame = op_frame(Operation::delete(2, 2), 1);
    alice.send_text(&frame).await;

    assert_eq!(bob.recv_text().await, frame);
    alice.expect_silence().await;
}

#[tokio::test]
async fn test_frames_are_forwarded_in_order() {
    let addr = start_relay(false).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;

    let frames: Vec<String> = (1..=5)
        .map(|seq| op_frame(Operation::insert(0, seq.to_string()), seq))
        .collect();
    for frame in &frames {
        alice.send_text(frame).await;
    }

    for frame in &frames {
        assert_eq!(&bob.recv_text().await, frame);
    }
}

#[tokio::test]
async fn test_unrecognized_frames_are_forwarded_verbatim() {
    let addr = start_relay(false).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;

    alice.send_text("not an operation").await;
    assert_eq!(bob.recv_text().await, "not an operation");
}

#[tokio::test]
async fn test_relay_survives_disconnect() {
    let addr = start_relay(false).await;
    let alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    let mut carol = TestClient::connect(addr).await;

    alice.close().await;
    // Give the relay time to observe the close
    tokio::time::sleep(Duration::from_millis(100)).await;

    let frame = op_frame(Operation::replace(4, 3, "ran"), 7);
    bob.send_text(&frame).await;
    assert_eq!(carol.recv_text().await, frame);
}

#[tokio::test]
async fn test_pending_upgrade_does_not_block_relaying() {
    let addr = start_relay(false).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;

    // Connects but never sends the upgrade request
    let _idle = TcpStream::connect(addr).await.expect("Failed to connect");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let frame = op_frame(Operation::insert(0, "x"), 1);
    alice.send_text(&frame).await;
    assert_eq!(bob.recv_text().await, frame);

    // Writers can still join
    let mut carol = TestClient::connect(addr).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let frame = op_frame(Operation::insert(1, "y"), 2);
    alice.send_text(&frame).await;
    assert_eq!(carol.recv_text().await, frame);
}

#[tokio::test]
async fn test_stalled_upgrade_is_dropped() {
    let server = RelayServer::new(false).with_handshake_timeout(Duration::from_millis(200));
    let addr = spawn_relay(server).await;

    let mut idle = TcpStream::connect(addr).await.expect("Failed to connect");
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), idle.read(&mut buf))
        .await
        .expect("Relay kept the stalled connection open");

    // Closed without a response: EOF or reset
    assert!(matches!(read, Ok(0) | Err(_)));
}
