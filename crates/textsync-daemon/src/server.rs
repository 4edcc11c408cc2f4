//! Relay server: forwards every frame from one writer to the others.
//!
//! The relay holds no document state and never inspects payloads. Frames
//! are forwarded verbatim in the order they were received. With
//! `echo_to_sender` enabled the sender gets its own frame back too, which
//! is what writers' echo suppression expects from a naive broadcast relay.

use crate::connection::{ConnectionEvent, IncomingFrame, RelayConnection};
use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use textsync_core::OperationMessage;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Time a new client gets to complete the WebSocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Upgraded = (WebSocketStream<TcpStream>, SocketAddr);

/// Event surfaced by the relay to its run loop.
#[derive(Debug)]
pub enum ServerEvent {
    /// A frame from a connected writer.
    Frame(IncomingFrame),
    /// A writer disconnected.
    Disconnected { conn_id: String },
}

/// WebSocket relay managing writer connections.
pub struct RelayServer {
    /// Open connections indexed by conn_id
    connections: HashMap<String, RelayConnection>,
    /// Counter for generating connection IDs
    next_conn_id: u64,
    /// Also deliver each frame back to the writer that sent it
    echo_to_sender: bool,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    /// Upgrades finished by handshake tasks
    upgrade_tx: mpsc::UnboundedSender<Upgraded>,
    upgrade_rx: mpsc::UnboundedReceiver<Upgraded>,
    handshake_timeout: Duration,
}

impl RelayServer {
    pub fn new(echo_to_sender: bool) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (upgrade_tx, upgrade_rx) = mpsc::unbounded_channel();

        Self {
            connections: HashMap::new(),
            next_conn_id: 1,
            echo_to_sender,
            event_tx,
            event_rx,
            upgrade_tx,
            upgrade_rx,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Upgrade a new TCP connection in the background.
    ///
    /// The connection joins the relay once the upgrade completes; clients
    /// that don't finish it within the handshake timeout are dropped.
    pub fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let upgrade_tx = self.upgrade_tx.clone();
        let limit = self.handshake_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(limit, accept_async(stream)).await {
                Ok(Ok(ws_stream)) => {
                    let _ = upgrade_tx.send((ws_stream, addr));
                }
                Ok(Err(e)) => {
                    // Health checks connect and close without completing the upgrade.
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before upgrade from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                }
                Err(_) => warn!("WebSocket upgrade from {} timed out after {:?}", addr, limit),
            }
        });
    }

    fn register(&mut self, ws_stream: WebSocketStream<TcpStream>, addr: SocketAddr) {
        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;

        info!("New connection from {} (conn_id: {})", addr, conn_id);

        let conn = RelayConnection::new(conn_id.clone(), ws_stream, self.event_tx.clone());
        self.connections.insert(conn_id, conn);
    }

    /// Wait for the next frame or disconnect, registering upgraded
    /// connections as they arrive.
    pub async fn poll_event(&mut self) -> Option<ServerEvent> {
        loop {
            tokio::select! {
                biased;

                Some((ws_stream, addr)) = self.upgrade_rx.recv() => {
                    self.register(ws_stream, addr);
                }

                event = self.event_rx.recv() => {
                    return match event? {
                        ConnectionEvent::Frame(frame) => Some(ServerEvent::Frame(frame)),
                        ConnectionEvent::Closed { conn_id } => {
                            self.connections.remove(&conn_id);
                            info!("Connection closed: {}", conn_id);
                            Some(ServerEvent::Disconnected { conn_id })
                        }
                    };
                }
            }
        }
    }

    /// Forward a frame to every writer that should see it.
    pub async fn relay(&self, frame: &IncomingFrame) {
        if let Err(e) = OperationMessage::from_json(&frame.data) {
            debug!("Relaying unrecognized frame from {}: {}", frame.conn_id, e);
        }
        if self.echo_to_sender {
            self.broadcast(&frame.data).await;
        } else {
            self.broadcast_except(&frame.data, &frame.conn_id).await;
        }
        debug!(
            "Relayed {} bytes from {} to {} connection(s)",
            frame.data.len(),
            frame.conn_id,
            self.recipient_count()
        );
    }

    /// Broadcast data to all connections.
    pub async fn broadcast(&self, data: &[u8]) {
        for (conn_id, conn) in &self.connections {
            if let Err(e) = conn.send(data).await {
                warn!("Failed to broadcast to {}: {}", conn_id, e);
            }
        }
    }

    /// Broadcast data to all connections except one.
    pub async fn broadcast_except(&self, data: &[u8], exclude_conn_id: &str) {
        for (conn_id, conn) in &self.connections {
            if conn_id == exclude_conn_id {
                continue;
            }
            if let Err(e) = conn.send(data).await {
                warn!("Failed to relay to {}: {}", conn_id, e);
            }
        }
    }

    fn recipient_count(&self) -> usize {
        if self.echo_to_sender {
            self.connections.len()
        } else {
            self.connections.len().saturating_sub(1)
        }
    }

    /// Accept and relay until the event channel closes.
    pub async fn run(mut self, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept_connection(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }

                event = self.poll_event() => {
                    match event {
                        Some(ServerEvent::Frame(frame)) => self.relay(&frame).await,
                        Some(ServerEvent::Disconnected { .. }) => {}
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }
}
