//! Outgoing connection from a writer to the relay.
//!
//! Sends one text frame per operation and forwards every inbound frame to
//! the driver as a `RelayEvent`. A dropped connection is reported once and
//! not retried.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use textsync_core::{OperationMessage, RelaySink, TransportError, MAX_MESSAGE_SIZE};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Event delivered from the relay connection to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The connection opened
    Opened,
    /// A frame arrived from the relay
    Message(Vec<u8>),
    /// The connection ended
    Closed,
}

/// State of the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingState {
    /// Not yet connected
    Connecting,
    /// Open and usable
    Connected,
    /// Closed (no reconnect)
    Closed,
}

/// Writer-side relay connection.
pub struct RelayClient {
    /// Relay URL (e.g. "ws://localhost:8080")
    pub address: String,
    /// Write half; `None` until connected and again once closed
    write: Arc<Mutex<Option<SplitSink<ClientStream, Message>>>>,
    read_task: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Create a client that is not yet connected.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            write: Arc::new(Mutex::new(None)),
            read_task: None,
        }
    }

    /// Connect to the relay and start forwarding inbound frames.
    pub async fn connect(
        &mut self,
        event_tx: mpsc::UnboundedSender<RelayEvent>,
    ) -> Result<(), TransportError> {
        let (ws_stream, _) = connect_async(&self.address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();
        *self.write.lock().await = Some(write);
        let _ = event_tx.send(RelayEvent::Opened);

        let address = self.address.clone();
        let write = Arc::clone(&self.write);
        let read_task = tokio::spawn(async move {
            Self::read_loop(&address, read, &event_tx).await;
            // Later sends fail fast instead of writing into a dead socket.
            *write.lock().await = None;
            let _ = event_tx.send(RelayEvent::Closed);
        });
        self.read_task = Some(read_task);

        info!("Connected to relay at {}", self.address);
        Ok(())
    }

    async fn read_loop(
        address: &str,
        mut read: SplitStream<ClientStream>,
        event_tx: &mpsc::UnboundedSender<RelayEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Text(text) => text.into_bytes(),
                        Message::Binary(data) => data.to_vec(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", address);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Frame from {} exceeds max size ({} > {}), dropping",
                            address,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    if event_tx.send(RelayEvent::Message(data)).is_err() {
                        // Driver is gone
                        break;
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection to {} closed", address);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", address, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection to {} ended", address);
                    break;
                }
            }
        }
    }

    pub async fn state(&self) -> OutgoingState {
        match (&self.read_task, self.write.lock().await.is_some()) {
            (None, _) => OutgoingState::Connecting,
            (Some(_), true) => OutgoingState::Connected,
            (Some(_), false) => OutgoingState::Closed,
        }
    }

    /// Close the connection.
    pub async fn close(&mut self) {
        if let Some(mut write) = self.write.lock().await.take() {
            let _ = write.send(Message::Close(None)).await;
        }
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl RelaySink for RelayClient {
    async fn send(&self, msg: &OperationMessage) -> Result<(), TransportError> {
        let mut guard = self.write.lock().await;
        let write = guard.as_mut().ok_or(TransportError::NotConnected)?;
        write
            .send(Message::Text(msg.to_json().into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
                other => TransportError::SendFailed(other.to_string()),
            })
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use textsync_core::Operation;

    #[tokio::test]
    async fn test_new_client_is_connecting() {
        let client = RelayClient::new("ws://localhost:8080");
        assert_eq!(client.address, "ws://localhost:8080");
        assert_eq!(client.state().await, OutgoingState::Connecting);
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = RelayClient::new("ws://localhost:8080");
        let msg = OperationMessage::bare(Operation::insert(0, "a"));
        assert!(matches!(
            client.send(&msg).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = RelayClient::new(format!("ws://{}", addr));
        assert!(matches!(
            client.connect(tx).await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }
}
