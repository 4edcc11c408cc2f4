//! RelaySink trait: the outgoing half of the relay connection.
//!
//! Inbound relay messages reach the session as raw frames through the
//! driver's event channel, so only sending needs an abstraction here.

use crate::protocol::OperationMessage;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Sends one operation message per call. Implementations must not batch,
/// queue for later, or retry.
#[async_trait]
pub trait RelaySink: Send + Sync {
    async fn send(&self, msg: &OperationMessage) -> Result<()>;
}
