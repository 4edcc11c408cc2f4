//! Relay wire protocol.
//!
//! Every relay message is one JSON object describing exactly one operation.
//! The sender's session id and sequence number ride along in the same
//! object so a bare operation from a writer that doesn't tag its messages
//! is still a valid message:
//!
//! ```json
//! {"type":"insert","position":3,"content":"中","origin":"a1b2c3d4e5f67890","seq":7}
//! {"type":"delete","position":2,"length":2}
//! ```

use crate::operation::{Operation, OperationKind};
use crate::session_id::SessionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum relay message size (1 MiB). Larger frames are dropped unparsed.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Message too large: {size} > {max} bytes")]
    TooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// One operation as it travels over the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct OperationMessage {
    #[serde(flatten)]
    pub operation: Operation,
    /// Session that produced the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<SessionId>,
    /// Sender-local sequence number, starting at 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl OperationMessage {
    /// A message tagged with its sender identity.
    pub fn tagged(operation: Operation, origin: SessionId, seq: u64) -> Self {
        Self {
            operation,
            origin: Some(origin),
            seq: Some(seq),
        }
    }

    /// A message with no sender identity.
    pub fn bare(operation: Operation) -> Self {
        Self {
            operation,
            origin: None,
            seq: None,
        }
    }

    /// Serialize to a compact JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("OperationMessage serialization should not fail")
    }

    /// Parse and validate a message from raw frame bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Unvalidated wire shape. Every field optional so validation can say
/// precisely what is missing.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: OperationKind,
    position: Option<usize>,
    length: Option<usize>,
    content: Option<String>,
    origin: Option<SessionId>,
    seq: Option<u64>,
}

impl TryFrom<RawMessage> for OperationMessage {
    type Error = String;

    fn try_from(raw: RawMessage) -> std::result::Result<Self, Self::Error> {
        let position = raw
            .position
            .ok_or_else(|| format!("{} is missing position", raw.kind))?;

        let operation = match raw.kind {
            OperationKind::Insert => {
                let content = raw.content.ok_or("insert is missing content")?;
                Operation::insert(position, content)
            }
            OperationKind::Delete => {
                let length = raw.length.ok_or("delete is missing length")?;
                Operation::delete(position, length)
            }
            OperationKind::Replace => {
                let length = raw.length.ok_or("replace is missing length")?;
                let content = raw.content.ok_or("replace is missing content")?;
                Operation::replace(position, length, content)
            }
        };

        Ok(Self {
            operation,
            origin: raw.origin,
            seq: raw.seq,
        })
    }
}
