//! Operation: a single positional edit to the shared document.
//!
//! Offsets and lengths count Unicode scalar values (`char`s), never bytes,
//! so an operation can only ever split the buffer on a character boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// The three edit shapes an operation can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Delete,
    Replace,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Delete => write!(f, "delete"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

/// One atomic edit, positioned against the buffer as it existed
/// immediately before the edit.
///
/// Wire format: `{"type":"replace","position":4,"length":3,"content":"ran"}`.
/// `length` is omitted for inserts and `content` is omitted for deletes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Operation {
    pub fn insert(position: usize, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Insert,
            position,
            length: None,
            content: Some(content.into()),
        }
    }

    pub fn delete(position: usize, length: usize) -> Self {
        Self {
            kind: OperationKind::Delete,
            position,
            length: Some(length),
            content: None,
        }
    }

    pub fn replace(position: usize, length: usize, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Replace,
            position,
            length: Some(length),
            content: Some(content.into()),
        }
    }

    /// Number of characters removed at `position` (always 0 for inserts).
    pub fn deleted_len(&self) -> usize {
        match self.kind {
            OperationKind::Insert => 0,
            _ => self.length.unwrap_or(0),
        }
    }

    /// Text spliced in at `position` (always empty for deletes).
    pub fn inserted(&self) -> &str {
        match self.kind {
            OperationKind::Delete => "",
            _ => self.content.as_deref().unwrap_or(""),
        }
    }

    /// Serialize to a compact JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Operation serialization should not fail")
    }
}

/// Where an operation came from. Only used for the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// An operation tagged with its origin, as shown in the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub origin: Origin,
    pub operation: Operation,
}

impl OperationRecord {
    pub fn local(operation: Operation) -> Self {
        Self {
            origin: Origin::Local,
            operation,
        }
    }

    pub fn remote(operation: Operation) -> Self {
        Self {
            origin: Origin::Remote,
            operation,
        }
    }
}

impl Display for OperationRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.origin, self.operation.to_json())
    }
}
