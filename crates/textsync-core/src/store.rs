//! DocumentStore trait: the durable home of the full document body.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `FileStore` (in textsync-daemon) - Uses tokio::fs
//! - `HttpStore` (in textsync-daemon) - Talks to the content API
//!
//! Every write replaces the whole document. There is no conditional write,
//! so the last writer wins.

use async_trait::async_trait;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Read failed: {0}")]
    Read(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the stored document. `None` when nothing has been stored yet.
    async fn read(&self) -> Result<Option<String>>;

    /// Replace the stored document.
    async fn write(&self, content: &str) -> Result<()>;
}

/// In-memory store for testing and for running the content API without
/// durable storage.
#[derive(Default)]
pub struct InMemoryStore {
    content: RwLock<Option<String>>,
    writes: RwLock<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(content: &str) -> Self {
        Self {
            content: RwLock::new(Some(content.to_string())),
            writes: RwLock::new(0),
        }
    }

    /// Current content, bypassing the async API.
    pub fn snapshot(&self) -> Option<String> {
        self.content.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of completed writes.
    pub fn write_count(&self) -> usize {
        *self.writes.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn read(&self) -> Result<Option<String>> {
        Ok(self.snapshot())
    }

    async fn write(&self, content: &str) -> Result<()> {
        *self.content.write().unwrap_or_else(|e| e.into_inner()) = Some(content.to_string());
        *self.writes.write().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
