//! textsync-daemon library: I/O around the textsync-core session.
//!
//! Exposes the relay server, the content API, the writer-side driver and
//! its editing surfaces so the binary and integration tests share them.

pub mod api;
pub mod client;
pub mod connection;
pub mod console;
pub mod http_store;
pub mod native_store;
pub mod outgoing;
pub mod server;
pub mod watcher;

// Re-export key types for convenience
pub use api::{ApiState, DOC_PATH};
pub use client::{Request, Snapshot, SyncLoop};
pub use connection::{ConnectionEvent, IncomingFrame, RelayConnection};
pub use http_store::HttpStore;
pub use native_store::FileStore;
pub use outgoing::{OutgoingState, RelayClient, RelayEvent};
pub use server::{RelayServer, ServerEvent};
pub use watcher::{FileEventKind, FileWatcher};
