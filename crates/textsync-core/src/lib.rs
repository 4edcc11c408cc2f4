//! textsync-core: Operation-based synchronization of one shared text buffer.
//!
//! This crate provides the sans-IO core:
//! - Positional operations and their relay wire format
//! - Diff extraction from full-buffer snapshots
//! - Atomic handling of composed (IME) input
//! - Echo suppression for operations this session sent
//! - The `Session` state machine that owns the buffer
//! - `DocumentStore` and `RelaySink` collaborator traits

pub mod apply;
pub mod composition;
pub mod diff;
pub mod echo;
pub mod events;
pub mod operation;
pub mod protocol;
pub mod session;
pub mod session_id;
pub mod store;
pub mod transform;
pub mod transport;

pub use apply::{apply, ApplyError};
pub use composition::{CompositionSpan, CompositionTracker, Selection};
pub use diff::extract;
pub use echo::EchoSuppressor;
pub use events::{EngineEvent, EventBus, Subscription};
pub use operation::{Operation, OperationKind, OperationRecord, Origin};
pub use protocol::{OperationMessage, ProtocolError, MAX_MESSAGE_SIZE};
pub use session::{Effect, Input, ManualOperation, Session, SessionConfig, SessionState, DEFAULT_CONTENT};
pub use session_id::{SessionId, SessionIdError};
pub use store::{DocumentStore, InMemoryStore, StoreError};
pub use transform::{OperationTransform, PassThrough};
pub use transport::{RelaySink, TransportError};
