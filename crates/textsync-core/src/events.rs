//! Activity events for display and monitoring.
//!
//! The session publishes an `EngineEvent` for every accepted, suppressed or
//! rejected operation and for I/O failures fed back from the driver.
//! Subscribers hold a `Subscription`; dropping it unsubscribes.

use crate::operation::{Operation, Origin};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> f64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

/// Events emitted by the synchronization session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// An operation mutated the buffer.
    OperationApplied {
        origin: Origin,
        operation: Operation,
        timestamp: f64,
    },
    /// An inbound message was recognized as our own echo.
    EchoSuppressed {
        operation: Operation,
        timestamp: f64,
    },
    /// A remote operation did not fit the buffer and was skipped.
    OperationRejected {
        operation: Operation,
        reason: String,
        timestamp: f64,
    },
    /// An inbound relay message could not be parsed.
    MessageDiscarded { reason: String, timestamp: f64 },
    /// Writing the document to storage failed.
    PersistFailed { reason: String, timestamp: f64 },
    /// Sending an operation to the relay failed.
    SendFailed { reason: String, timestamp: f64 },
    /// The relay connection opened or closed.
    #[serde(rename_all = "camelCase")]
    RelayStateChanged { connected: bool, timestamp: f64 },
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing engine events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(EngineEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(EngineEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds the read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: EngineEvent) {
        // Clone the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
