//! Writer-side driver: runs a `Session` against real I/O.
//!
//! `SyncLoop` owns the session and serializes three event sources with one
//! `tokio::select!` loop:
//! - local requests from the editing surface
//! - frames and state changes from the relay connection
//! - completions of persist and send work
//!
//! Persist and send effects are handed to one worker task each, so the
//! store sees writes and the relay sees operations in the order the
//! session produced them. Their results come back as inputs.

use std::sync::Arc;

use textsync_core::{
    DocumentStore, Effect, EventBus, Input, OperationMessage, OperationRecord, RelaySink, Session,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::outgoing::RelayEvent;

/// A request from the editing surface.
#[derive(Debug)]
pub enum Request {
    /// Feed an input to the session.
    Apply(Input),
    /// Ask for the current session state.
    Snapshot(oneshot::Sender<Snapshot>),
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub buffer: String,
    pub composing: bool,
    pub pending: usize,
    pub log: Vec<OperationRecord>,
}

pub struct SyncLoop<S, R> {
    session: Session,
    store: Arc<S>,
    relay: Arc<R>,
    relay_rx: Option<mpsc::UnboundedReceiver<RelayEvent>>,
    surface_tx: mpsc::UnboundedSender<String>,
    completion_tx: mpsc::UnboundedSender<Input>,
    completion_rx: mpsc::UnboundedReceiver<Input>,
    /// Persists and sends handed to workers but not yet completed
    in_flight: usize,
}

impl<S, R> SyncLoop<S, R>
where
    S: DocumentStore + 'static,
    R: RelaySink + 'static,
{
    /// Displayed text is delivered on `surface_tx`.
    pub fn new(
        session: Session,
        store: Arc<S>,
        relay: Arc<R>,
        surface_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            session,
            store,
            relay,
            relay_rx: None,
            surface_tx,
            completion_tx,
            completion_rx,
            in_flight: 0,
        }
    }

    /// Receive relay frames and state changes from `relay_rx`.
    pub fn with_relay_events(mut self, relay_rx: mpsc::UnboundedReceiver<RelayEvent>) -> Self {
        self.relay_rx = Some(relay_rx);
        self
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(self.session.events())
    }

    /// Bootstrap from the store, then process events until `local_rx`
    /// closes. Outstanding persists and sends are awaited before the
    /// session is returned.
    pub async fn run(mut self, mut local_rx: mpsc::UnboundedReceiver<Request>) -> Session {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        self.spawn_persist_worker(persist_rx);
        self.spawn_send_worker(send_rx);

        let loaded = self.store.read().await.map_err(|e| e.to_string());
        self.dispatch(Input::Loaded(loaded), &persist_tx, &send_tx);

        loop {
            tokio::select! {
                request = local_rx.recv() => {
                    match request {
                        Some(Request::Apply(input)) => self.dispatch(input, &persist_tx, &send_tx),
                        Some(Request::Snapshot(reply)) => {
                            let _ = reply.send(self.snapshot());
                        }
                        None => break,
                    }
                }

                event = next_relay_event(&mut self.relay_rx) => {
                    match event {
                        Some(RelayEvent::Opened) => self.dispatch(Input::RelayOpened, &persist_tx, &send_tx),
                        Some(RelayEvent::Message(data)) => {
                            self.dispatch(Input::Remote(data), &persist_tx, &send_tx)
                        }
                        Some(RelayEvent::Closed) => self.dispatch(Input::RelayClosed, &persist_tx, &send_tx),
                        None => {
                            debug!("Relay event channel closed");
                            self.relay_rx = None;
                        }
                    }
                }

                Some(completion) = self.completion_rx.recv() => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.dispatch(completion, &persist_tx, &send_tx);
                }
            }
        }

        drop(persist_tx);
        drop(send_tx);
        while self.in_flight > 0 {
            let Some(completion) = self.completion_rx.recv().await else {
                break;
            };
            self.in_flight -= 1;
            // Completions never produce further persists or sends
            for effect in self.session.handle(completion) {
                if let Effect::Display(text) = effect {
                    let _ = self.surface_tx.send(text);
                }
            }
        }

        info!("Sync loop stopped");
        self.session
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            buffer: self.session.buffer().to_string(),
            composing: self.session.is_composing(),
            pending: self.session.pending_len(),
            log: self.session.log().cloned().collect(),
        }
    }

    fn dispatch(
        &mut self,
        input: Input,
        persist_tx: &mpsc::UnboundedSender<String>,
        send_tx: &mpsc::UnboundedSender<OperationMessage>,
    ) {
        for effect in self.session.handle(input) {
            match effect {
                Effect::Persist(content) => {
                    if persist_tx.send(content).is_ok() {
                        self.in_flight += 1;
                    }
                }
                Effect::Send(msg) => {
                    if send_tx.send(msg).is_ok() {
                        self.in_flight += 1;
                    }
                }
                Effect::Display(text) => {
                    if self.surface_tx.send(text).is_err() {
                        debug!("Surface closed, dropping display update");
                    }
                }
            }
        }
    }

    fn spawn_persist_worker(&self, mut persist_rx: mpsc::UnboundedReceiver<String>) {
        let store = Arc::clone(&self.store);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            while let Some(content) = persist_rx.recv().await {
                let result = store.write(&content).await.map_err(|e| e.to_string());
                if completion_tx.send(Input::PersistFinished(result)).is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_send_worker(&self, mut send_rx: mpsc::UnboundedReceiver<OperationMessage>) {
        let relay = Arc::clone(&self.relay);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = send_rx.recv().await {
                let seq = msg.seq.unwrap_or_default();
                let result = relay.send(&msg).await.map_err(|e| e.to_string());
                if completion_tx.send(Input::SendFinished { seq, result }).is_err() {
                    break;
                }
            }
        });
    }
}

async fn next_relay_event(
    relay_rx: &mut Option<mpsc::UnboundedReceiver<RelayEvent>>,
) -> Option<RelayEvent> {
    match relay_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
