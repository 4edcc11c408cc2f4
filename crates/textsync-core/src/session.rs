//! Session: the synchronization loop as a pure state machine.
//!
//! The session exclusively owns the document buffer. Every event source
//! (local edits, composition notifications, relay frames, I/O completions)
//! is fed in as an [`Input`] one at a time, and each call returns the
//! [`Effect`]s the driver must carry out. The session never does I/O, so
//! mutations are serialized simply by calling [`Session::handle`] from one
//! place.
//!
//! ```text
//!            compositionStart
//!   Idle ────────────────────────▶ Composing { deferred }
//!    ▲  localEdit / manual / remote     │  update: display only
//!    │  (derive, apply, send)           │  remote / manual: deferred
//!    └──────────────────────────────────┘
//!        compositionEnd / cancel: commit, then replay deferred in order
//! ```

use crate::apply::apply;
use crate::composition::{CompositionTracker, Selection};
use crate::diff::extract;
use crate::echo::EchoSuppressor;
use crate::events::{now_ms, EngineEvent, EventBus};
use crate::operation::{Operation, OperationKind, OperationRecord, Origin};
use crate::protocol::OperationMessage;
use crate::session_id::SessionId;
use crate::transform::{OperationTransform, PassThrough};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Content used when storage has nothing for us.
pub const DEFAULT_CONTENT: &str = "**Hello Markdown!**";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Buffer content until (and unless) storage returns something non-empty
    pub default_content: String,
    /// Maximum activity log entries kept (oldest dropped first)
    pub log_capacity: usize,
    /// Bound on unconfirmed sends (None = unbounded)
    pub max_pending: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_content: DEFAULT_CONTENT.to_string(),
            log_capacity: 500,
            max_pending: None,
        }
    }
}

/// A directly entered operation. A missing position means "end of buffer".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualOperation {
    pub kind: OperationKind,
    pub position: Option<usize>,
    pub length: usize,
    pub content: String,
}

impl ManualOperation {
    fn resolve(&self, buffer_len: usize) -> Operation {
        let position = self.position.unwrap_or(buffer_len);
        match self.kind {
            OperationKind::Insert => Operation::insert(position, self.content.clone()),
            OperationKind::Delete => Operation::delete(position, self.length),
            OperationKind::Replace => Operation::replace(position, self.length, self.content.clone()),
        }
    }
}

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Result of the bootstrap read against storage.
    Loaded(Result<Option<String>, String>),
    /// The editing surface now shows this full text.
    LocalEdit(String),
    /// An operation entered directly by the user.
    Manual(ManualOperation),
    /// A composition opened with this selection.
    CompositionStart(Selection),
    /// The surface changed while composing (provisional text).
    CompositionUpdate(String),
    /// The composition committed `committed`; `surface` is the full text
    /// the surface shows afterwards.
    CompositionEnd { committed: String, surface: String },
    /// The composition was abandoned without a commit.
    CompositionCancel,
    /// A raw frame arrived from the relay.
    Remote(Vec<u8>),
    /// A send effect finished.
    SendFinished { seq: u64, result: Result<(), String> },
    /// A persist effect finished.
    PersistFinished(Result<(), String>),
    RelayOpened,
    RelayClosed,
}

/// Side effects for the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write the full document to storage.
    Persist(String),
    /// Send one operation to the relay.
    Send(OperationMessage),
    /// Show this full text on the editing surface.
    Display(String),
}

/// Inputs held back while a composition is open.
#[derive(Debug, Clone)]
pub enum Deferred {
    Remote(OperationMessage),
    Manual(ManualOperation),
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,
    Composing {
        /// Latest provisional surface text, for display only
        preedit: Option<String>,
        deferred: VecDeque<Deferred>,
    },
}

pub struct Session {
    config: SessionConfig,
    buffer: String,
    state: SessionState,
    tracker: CompositionTracker,
    echo: EchoSuppressor,
    transform: Box<dyn OperationTransform>,
    log: VecDeque<OperationRecord>,
    events: Arc<EventBus>,
}

impl Session {
    pub fn new(config: SessionConfig, session_id: SessionId) -> Self {
        let echo = EchoSuppressor::new(session_id).with_max_pending(config.max_pending);
        Self {
            buffer: config.default_content.clone(),
            config,
            state: SessionState::Idle,
            tracker: CompositionTracker::new(),
            echo,
            transform: Box::new(PassThrough),
            log: VecDeque::new(),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn with_transform(mut self, transform: impl OperationTransform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_composing(&self) -> bool {
        matches!(self.state, SessionState::Composing { .. })
    }

    /// Activity log, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &OperationRecord> {
        self.log.iter()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn session_id(&self) -> SessionId {
        self.echo.session_id()
    }

    pub fn pending_len(&self) -> usize {
        self.echo.pending_len()
    }

    /// Run one transition.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();

        match input {
            Input::Loaded(result) => self.on_loaded(result, &mut effects),
            Input::LocalEdit(text) => {
                if self.is_composing() {
                    self.on_preedit(text);
                } else {
                    self.on_local_edit(text, &mut effects);
                }
            }
            Input::Manual(manual) => {
                if let SessionState::Composing { deferred, .. } = &mut self.state {
                    debug!("Deferring manual operation until composition ends");
                    deferred.push_back(Deferred::Manual(manual));
                } else {
                    self.on_manual(&manual, &mut effects);
                }
            }
            Input::CompositionStart(selection) => self.on_composition_start(selection),
            Input::CompositionUpdate(text) => {
                if self.is_composing() {
                    self.on_preedit(text);
                } else {
                    self.on_local_edit(text, &mut effects);
                }
            }
            Input::CompositionEnd { committed, surface } => {
                self.on_composition_end(&committed, &surface, &mut effects)
            }
            Input::CompositionCancel => self.on_composition_cancel(&mut effects),
            Input::Remote(data) => self.on_remote(&data, &mut effects),
            Input::SendFinished { seq, result } => self.on_send_finished(seq, result),
            Input::PersistFinished(result) => self.on_persist_finished(result),
            Input::RelayOpened => {
                info!("Relay connection opened");
                self.events.emit(EngineEvent::RelayStateChanged {
                    connected: true,
                    timestamp: now_ms(),
                });
            }
            Input::RelayClosed => {
                info!("Relay connection closed");
                self.events.emit(EngineEvent::RelayStateChanged {
                    connected: false,
                    timestamp: now_ms(),
                });
            }
        }

        effects
    }

    fn on_loaded(&mut self, result: Result<Option<String>, String>, effects: &mut Vec<Effect>) {
        match result {
            Ok(Some(content)) if !content.is_empty() => {
                info!("Loaded document ({} chars)", content.chars().count());
                self.buffer = content;
            }
            Ok(_) => info!("Storage is empty, using default content"),
            Err(reason) => warn!("Failed to load document, using default content: {}", reason),
        }
        effects.push(Effect::Display(self.buffer.clone()));
    }

    fn on_local_edit(&mut self, text: String, effects: &mut Vec<Effect>) {
        for op in extract(&self.buffer, &text) {
            match apply(&self.buffer, &op) {
                Ok(next) => self.accept_local(op, next, effects),
                Err(e) => warn!("Extracted operation does not fit buffer: {}", e),
            }
        }
    }

    fn on_manual(&mut self, manual: &ManualOperation, effects: &mut Vec<Effect>) {
        let op = manual.resolve(self.buffer.chars().count());
        match apply(&self.buffer, &op) {
            Ok(next) => {
                self.accept_local(op, next, effects);
                effects.push(Effect::Display(self.buffer.clone()));
            }
            Err(e) => {
                warn!("Rejected manual operation {}: {}", op.to_json(), e);
                self.events.emit(EngineEvent::OperationRejected {
                    operation: op,
                    reason: e.to_string(),
                    timestamp: now_ms(),
                });
            }
        }
    }

    fn on_preedit(&mut self, text: String) {
        if let SessionState::Composing { preedit, .. } = &mut self.state {
            *preedit = Some(text);
        }
    }

    fn on_composition_start(&mut self, selection: Selection) {
        if self.tracker.abandon().is_some() {
            debug!("Composition restarted before commit");
        }
        self.tracker.start(selection, self.buffer.chars().count());
        if !self.is_composing() {
            self.state = SessionState::Composing {
                preedit: None,
                deferred: VecDeque::new(),
            };
        }
        debug!("Composition started at {:?}", self.tracker.span());
    }

    fn on_composition_end(&mut self, committed: &str, surface: &str, effects: &mut Vec<Effect>) {
        if self.tracker.is_open() {
            if let Some(op) = self.tracker.end(committed) {
                match apply(&self.buffer, &op) {
                    Ok(next) => {
                        if next != surface {
                            debug!("Surface differs from committed buffer, redisplaying");
                        }
                        self.accept_local(op, next, effects);
                    }
                    Err(e) => {
                        warn!("Composition span no longer fits ({}), diffing surface instead", e);
                        self.on_local_edit(surface.to_string(), effects);
                    }
                }
            }
        } else {
            debug!("Composition ended without a recorded start, diffing surface");
            self.on_local_edit(surface.to_string(), effects);
        }

        self.finish_composition(effects);
        let shown = matches!(effects.last(), Some(Effect::Display(text)) if *text == self.buffer);
        if self.buffer != surface && !shown {
            effects.push(Effect::Display(self.buffer.clone()));
        }
    }

    fn on_composition_cancel(&mut self, effects: &mut Vec<Effect>) {
        self.tracker.abandon();
        self.finish_composition(effects);
        effects.push(Effect::Display(self.buffer.clone()));
    }

    /// Return to Idle and replay everything deferred during the composition.
    fn finish_composition(&mut self, effects: &mut Vec<Effect>) {
        let deferred = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Composing { deferred, .. } => deferred,
            SessionState::Idle => return,
        };

        if !deferred.is_empty() {
            debug!("Replaying {} deferred input(s)", deferred.len());
        }
        for item in deferred {
            match item {
                Deferred::Remote(msg) => self.apply_remote(msg, effects),
                Deferred::Manual(manual) => self.on_manual(&manual, effects),
            }
        }
    }

    fn on_remote(&mut self, data: &[u8], effects: &mut Vec<Effect>) {
        let msg = match OperationMessage::from_json(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Discarding relay message: {}", e);
                self.events.emit(EngineEvent::MessageDiscarded {
                    reason: e.to_string(),
                    timestamp: now_ms(),
                });
                return;
            }
        };

        if self.echo.on_receive(&msg) {
            debug!("Suppressed own echo {}", msg.operation.to_json());
            self.events.emit(EngineEvent::EchoSuppressed {
                operation: msg.operation,
                timestamp: now_ms(),
            });
            return;
        }

        if let SessionState::Composing { deferred, .. } = &mut self.state {
            debug!("Deferring remote operation until composition ends");
            deferred.push_back(Deferred::Remote(msg));
            return;
        }

        self.apply_remote(msg, effects);
    }

    fn apply_remote(&mut self, msg: OperationMessage, effects: &mut Vec<Effect>) {
        let op = self
            .transform
            .transform(msg.operation, &self.echo.unconfirmed());

        match apply(&self.buffer, &op) {
            Ok(next) => {
                self.buffer = next;
                debug!("Applied remote {}", op.to_json());
                self.record(OperationRecord::remote(op.clone()));
                self.events.emit(EngineEvent::OperationApplied {
                    origin: Origin::Remote,
                    operation: op,
                    timestamp: now_ms(),
                });
                effects.push(Effect::Display(self.buffer.clone()));
            }
            Err(e) => {
                warn!("Skipping remote operation {}: {}", op.to_json(), e);
                self.events.emit(EngineEvent::OperationRejected {
                    operation: op,
                    reason: e.to_string(),
                    timestamp: now_ms(),
                });
            }
        }
    }

    /// Mutate, log, persist, register and send one local operation.
    fn accept_local(&mut self, op: Operation, next: String, effects: &mut Vec<Effect>) {
        self.buffer = next;
        self.record(OperationRecord::local(op.clone()));
        self.events.emit(EngineEvent::OperationApplied {
            origin: Origin::Local,
            operation: op.clone(),
            timestamp: now_ms(),
        });
        effects.push(Effect::Persist(self.buffer.clone()));
        let msg = self.echo.on_send(op);
        effects.push(Effect::Send(msg));
    }

    fn on_send_finished(&mut self, seq: u64, result: Result<(), String>) {
        match result {
            Ok(()) => debug!("Sent seq {}", seq),
            Err(reason) => {
                warn!("Send of seq {} failed: {}", seq, reason);
                // It never reached the relay, so no echo will come back.
                self.echo.forget(seq);
                self.events.emit(EngineEvent::SendFailed {
                    reason,
                    timestamp: now_ms(),
                });
            }
        }
    }

    fn on_persist_finished(&mut self, result: Result<(), String>) {
        if let Err(reason) = result {
            warn!("Persisting document failed: {}", reason);
            self.events.emit(EngineEvent::PersistFailed {
                reason,
                timestamp: now_ms(),
            });
        }
    }

    fn record(&mut self, record: OperationRecord) {
        if self.config.log_capacity == 0 {
            return;
        }
        while self.log.len() >= self.config.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(record);
    }
}
