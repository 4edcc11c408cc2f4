//! Composition tracking for multi-keystroke input (IME sessions).
//!
//! While a composition is open the editing surface may rewrite the buffer
//! several times with provisional text. None of those intermediate
//! snapshots are diffed; instead the selection captured at session start
//! and the committed text at session end become one operation.

use crate::operation::Operation;

/// A selection in character offsets. `start` may be after `end` for
/// backwards selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A collapsed selection (plain cursor).
    pub fn caret(at: usize) -> Self {
        Self { start: at, end: at }
    }
}

/// The span a composition will replace, normalized so `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionSpan {
    pub start: usize,
    pub end: usize,
}

impl From<Selection> for CompositionSpan {
    fn from(sel: Selection) -> Self {
        Self {
            start: sel.start.min(sel.end),
            end: sel.start.max(sel.end),
        }
    }
}

impl CompositionSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The operation that commits `committed` over this span.
    ///
    /// An empty commit over a collapsed span changes nothing and yields `None`.
    pub fn commit(&self, committed: &str) -> Option<Operation> {
        if !self.is_empty() {
            Some(Operation::replace(self.start, self.len(), committed))
        } else if !committed.is_empty() {
            Some(Operation::insert(self.start, committed))
        } else {
            None
        }
    }
}

/// Records the span of an open composition and consumes it on commit.
#[derive(Debug, Default)]
pub struct CompositionTracker {
    span: Option<CompositionSpan>,
}

impl CompositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the selection active when the composition opened.
    ///
    /// The selection is clamped to `buffer_len` so a stale selection from
    /// the surface cannot produce an out-of-range operation.
    pub fn start(&mut self, selection: Selection, buffer_len: usize) {
        let clamped = Selection::new(selection.start.min(buffer_len), selection.end.min(buffer_len));
        self.span = Some(clamped.into());
    }

    /// Finish the composition with the committed text.
    ///
    /// Returns `None` when no start was recorded; the caller must then fall
    /// back to diffing its before/after snapshots.
    pub fn end(&mut self, committed: &str) -> Option<Operation> {
        self.span.take()?.commit(committed)
    }

    /// Drop the recorded span without producing an operation.
    pub fn abandon(&mut self) -> Option<CompositionSpan> {
        self.span.take()
    }

    pub fn span(&self) -> Option<CompositionSpan> {
        self.span
    }

    pub fn is_open(&self) -> bool {
        self.span.is_some()
    }
}
