//! Echo suppression for operations this session sent to the relay.
//!
//! Each send is assigned the next sequence number and kept pending until
//! the relay hands it back. Tagged echoes are matched by `(origin, seq)`.
//! Untagged messages fall back to structural equality against the oldest
//! matching pending entry, which cannot tell two identical edits apart.

use crate::operation::Operation;
use crate::protocol::OperationMessage;
use crate::session_id::SessionId;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingSend {
    seq: u64,
    operation: Operation,
}

/// Tracks sent-but-unconfirmed operations in send order.
#[derive(Debug)]
pub struct EchoSuppressor {
    session_id: SessionId,
    next_seq: u64,
    pending: VecDeque<PendingSend>,
    /// Oldest entries are evicted past this size (None = unbounded)
    max_pending: Option<usize>,
}

impl EchoSuppressor {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            next_seq: 1,
            pending: VecDeque::new(),
            max_pending: None,
        }
    }

    pub fn with_max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Record an outgoing operation and return the tagged message to send.
    pub fn on_send(&mut self, operation: Operation) -> OperationMessage {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.pending.push_back(PendingSend {
            seq,
            operation: operation.clone(),
        });

        if let Some(max) = self.max_pending {
            while self.pending.len() > max {
                if let Some(evicted) = self.pending.pop_front() {
                    warn!(
                        "Pending-send set full ({}), evicting unconfirmed seq {}",
                        max, evicted.seq
                    );
                }
            }
        }

        OperationMessage::tagged(operation, self.session_id, seq)
    }

    /// Returns true when `msg` is this session's own echo and must not be applied.
    pub fn on_receive(&mut self, msg: &OperationMessage) -> bool {
        match (msg.origin, msg.seq) {
            (Some(origin), Some(seq)) if origin == self.session_id => {
                match self.pending.iter().position(|p| p.seq == seq) {
                    Some(index) => {
                        self.pending.remove(index);
                        debug!("Confirmed echo of seq {}", seq);
                    }
                    None => debug!("Echo of seq {} was not pending", seq),
                }
                true
            }
            (Some(origin), None) if origin == self.session_id => {
                // Ours even when nothing pending matches it any more
                if !self.take_structural_match(&msg.operation) {
                    debug!("Own untagged message was not pending");
                }
                true
            }
            (Some(_), _) => false,
            (None, _) => self.take_structural_match(&msg.operation),
        }
    }

    /// Remove the oldest pending entry equal to `operation`.
    fn take_structural_match(&mut self, operation: &Operation) -> bool {
        match self.pending.iter().position(|p| &p.operation == operation) {
            Some(index) => {
                let matched = self.pending.remove(index);
                debug!(
                    "Untagged message matched pending seq {:?} structurally",
                    matched.map(|m| m.seq)
                );
                true
            }
            None => false,
        }
    }

    /// Drop a pending entry whose send never reached the relay.
    pub fn forget(&mut self, seq: u64) -> bool {
        match self.pending.iter().position(|p| p.seq == seq) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Operations still awaiting their echo, oldest first.
    pub fn unconfirmed(&self) -> Vec<Operation> {
        self.pending.iter().map(|p| p.operation.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suppressor() -> EchoSuppressor {
        EchoSuppressor::new(SessionId::from(0xaa))
    }

    #[test]
    fn test_tagged_echo_is_suppressed_once() {
        let mut echo = suppressor();
        let sent = echo.on_send(Operation::insert(0, "a"));
        assert_eq!(echo.pending_len(), 1);

        assert!(echo.on_receive(&sent));
        assert_eq!(echo.pending_len(), 0);

        // A late duplicate of our own message is still ours
        assert!(echo.on_receive(&sent));
        assert_eq!(echo.pending_len(), 0);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut echo = suppressor();
        let first = echo.on_send(Operation::insert(0, "a"));
        let second = echo.on_send(Operation::insert(0, "a"));
        assert_eq!(first.seq, Some(1));
        assert_eq!(second.seq, Some(2));
    }

    #[test]
    fn test_identical_tagged_sends_are_distinguished() {
        let mut echo = suppressor();
        let _first = echo.on_send(Operation::insert(0, "a"));
        let second = echo.on_send(Operation::insert(0, "a"));

        assert!(echo.on_receive(&second));
        assert_eq!(echo.pending_len(), 1);
        // The remaining entry is seq 1
        assert_eq!(echo.pending.front().map(|p| p.seq), Some(1));
    }

    #[test]
    fn test_foreign_origin_is_never_an_echo() {
        let mut echo = suppressor();
        let sent = echo.on_send(Operation::insert(0, "a"));
        let foreign = OperationMessage::tagged(sent.operation.clone(), SessionId::from(0xbb), 1);

        assert!(!echo.on_receive(&foreign));
        assert_eq!(echo.pending_len(), 1);
    }

    #[test]
    fn test_own_origin_without_seq_is_an_echo() {
        let mut echo = suppressor();
        echo.on_send(Operation::insert(0, "a"));
        echo.on_send(Operation::insert(1, "b"));

        let own = OperationMessage {
            operation: Operation::insert(1, "b"),
            origin: Some(SessionId::from(0xaa)),
            seq: None,
        };
        assert!(echo.on_receive(&own));
        let seqs: Vec<u64> = echo.pending.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![1]);

        // Nothing left to match, still never applied as remote
        assert!(echo.on_receive(&own));
        assert_eq!(echo.pending_len(), 1);
    }

    #[test]
    fn test_untagged_structural_match_is_fifo() {
        let mut echo = suppressor();
        echo.on_send(Operation::insert(0, "a"));
        echo.on_send(Operation::delete(0, 1));
        echo.on_send(Operation::insert(0, "a"));

        let bare = OperationMessage::bare(Operation::insert(0, "a"));
        assert!(echo.on_receive(&bare));

        let seqs: Vec<u64> = echo.pending.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn test_untagged_without_match_is_applied() {
        let mut echo = suppressor();
        echo.on_send(Operation::insert(0, "a"));
        assert!(!echo.on_receive(&OperationMessage::bare(Operation::insert(1, "a"))));
        assert_eq!(echo.pending_len(), 1);
    }

    #[test]
    fn test_forget_failed_send() {
        let mut echo = suppressor();
        let sent = echo.on_send(Operation::insert(0, "a"));
        assert!(echo.forget(sent.seq.unwrap()));
        assert!(!echo.forget(sent.seq.unwrap()));
        assert_eq!(echo.pending_len(), 0);
    }

    #[test]
    fn test_max_pending_evicts_oldest() {
        let mut echo = suppressor().with_max_pending(Some(2));
        echo.on_send(Operation::insert(0, "a"));
        echo.on_send(Operation::insert(0, "b"));
        echo.on_send(Operation::insert(0, "c"));

        assert_eq!(
            echo.unconfirmed(),
            vec![Operation::insert(0, "b"), Operation::insert(0, "c")]
        );
    }
}
