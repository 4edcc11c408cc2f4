//! Conflict-resolution seam for remote operations.
//!
//! Remote operations are positioned against the sender's buffer, which may
//! have diverged from ours while our own sends are unconfirmed. A transform
//! gets the chance to rewrite the incoming operation against those
//! unconfirmed local operations before it is applied.
//!
//! Only [`PassThrough`] ships: concurrent overlapping edits are applied in
//! receipt order against possibly stale offsets.

use crate::operation::Operation;

pub trait OperationTransform: Send {
    /// Rewrite `incoming` given the local operations still awaiting their
    /// echo (oldest first).
    fn transform(&self, incoming: Operation, unconfirmed: &[Operation]) -> Operation;
}

/// Applies remote operations exactly as received.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl OperationTransform for PassThrough {
    fn transform(&self, incoming: Operation, _unconfirmed: &[Operation]) -> Operation {
        incoming
    }
}
