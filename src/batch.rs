//! Admission and opportunistic batching of submitted packets.
//!
//! The batcher owns the pending FIFO of batch roots. Every drained
//! submission is validated, initialized as a singleton root, and then either
//! dispatched straight away (the fast path), absorbed into a compatible
//! pending root, or enqueued as a new root. Only roots are visible to the
//! pending queue; members hang off the root through `batch_next`.

use std::collections::VecDeque;

use crate::error::PacketStatus;
use crate::operation::Operation;
use crate::packet::{PacketId, PacketSlot, SlotState, Submission};
use crate::protocol::wire::BODY_SIZE_MAX;

/// Outcome of admitting one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Validation failed; complete the packet locally with this status.
    Invalid(PacketStatus),
    /// No request is inflight; hand this root to the dispatcher now.
    Dispatch(PacketId),
    /// Absorbed into an existing pending root.
    Merged { root: PacketId },
    /// Appended to the pending FIFO as a new root.
    Enqueued,
}

/// Pending FIFO plus the admission/merge algorithm. Reactor thread only.
#[derive(Debug, Default)]
pub(crate) struct Batcher {
    pending: VecDeque<PacketId>,
}

impl Batcher {
    pub(crate) fn new() -> Self {
        Self { pending: VecDeque::new() }
    }

    /// Validate a drained submission and place it.
    ///
    /// `inflight` reports whether the dispatcher currently has a request on
    /// the wire; without one the packet bypasses the pending queue entirely.
    pub(crate) fn admit(
        &mut self,
        slots: &mut [PacketSlot],
        submission: Submission,
        inflight: bool,
    ) -> Admission {
        let id = submission.packet;
        let data_size = submission.data.len();

        // The slot carries caller identity even when validation fails below,
        // so the completion can still return the user's tag.
        {
            let slot = &mut slots[id.index()];
            slot.data = submission.data;
            slot.data_size = data_size;
            slot.user_tag = submission.user_tag;
            slot.state = SlotState::Submitted;
        }

        let Some(operation) = Operation::from_code(submission.operation) else {
            return Admission::Invalid(PacketStatus::InvalidOperation);
        };
        let shape = operation.shape();
        if data_size == 0 || data_size % shape.event_size != 0 {
            return Admission::Invalid(PacketStatus::InvalidDataSize);
        }
        if data_size > BODY_SIZE_MAX {
            return Admission::Invalid(PacketStatus::TooMuchData);
        }

        // Initialize as a singleton root.
        {
            let slot = &mut slots[id.index()];
            slot.operation = operation;
            slot.batch_next = None;
            slot.batch_tail = id;
            slot.batch_size = data_size;
        }

        if !inflight {
            debug_assert!(self.pending.is_empty(), "idle dispatcher implies empty pending queue");
            return Admission::Dispatch(id);
        }

        // Head-to-tail scan keeps FIFO fairness: older roots fill first.
        if shape.batching_allowed {
            let root = self.pending.iter().copied().find(|&candidate| {
                let candidate = &slots[candidate.index()];
                candidate.operation == operation
                    && candidate.batch_size + data_size <= BODY_SIZE_MAX
            });
            if let Some(root) = root {
                let tail = slots[root.index()].batch_tail;
                slots[tail.index()].batch_next = Some(id);
                let root_slot = &mut slots[root.index()];
                root_slot.batch_tail = id;
                root_slot.batch_size += data_size;
                slots[id.index()].state = SlotState::PendingMember;
                return Admission::Merged { root };
            }
        }

        slots[id.index()].state = SlotState::PendingRoot;
        self.pending.push_back(id);
        Admission::Enqueued
    }

    /// Pop the oldest pending root for dispatch.
    pub(crate) fn pop_ready(&mut self) -> Option<PacketId> {
        self.pending.pop_front()
    }

    /// Remove every pending root, for shutdown cancellation.
    pub(crate) fn take_all(&mut self) -> Vec<PacketId> {
        self.pending.drain(..).collect()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> impl Iterator<Item = PacketId> + '_ {
        self.pending.iter().copied()
    }
}
