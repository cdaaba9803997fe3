//! The client context: shared producer-facing state and the reactor core.
//!
//! [`Shared`] is everything producer threads touch: the packet pool, the
//! submission queue, the wake signal, and the shutdown flag. [`Core`] is
//! everything the reactor thread owns exclusively: packet slots, the
//! batcher's pending FIFO, the protocol session, and the inflight batch.
//! The split makes the threading rules a type-level fact rather than a
//! comment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, info, trace, warn};

use crate::batch::{Admission, Batcher};
use crate::config::ClientConfig;
use crate::demux;
use crate::error::{AcquireError, PacketStatus};
use crate::metrics::ClientMetrics;
use crate::packet::{chain_members, PacketId, PacketSlot, SlotState, Submission};
use crate::pool::PacketPool;
use crate::protocol::{ProtocolClient, SessionEvent};
use crate::queue::SubmissionQueue;
use crate::reactor::{Reactor, Signal};

/// A finished packet, as seen by the completion handler.
///
/// The reply slice borrows the reply buffer and dies when the handler
/// returns; handlers copy what they keep.
#[derive(Debug)]
pub(crate) struct Completion<'a> {
    pub packet: PacketId,
    pub status: PacketStatus,
    pub user_tag: usize,
    pub reply: Option<&'a [u8]>,
}

/// Invoked on the reactor thread for every completed packet, exactly once
/// per successfully submitted packet.
pub(crate) type CompletionHandler = Box<dyn Fn(&Shared, Completion<'_>) + Send + Sync>;

/// State reachable from any thread.
pub(crate) struct Shared {
    pub(crate) cluster_id: u128,
    pub(crate) client_id: u128,
    pub(crate) config: ClientConfig,
    pub(crate) pool: PacketPool,
    pub(crate) submissions: SubmissionQueue,
    pub(crate) signal: Signal,
    pub(crate) shutdown: AtomicBool,
    pub(crate) metrics: ClientMetrics,
    pub(crate) completion: CompletionHandler,
}

impl Shared {
    /// Take one packet from the pool. Safe from any thread.
    pub(crate) fn acquire(&self) -> Result<PacketId, AcquireError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AcquireError::Shutdown);
        }
        self.pool.acquire().ok_or(AcquireError::ConcurrencyMaxExceeded)
    }

    /// Return one packet to the pool. Safe from any thread.
    pub(crate) fn release(&self, id: PacketId) {
        self.pool.release(id);
        // The shutdown drain counts free-list returns; wake it promptly.
        if self.shutdown.load(Ordering::Relaxed) {
            self.signal.notify();
        }
    }

    /// Queue one packet for the reactor and wake it.
    pub(crate) fn submit(&self, submission: Submission) {
        self.metrics.packet_submitted();
        self.submissions.push(submission);
        self.signal.notify();
    }

    /// Flip the shutdown flag. Returns true for the first caller only.
    pub(crate) fn initiate_shutdown(&self) -> bool {
        !self.shutdown.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("client_id", &format_args!("{:032x}", self.client_id))
            .field("capacity", &self.pool.capacity())
            .finish()
    }
}

/// State owned exclusively by the reactor thread.
pub(crate) struct Core {
    slots: Box<[PacketSlot]>,
    batcher: Batcher,
    session: Box<dyn ProtocolClient>,
    reactor: Reactor,
    registered: bool,
    inflight: Option<PacketId>,
    reaped_free: u32,
}

impl Core {
    pub(crate) fn new(capacity: u32, session: Box<dyn ProtocolClient>, reactor: Reactor) -> Self {
        let slots = (0..capacity).map(|n| PacketSlot::vacant(PacketId::new(n))).collect();
        Self {
            slots,
            batcher: Batcher::new(),
            session,
            reactor,
            registered: false,
            inflight: None,
            reaped_free: 0,
        }
    }

    /// Reactor thread main loop. Returns once shutdown has drained every
    /// packet back to the free list.
    pub(crate) fn run(mut self, shared: Arc<Shared>) {
        debug!(client = %format_args!("{:032x}", shared.client_id), "reactor thread started");
        self.session.register();
        loop {
            if self.step(&shared) {
                break;
            }
            self.reactor.run_for(shared.config.tick_interval);
        }
        // Every packet was reaped and acquire refuses new ones, so nothing
        // can be queued or free at this point.
        debug_assert!(shared.submissions.is_empty());
        debug_assert_eq!(shared.pool.available(), 0);
        info!("reactor thread drained and exiting");
    }

    /// One reactor iteration. Returns true when the loop should exit.
    pub(crate) fn step(&mut self, shared: &Shared) -> bool {
        let shutting_down = shared.shutdown.load(Ordering::Acquire);
        self.session.tick();
        self.pump_events(shared);
        if shutting_down {
            self.cancel_queued(shared);
            self.cancel_pending(shared);
            return self.reap_free(shared);
        }
        // Registration gate: submissions stay queued until the handshake
        // reply arrives.
        if self.registered {
            self.drain_submissions(shared);
        }
        false
    }

    fn pump_events(&mut self, shared: &Shared) {
        while let Some(event) = self.session.poll_event() {
            match event {
                SessionEvent::Registered => {
                    self.registered = true;
                    info!("cluster registration complete");
                    // Re-notify so submissions queued during the handshake
                    // are processed without waiting out a tick.
                    shared.signal.notify();
                }
                SessionEvent::Reply { operation, body } => self.on_reply(shared, operation, body),
                SessionEvent::RequestFailed { status } => {
                    if let Some(root) = self.inflight.take() {
                        warn!(%status, "inflight batch failed at the transport layer");
                        // The failure frees the inflight slot; re-prime it
                        // before running completions, as the reply path does.
                        // Pending roots queued behind the failed batch still
                        // complete, one way or the other.
                        self.advance_pipeline(shared);
                        self.complete_chain(shared, root, status);
                    }
                }
            }
        }
    }

    fn drain_submissions(&mut self, shared: &Shared) {
        while let Some(submission) = shared.submissions.pop() {
            let packet = submission.packet;
            let inflight = self.inflight.is_some();
            match self.batcher.admit(&mut self.slots, submission, inflight) {
                Admission::Invalid(status) => {
                    shared.metrics.validation_failure();
                    shared.metrics.packets_completed(1);
                    trace!(%packet, %status, "packet rejected before the pending queue");
                    self.complete(shared, packet, status, None);
                }
                Admission::Dispatch(root) => self.dispatch(shared, root),
                Admission::Merged { root } => {
                    shared.metrics.packet_merged();
                    trace!(%packet, %root, "packet merged into pending batch");
                }
                Admission::Enqueued => trace!(%packet, "packet enqueued as new pending root"),
            }
        }
        shared.metrics.set_pending_roots(self.batcher.pending_len() as u64);
    }

    /// Hand the oldest pending root to the dispatcher once the inflight
    /// slot frees up. Every path that clears the inflight batch, reply or
    /// transport failure, runs this, so an idle dispatcher always implies
    /// an empty pending queue.
    fn advance_pipeline(&mut self, shared: &Shared) {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        if let Some(next) = self.batcher.pop_ready() {
            self.dispatch(shared, next);
            shared.metrics.set_pending_roots(self.batcher.pending_len() as u64);
        }
    }

    /// Build the protocol message for a batch root and put it on the wire.
    fn dispatch(&mut self, shared: &Shared, root: PacketId) {
        debug_assert!(self.inflight.is_none());
        debug_assert!(!self.session.request_inflight(), "single-inflight invariant");

        let members = chain_members(&self.slots, root);
        let operation = self.slots[root.index()].operation;
        let batch_size = self.slots[root.index()].batch_size;

        let mut message = self.session.get_message();
        message.begin();
        for &member in &members {
            let slot = &self.slots[member.index()];
            debug_assert_eq!(slot.operation, operation, "batch chains are homogeneous");
            // Safety: the submit contract keeps the caller's region valid and
            // unmodified until this packet completes.
            let data = unsafe { slot.data.as_slice() };
            debug_assert_eq!(data.len() as u32, slot.data_size);
            message.put_body(data);
        }
        debug_assert_eq!(message.body_len() as u32, batch_size);
        message.finish(shared.cluster_id, shared.client_id, operation.code());

        for &member in &members {
            self.slots[member.index()].state = SlotState::InflightMember;
        }
        self.slots[root.index()].state = SlotState::InflightRoot;

        trace!(%root, %operation, batch_size, packets = members.len(), "dispatching batch");
        self.session.raw_request(message);
        self.inflight = Some(root);
        shared.metrics.batch_dispatched();
    }

    fn on_reply(&mut self, shared: &Shared, operation: u8, mut body: BytesMut) {
        let Some(root) = self.inflight.take() else {
            warn!(operation, "dropping reply that matches no inflight batch");
            return;
        };

        // Issue the next request before demultiplexing: completions run
        // arbitrary application code, and the wire should stay busy meanwhile.
        self.advance_pipeline(shared);

        let op = self.slots[root.index()].operation;
        debug_assert_eq!(op.code(), operation, "reply echoes the request operation");
        let event_size = op.shape().event_size;
        let members: Vec<(PacketId, u32)> = chain_members(&self.slots, root)
            .into_iter()
            .map(|id| (id, self.slots[id.index()].data_size / event_size))
            .collect();

        trace!(%root, %op, reply_len = body.len(), packets = members.len(), "demultiplexing reply");
        let slices = demux::demux(op, &mut body, &members);
        shared.metrics.packets_completed(slices.len() as u64);
        for slice in slices {
            self.complete(shared, slice.packet, PacketStatus::Ok, Some(&body[slice.range]));
        }
    }

    /// Invoke the completion handler for one packet.
    ///
    /// After the handler returns the packet belongs to the caller again,
    /// who releases it back to the pool; the slot tag is reset here because
    /// the free list, not the tag, is the ownership ground truth.
    fn complete(
        &mut self,
        shared: &Shared,
        id: PacketId,
        status: PacketStatus,
        reply: Option<&[u8]>,
    ) {
        let user_tag = {
            let slot = &mut self.slots[id.index()];
            slot.state = SlotState::Completing;
            slot.user_tag
        };
        (shared.completion)(shared, Completion { packet: id, status, user_tag, reply });
        self.slots[id.index()].state = SlotState::Free;
    }

    fn complete_chain(&mut self, shared: &Shared, root: PacketId, status: PacketStatus) {
        let members = chain_members(&self.slots, root);
        shared.metrics.packets_completed(members.len() as u64);
        for member in members {
            self.complete(shared, member, status, None);
        }
    }

    /// Fail submissions that were queued but never admitted.
    fn cancel_queued(&mut self, shared: &Shared) {
        while let Some(submission) = shared.submissions.pop() {
            let id = submission.packet;
            {
                let slot = &mut self.slots[id.index()];
                slot.data = submission.data;
                slot.data_size = submission.data.len();
                slot.user_tag = submission.user_tag;
                slot.state = SlotState::Submitted;
            }
            shared.metrics.packets_completed(1);
            self.complete(shared, id, PacketStatus::ClientShutdown, None);
        }
    }

    /// Fail every pending root; the inflight batch is left to the transport.
    fn cancel_pending(&mut self, shared: &Shared) {
        for root in self.batcher.take_all() {
            self.complete_chain(shared, root, PacketStatus::ClientShutdown);
        }
        shared.metrics.set_pending_roots(0);
    }

    /// Drain the free list one packet at a time, counting. The reactor may
    /// exit once every packet has come home.
    fn reap_free(&mut self, shared: &Shared) -> bool {
        while shared.pool.acquire().is_some() {
            self.reaped_free += 1;
        }
        self.reaped_free == shared.pool.capacity()
    }

    #[cfg(test)]
    pub(crate) fn batcher(&self) -> &Batcher {
        &self.batcher
    }

    #[cfg(test)]
    pub(crate) fn slots(&self) -> &[PacketSlot] {
        &self.slots
    }

    #[cfg(test)]
    pub(crate) fn inflight_root(&self) -> Option<PacketId> {
        self.inflight
    }
}
