//! Multi-producer, single-consumer submission queue.

use crossbeam::queue::SegQueue;

use crate::packet::Submission;

/// Lock-free handoff from producer threads to the reactor thread.
///
/// Any thread pushes; only the reactor pops, draining the whole queue per
/// wake-up. Order between different producers is not guaranteed.
#[derive(Debug, Default)]
pub(crate) struct SubmissionQueue {
    inner: SegQueue<Submission>,
}

impl SubmissionQueue {
    pub(crate) fn new() -> Self {
        Self { inner: SegQueue::new() }
    }

    /// Push one submission. Safe from any thread; never blocks.
    pub(crate) fn push(&self, submission: Submission) {
        self.inner.push(submission);
    }

    /// Pop one submission. Reactor thread only.
    pub(crate) fn pop(&self) -> Option<Submission> {
        self.inner.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
