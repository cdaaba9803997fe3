//! Packet identity, submission records, and reactor-side packet slots.

use crate::operation::Operation;

/// Index of a packet slot within the pool.
///
/// Packet ids are stable for the lifetime of the client and are the opaque
/// packet handle exposed across the FFI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PacketId(u32);

impl PacketId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "packet-{}", self.0)
    }
}

/// A borrowed view of the caller's request body.
///
/// The caller guarantees the region stays valid and unmodified from submit
/// until the packet's completion callback returns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UserSlice {
    ptr: *const u8,
    len: u32,
}

// Safety: the pointee is immutable for the packet's lifetime per the submit
// contract, and the submission queue establishes the happens-before edge
// between the producer's writes and the reactor's reads.
unsafe impl Send for UserSlice {}
unsafe impl Sync for UserSlice {}

impl UserSlice {
    pub(crate) const fn new(ptr: *const u8, len: u32) -> Self {
        Self { ptr, len }
    }

    pub(crate) const fn empty() -> Self {
        Self { ptr: std::ptr::null(), len: 0 }
    }

    pub(crate) const fn len(self) -> u32 {
        self.len
    }

    /// # Safety
    ///
    /// The caller-side contract must hold: the region is valid, initialized,
    /// and unmodified between submit and completion.
    pub(crate) unsafe fn as_slice<'a>(self) -> &'a [u8] {
        if self.len == 0 || self.ptr.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(self.ptr, self.len as usize)
    }
}

/// One submitted packet crossing from a producer thread to the reactor.
#[derive(Debug)]
pub(crate) struct Submission {
    pub packet: PacketId,
    pub operation: u8,
    pub data: UserSlice,
    pub user_tag: usize,
}

/// Which component currently holds a packet. Diagnostic only; the free list
/// and batch links are the load-bearing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Free,
    Submitted,
    PendingRoot,
    PendingMember,
    InflightRoot,
    InflightMember,
    Completing,
}

/// Reactor-side state of one pool slot.
///
/// `batch_tail` and `batch_size` are meaningful only while the slot is a
/// batch root; members other than the root are invisible to the pending
/// queue.
#[derive(Debug)]
pub(crate) struct PacketSlot {
    pub operation: Operation,
    pub data: UserSlice,
    pub data_size: u32,
    pub user_tag: usize,
    pub batch_next: Option<PacketId>,
    pub batch_tail: PacketId,
    pub batch_size: u32,
    pub state: SlotState,
}

impl PacketSlot {
    pub(crate) fn vacant(id: PacketId) -> Self {
        Self {
            operation: Operation::CreateAccounts,
            data: UserSlice::empty(),
            data_size: 0,
            user_tag: 0,
            batch_next: None,
            batch_tail: id,
            batch_size: 0,
            state: SlotState::Free,
        }
    }
}

/// Collect a batch chain in order, starting at its root.
pub(crate) fn chain_members(slots: &[PacketSlot], root: PacketId) -> Vec<PacketId> {
    let mut members = Vec::new();
    let mut cursor = Some(root);
    while let Some(id) = cursor {
        members.push(id);
        cursor = slots[id.index()].batch_next;
    }
    members
}
