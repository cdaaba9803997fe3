//! Carving a batched reply into per-packet slices.
//!
//! The contract: one completion per packet in the chain, each seeing exactly
//! the subrange of the reply that corresponds to its submitted events.
//! Concatenating the slices in chain order reconstructs the reply.

use std::ops::Range;

use crate::operation::{Operation, ReplyLayout};
use crate::packet::PacketId;

/// Size of one sparse index/result record on the wire.
const EVENT_RESULT_SIZE: usize = 8;

/// The reply subrange belonging to one packet of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReplySlice {
    pub packet: PacketId,
    pub range: Range<usize>,
}

/// Partition `body` across the chain members.
///
/// `members` lists `(packet, event_count)` in chain order. For sparse
/// replies the index fields are rebased in place to each packet's local
/// event range, which is why the body is taken mutably.
pub(crate) fn demux(
    operation: Operation,
    body: &mut [u8],
    members: &[(PacketId, u32)],
) -> Vec<ReplySlice> {
    match operation.shape().reply {
        ReplyLayout::PerEvent => per_event(operation, body, members),
        ReplyLayout::SparseIndexed => sparse_indexed(body, members),
        ReplyLayout::Whole => {
            debug_assert!(
                members.len() == 1,
                "{operation} is not batchable; a chained reply is a dispatcher bug"
            );
            members
                .iter()
                .map(|&(packet, _)| ReplySlice { packet, range: 0..body.len() })
                .collect()
        }
    }
}

/// One result record per event, in event order: slice by offset.
fn per_event(operation: Operation, body: &[u8], members: &[(PacketId, u32)]) -> Vec<ReplySlice> {
    let result_size = operation.shape().result_size as usize;
    let mut slices = Vec::with_capacity(members.len());
    let mut offset = 0usize;
    for &(packet, event_count) in members {
        let len = event_count as usize * result_size;
        let start = offset.min(body.len());
        let end = (offset + len).min(body.len());
        debug_assert!(offset + len <= body.len(), "reply shorter than the batch it answers");
        slices.push(ReplySlice { packet, range: start..end });
        offset += len;
    }
    debug_assert_eq!(offset, body.len(), "reply longer than the batch it answers");
    slices
}

/// Sparse index/result records ascending by index: partition by index field
/// and rebase each record to its packet's local event range.
fn sparse_indexed(body: &mut [u8], members: &[(PacketId, u32)]) -> Vec<ReplySlice> {
    debug_assert_eq!(body.len() % EVENT_RESULT_SIZE, 0);
    let mut slices = Vec::with_capacity(members.len());
    let mut cursor = 0usize;
    let mut event_offset = 0u32;
    for &(packet, event_count) in members {
        let start = cursor;
        while cursor + EVENT_RESULT_SIZE <= body.len() {
            let index_bytes = [body[cursor], body[cursor + 1], body[cursor + 2], body[cursor + 3]];
            let index = u32::from_le_bytes(index_bytes);
            if index >= event_offset + event_count {
                break;
            }
            debug_assert!(index >= event_offset, "result indices must ascend across the batch");
            let rebased = index.saturating_sub(event_offset);
            body[cursor..cursor + 4].copy_from_slice(&rebased.to_le_bytes());
            cursor += EVENT_RESULT_SIZE;
        }
        slices.push(ReplySlice { packet, range: start..cursor });
        event_offset += event_count;
    }
    debug_assert_eq!(cursor, body.len(), "sparse results beyond the batch's event range");
    slices
}
