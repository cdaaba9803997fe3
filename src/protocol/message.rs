//! Request message buffers and their reuse pool.

use bytes::BytesMut;

use crate::protocol::wire::{self, Header, HEADER_SIZE};

/// Number of spare messages the pool keeps for reuse.
const POOL_RETAIN_MAX: usize = 4;

/// One outgoing protocol message: a fixed header followed by the body.
///
/// A message is built in three steps: [`begin`](Message::begin), one or more
/// [`put_body`](Message::put_body) appends, then [`finish`](Message::finish)
/// which stamps the header over the reserved prefix.
#[derive(Debug, Default)]
pub struct Message {
    buf: BytesMut,
}

impl Message {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity) }
    }

    /// Reset the message and reserve the header prefix.
    pub fn begin(&mut self) {
        self.buf.clear();
        self.buf.resize(HEADER_SIZE, 0);
    }

    /// Append bytes to the body.
    pub fn put_body(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Current body length in bytes.
    pub fn body_len(&self) -> usize {
        self.buf.len().saturating_sub(HEADER_SIZE)
    }

    /// Stamp the header for the accumulated body.
    pub fn finish(&mut self, cluster_id: u128, client_id: u128, operation: u8) {
        debug_assert!(self.buf.len() >= HEADER_SIZE);
        let header = Header::for_body(cluster_id, client_id, operation, &self.buf[HEADER_SIZE..]);
        header.write_to(&mut self.buf[..HEADER_SIZE]);
    }

    /// The full frame: header plus body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Reuse pool for [`Message`] buffers. Reactor thread only.
#[derive(Debug, Default)]
pub(crate) struct MessagePool {
    free: Vec<Message>,
}

impl MessagePool {
    pub(crate) fn new() -> Self {
        Self { free: Vec::new() }
    }

    pub(crate) fn get(&mut self) -> Message {
        self.free.pop().unwrap_or_else(|| Message::with_capacity(wire::MESSAGE_SIZE_MAX / 16))
    }

    pub(crate) fn put(&mut self, mut message: Message) {
        if self.free.len() < POOL_RETAIN_MAX {
            message.buf.clear();
            self.free.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_frames_header_and_body() {
        let mut message = Message::default();
        message.begin();
        message.put_body(b"abc");
        message.put_body(b"def");
        assert_eq!(message.body_len(), 6);
        message.finish(1, 2, 3);

        let bytes = message.as_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 6);
        let header = Header::read_from(bytes).unwrap();
        assert_eq!(header.cluster_id, 1);
        assert_eq!(header.client_id, 2);
        assert_eq!(header.operation, 3);
        assert_eq!(header.body_size, 6);
        header.verify_body(&bytes[HEADER_SIZE..]).unwrap();
    }

    #[test]
    fn begin_resets_previous_contents() {
        let mut message = Message::default();
        message.begin();
        message.put_body(b"first");
        message.finish(0, 0, 1);

        message.begin();
        assert_eq!(message.body_len(), 0);
        message.finish(0, 0, 2);
        assert_eq!(message.as_bytes().len(), HEADER_SIZE);
    }

    #[test]
    fn pool_reuses_buffers_up_to_cap() {
        let mut pool = MessagePool::new();
        let messages: Vec<Message> = (0..POOL_RETAIN_MAX + 2).map(|_| pool.get()).collect();
        for message in messages {
            pool.put(message);
        }
        assert_eq!(pool.free.len(), POOL_RETAIN_MAX);
    }
}
