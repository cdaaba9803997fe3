//! The consumed protocol-client contract and its production implementation.
//!
//! The cluster's consensus protocol is not this crate's concern; the
//! multiplexer consumes a narrow capability: hand over one framed request at
//! a time, learn about registration, and receive the reply. Anything
//! implementing [`ProtocolClient`] can sit behind the dispatcher: the
//! bundled [`TcpSession`](session::TcpSession) in production,
//! [`SimSession`](crate::testing::SimSession) in tests.

pub mod message;
pub mod session;
pub mod wire;

pub use message::Message;
pub use session::TcpSession;

use bytes::BytesMut;

use crate::error::PacketStatus;

/// Events a protocol client reports back to the reactor.
#[derive(Debug)]
pub enum SessionEvent {
    /// The registration handshake completed; requests may now flow.
    Registered,
    /// The reply to the inflight request arrived.
    Reply {
        /// Operation code echoed from the request header.
        operation: u8,
        /// Reply body. Valid only until demultiplexing returns.
        body: BytesMut,
    },
    /// The inflight request failed terminally at the transport layer.
    RequestFailed {
        /// Status to assign to every packet of the inflight batch.
        status: PacketStatus,
    },
}

/// One-request-inflight protocol session, driven by the reactor thread.
///
/// All methods are called on the reactor thread only. Implementations report
/// progress through [`poll_event`](ProtocolClient::poll_event) rather than
/// callbacks, so no reference back into the dispatcher is ever stored.
pub trait ProtocolClient: Send {
    /// Start the registration handshake. Called once before any request.
    fn register(&mut self);

    /// Borrow a request message buffer from the session's pool.
    fn get_message(&mut self) -> Message;

    /// Return an unused message buffer to the pool.
    fn release_message(&mut self, message: Message);

    /// Hand over a finished request.
    ///
    /// Precondition: [`request_inflight`](ProtocolClient::request_inflight)
    /// is `false`. The session owns the message until the matching
    /// [`SessionEvent::Reply`] or [`SessionEvent::RequestFailed`].
    fn raw_request(&mut self, message: Message);

    /// Whether a request is currently on the wire.
    fn request_inflight(&self) -> bool;

    /// Drive timers, connection management, and I/O for one tick.
    fn tick(&mut self);

    /// Next pending event, if any.
    fn poll_event(&mut self) -> Option<SessionEvent>;
}
