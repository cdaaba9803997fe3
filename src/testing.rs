//! Scriptable protocol client for exercising the multiplexer without a
//! cluster.
//!
//! [`SimSession`] implements [`ProtocolClient`] and records every request it
//! is handed; the paired [`SimController`] lets a test (or simulation
//! harness) observe captured requests and script registration, replies, and
//! transport failures from any thread.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::error::PacketStatus;
use crate::protocol::message::Message;
use crate::protocol::wire::{Header, HEADER_SIZE};
use crate::protocol::{ProtocolClient, SessionEvent};

/// One request captured by a [`SimSession`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// Operation code from the request header.
    pub operation: u8,
    /// Cluster id from the request header.
    pub cluster_id: u128,
    /// Client id from the request header.
    pub client_id: u128,
    /// The request body, events in chain order.
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct SimState {
    auto_register: bool,
    register_requested: bool,
    events: VecDeque<SessionEvent>,
    inflight: Option<CapturedRequest>,
    history: Vec<CapturedRequest>,
}

/// In-memory [`ProtocolClient`] test double.
#[derive(Debug)]
pub struct SimSession {
    state: Arc<Mutex<SimState>>,
}

/// Shared handle for scripting a [`SimSession`].
#[derive(Debug, Clone)]
pub struct SimController {
    state: Arc<Mutex<SimState>>,
}

impl SimSession {
    /// A session that acknowledges registration as soon as it is requested.
    pub fn new() -> (SimSession, SimController) {
        Self::build(true)
    }

    /// A session whose registration reply must be scripted explicitly via
    /// [`SimController::deliver_registration`].
    pub fn with_manual_registration() -> (SimSession, SimController) {
        Self::build(false)
    }

    fn build(auto_register: bool) -> (SimSession, SimController) {
        let state = Arc::new(Mutex::new(SimState { auto_register, ..SimState::default() }));
        (SimSession { state: Arc::clone(&state) }, SimController { state })
    }
}

impl ProtocolClient for SimSession {
    fn register(&mut self) {
        let mut state = self.state.lock();
        state.register_requested = true;
        if state.auto_register {
            state.events.push_back(SessionEvent::Registered);
        }
    }

    fn get_message(&mut self) -> Message {
        Message::default()
    }

    fn release_message(&mut self, _message: Message) {}

    fn raw_request(&mut self, message: Message) {
        let bytes = message.as_bytes();
        debug_assert!(bytes.len() >= HEADER_SIZE);
        let header = Header::read_from(bytes).expect("sim session received a malformed frame");
        let captured = CapturedRequest {
            operation: header.operation,
            cluster_id: header.cluster_id,
            client_id: header.client_id,
            body: bytes[HEADER_SIZE..].to_vec(),
        };
        let mut state = self.state.lock();
        debug_assert!(state.inflight.is_none(), "sim session accepts one request at a time");
        state.inflight = Some(captured.clone());
        state.history.push(captured);
    }

    fn request_inflight(&self) -> bool {
        self.state.lock().inflight.is_some()
    }

    fn tick(&mut self) {}

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.state.lock().events.pop_front()
    }
}

impl SimController {
    /// Whether the multiplexer has started the registration handshake.
    pub fn register_requested(&self) -> bool {
        self.state.lock().register_requested
    }

    /// Script the registration reply.
    pub fn deliver_registration(&self) {
        self.state.lock().events.push_back(SessionEvent::Registered);
    }

    /// The request currently on the simulated wire, if any.
    pub fn inflight(&self) -> Option<CapturedRequest> {
        self.state.lock().inflight.clone()
    }

    /// Every request handed to the session so far, in order.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.lock().history.clone()
    }

    /// Number of requests handed to the session so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Complete the inflight request with the given reply body.
    ///
    /// Returns `false` when no request is inflight.
    pub fn complete(&self, body: &[u8]) -> bool {
        let mut state = self.state.lock();
        let Some(request) = state.inflight.take() else { return false };
        state.events.push_back(SessionEvent::Reply {
            operation: request.operation,
            body: BytesMut::from(body),
        });
        true
    }

    /// Fail the inflight request with a transport status.
    ///
    /// Returns `false` when no request is inflight.
    pub fn fail(&self, status: PacketStatus) -> bool {
        let mut state = self.state.lock();
        if state.inflight.take().is_none() {
            return false;
        }
        state.events.push_back(SessionEvent::RequestFailed { status });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_requests_and_scripts_replies() {
        let (mut session, controller) = SimSession::new();
        session.register();
        assert!(controller.register_requested());
        assert!(matches!(session.poll_event(), Some(SessionEvent::Registered)));

        let mut message = session.get_message();
        message.begin();
        message.put_body(&[1, 2, 3, 4]);
        message.finish(9, 11, 3);
        session.raw_request(message);

        assert!(session.request_inflight());
        let captured = controller.inflight().unwrap();
        assert_eq!(captured.operation, 3);
        assert_eq!(captured.cluster_id, 9);
        assert_eq!(captured.client_id, 11);
        assert_eq!(captured.body, vec![1, 2, 3, 4]);

        assert!(controller.complete(&[5, 6]));
        assert!(!session.request_inflight());
        match session.poll_event() {
            Some(SessionEvent::Reply { operation, body }) => {
                assert_eq!(operation, 3);
                assert_eq!(&body[..], &[5, 6]);
            }
            other => panic!("expected reply event, got {other:?}"),
        }
        assert!(!controller.complete(&[]));
    }

    #[test]
    fn manual_registration_is_withheld_until_scripted() {
        let (mut session, controller) = SimSession::with_manual_registration();
        session.register();
        assert!(session.poll_event().is_none());
        controller.deliver_registration();
        assert!(matches!(session.poll_event(), Some(SessionEvent::Registered)));
    }
}
