//! Production protocol session over TCP.
//!
//! Implements the narrow wire touchpoint the multiplexer consumes: a
//! registration handshake, then one framed request at a time with the reply
//! surfaced as a [`SessionEvent`]. Replica failover is a simple rotation with
//! a tick-counted backoff; consensus, view changes, and read semantics are
//! entirely the cluster's business.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use crate::error::PacketStatus;
use crate::protocol::message::{Message, MessagePool};
use crate::protocol::wire::{
    Header, HEADER_SIZE, OPERATION_EVICT, OPERATION_REGISTER,
};
use crate::protocol::{ProtocolClient, SessionEvent};

/// Budget for one blocking connect attempt inside a tick.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Ticks to wait after a failed connect before trying the next replica.
const RECONNECT_BACKOFF_TICKS: u32 = 20;

/// Bytes read from the socket per read call.
const READ_CHUNK: usize = 16 * 1024;

struct Connection {
    stream: TcpStream,
    send: BytesMut,
    recv: BytesMut,
    registered: bool,
}

struct Inflight {
    operation: u8,
    message: Message,
}

/// TCP-backed [`ProtocolClient`].
pub struct TcpSession {
    cluster_id: u128,
    client_id: u128,
    replicas: Vec<SocketAddr>,
    replica: usize,
    conn: Option<Connection>,
    backoff_ticks: u32,
    register_requested: bool,
    registered_once: bool,
    evicted: bool,
    inflight: Option<Inflight>,
    pool: MessagePool,
    events: VecDeque<SessionEvent>,
}

impl TcpSession {
    /// Create a session for the given replica set. No I/O happens until the
    /// first [`tick`](ProtocolClient::tick).
    pub fn new(cluster_id: u128, client_id: u128, replicas: Vec<SocketAddr>) -> Self {
        debug_assert!(!replicas.is_empty());
        Self {
            cluster_id,
            client_id,
            replicas,
            replica: 0,
            conn: None,
            backoff_ticks: 0,
            register_requested: false,
            registered_once: false,
            evicted: false,
            inflight: None,
            pool: MessagePool::new(),
            events: VecDeque::new(),
        }
    }

    fn connect(&mut self) {
        let address = self.replicas[self.replica];
        match TcpStream::connect_timeout(&address, CONNECT_TIMEOUT) {
            Ok(stream) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    warn!(%address, %err, "failed to switch replica stream to nonblocking");
                    self.bump_replica();
                    return;
                }
                let _ = stream.set_nodelay(true);
                debug!(%address, "connected to replica");
                let mut conn = Connection {
                    stream,
                    send: BytesMut::new(),
                    recv: BytesMut::new(),
                    registered: false,
                };
                if self.register_requested {
                    let mut register = self.pool.get();
                    register.begin();
                    register.finish(self.cluster_id, self.client_id, OPERATION_REGISTER);
                    conn.send.extend_from_slice(register.as_bytes());
                    self.pool.put(register);
                }
                self.conn = Some(conn);
            }
            Err(err) => {
                trace!(%address, %err, "replica connect failed");
                self.bump_replica();
            }
        }
    }

    fn bump_replica(&mut self) {
        self.replica = (self.replica + 1) % self.replicas.len();
        self.backoff_ticks = RECONNECT_BACKOFF_TICKS;
    }

    fn disconnect(&mut self, reason: &str) {
        warn!(replica = self.replica, reason, "replica session lost");
        self.conn = None;
        self.bump_replica();
    }

    /// Flush queued outbound bytes. Returns false when the connection died.
    fn flush_send(conn: &mut Connection) -> bool {
        while !conn.send.is_empty() {
            match conn.stream.write(&conn.send) {
                Ok(0) => return false,
                Ok(written) => conn.send.advance(written),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(_) => return false,
            }
        }
        true
    }

    /// Pull available inbound bytes. Returns false when the connection died.
    fn fill_recv(conn: &mut Connection) -> bool {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match conn.stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(read) => conn.recv.extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return true,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(_) => return false,
            }
        }
    }

    fn process_frames(&mut self) {
        loop {
            let Some(conn) = self.conn.as_mut() else { return };
            if conn.recv.len() < HEADER_SIZE {
                return;
            }
            let header = match Header::read_from(&conn.recv) {
                Ok(header) => header,
                Err(err) => {
                    self.disconnect(&err.to_string());
                    return;
                }
            };
            let total = HEADER_SIZE + header.body_size as usize;
            if conn.recv.len() < total {
                return;
            }
            let mut frame = conn.recv.split_to(total);
            let body = frame.split_off(HEADER_SIZE);
            if let Err(err) = header.verify_body(&body) {
                self.disconnect(&err.to_string());
                return;
            }
            self.on_frame(header, body);
        }
    }

    fn on_frame(&mut self, header: Header, body: BytesMut) {
        match header.operation {
            OPERATION_REGISTER => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.registered = true;
                    // A request accepted before this (re)connection completes
                    // goes on the wire now.
                    if let Some(inflight) = &self.inflight {
                        conn.send.extend_from_slice(inflight.message.as_bytes());
                    }
                }
                if !self.registered_once {
                    self.registered_once = true;
                    self.events.push_back(SessionEvent::Registered);
                }
            }
            OPERATION_EVICT => {
                warn!("client evicted by the cluster");
                self.evicted = true;
                if let Some(inflight) = self.inflight.take() {
                    self.pool.put(inflight.message);
                    self.events
                        .push_back(SessionEvent::RequestFailed { status: PacketStatus::ClientEvicted });
                }
            }
            operation => {
                let matches = self.inflight.as_ref().is_some_and(|i| i.operation == operation);
                if matches {
                    let inflight = self.inflight.take().map(|i| i.message);
                    if let Some(message) = inflight {
                        self.pool.put(message);
                    }
                    self.events.push_back(SessionEvent::Reply { operation, body });
                } else {
                    warn!(operation, "dropping reply that matches no inflight request");
                }
            }
        }
    }
}

impl ProtocolClient for TcpSession {
    fn register(&mut self) {
        self.register_requested = true;
    }

    fn get_message(&mut self) -> Message {
        self.pool.get()
    }

    fn release_message(&mut self, message: Message) {
        self.pool.put(message);
    }

    fn raw_request(&mut self, message: Message) {
        debug_assert!(self.inflight.is_none(), "protocol client accepts one request at a time");
        if self.evicted {
            self.pool.put(message);
            self.events
                .push_back(SessionEvent::RequestFailed { status: PacketStatus::ClientEvicted });
            return;
        }
        let operation = match Header::read_from(message.as_bytes()) {
            Ok(header) => header.operation,
            Err(err) => {
                warn!(%err, "refusing to send malformed request frame");
                self.pool.put(message);
                return;
            }
        };
        if let Some(conn) = self.conn.as_mut() {
            if conn.registered {
                conn.send.extend_from_slice(message.as_bytes());
            }
        }
        self.inflight = Some(Inflight { operation, message });
    }

    fn request_inflight(&self) -> bool {
        self.inflight.is_some()
    }

    fn tick(&mut self) {
        if self.evicted {
            return;
        }
        if self.conn.is_none() {
            if self.backoff_ticks > 0 {
                self.backoff_ticks -= 1;
                return;
            }
            if self.register_requested {
                self.connect();
            }
            return;
        }
        let alive = {
            // Unwrap-free: checked above, and I/O errors clear `conn` only
            // via disconnect() after this borrow ends.
            let Some(conn) = self.conn.as_mut() else { return };
            Self::flush_send(conn) && Self::fill_recv(conn)
        };
        if !alive {
            self.disconnect("io error or peer hangup");
            return;
        }
        self.process_frames();
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }
}

impl std::fmt::Debug for TcpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSession")
            .field("replicas", &self.replicas)
            .field("connected", &self.conn.is_some())
            .field("registered", &self.registered_once)
            .field("inflight", &self.inflight.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    const CLUSTER: u128 = 7;
    const CLIENT: u128 = 0xBEEF;

    fn read_frame(stream: &mut TcpStream) -> (Header, Vec<u8>) {
        let mut header_bytes = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header_bytes).unwrap();
        let header = Header::read_from(&header_bytes).unwrap();
        let mut body = vec![0u8; header.body_size as usize];
        stream.read_exact(&mut body).unwrap();
        header.verify_body(&body).unwrap();
        (header, body)
    }

    fn write_frame(stream: &mut TcpStream, operation: u8, body: &[u8]) {
        let mut header_bytes = [0u8; HEADER_SIZE];
        Header::for_body(CLUSTER, CLIENT, operation, body).write_to(&mut header_bytes);
        stream.write_all(&header_bytes).unwrap();
        stream.write_all(body).unwrap();
    }

    #[test]
    fn session_registers_then_round_trips_a_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let (register, body) = read_frame(&mut stream);
            assert_eq!(register.operation, OPERATION_REGISTER);
            assert_eq!(register.client_id, CLIENT);
            assert!(body.is_empty());
            write_frame(&mut stream, OPERATION_REGISTER, &[]);

            let (request, body) = read_frame(&mut stream);
            assert_eq!(request.operation, 3);
            assert_eq!(body.len(), 16);
            write_frame(&mut stream, 3, &[0u8; 128]);
        });

        let mut session = TcpSession::new(CLUSTER, CLIENT, vec![address]);
        session.register();

        let mut message = session.get_message();
        message.begin();
        message.put_body(&[0u8; 16]);
        message.finish(CLUSTER, CLIENT, 3);
        session.raw_request(message);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut registered = false;
        let mut reply_len = None;
        while Instant::now() < deadline && reply_len.is_none() {
            session.tick();
            while let Some(event) = session.poll_event() {
                match event {
                    SessionEvent::Registered => registered = true,
                    SessionEvent::Reply { operation, body } => {
                        assert_eq!(operation, 3);
                        reply_len = Some(body.len());
                    }
                    SessionEvent::RequestFailed { status } => panic!("request failed: {status}"),
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(registered);
        assert_eq!(reply_len, Some(128));
        assert!(!session.request_inflight());
        server.join().unwrap();
    }

    #[test]
    fn eviction_fails_the_inflight_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let (register, _) = read_frame(&mut stream);
            assert_eq!(register.operation, OPERATION_REGISTER);
            write_frame(&mut stream, OPERATION_REGISTER, &[]);
            let (_request, _) = read_frame(&mut stream);
            write_frame(&mut stream, OPERATION_EVICT, &[]);
        });

        let mut session = TcpSession::new(CLUSTER, CLIENT, vec![address]);
        session.register();

        let mut message = session.get_message();
        message.begin();
        message.put_body(&[0u8; 16]);
        message.finish(CLUSTER, CLIENT, 4);
        session.raw_request(message);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut failure = None;
        while Instant::now() < deadline && failure.is_none() {
            session.tick();
            while let Some(event) = session.poll_event() {
                if let SessionEvent::RequestFailed { status } = event {
                    failure = Some(status);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(failure, Some(PacketStatus::ClientEvicted));
        server.join().unwrap();
    }
}
