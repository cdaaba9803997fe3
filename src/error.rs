//! Error types for the Tallygrid client core.

use thiserror::Error;

/// Result type alias for client initialization.
pub type InitResult<T> = std::result::Result<T, InitError>;

/// Errors surfaced while constructing a [`Client`](crate::Client).
///
/// Every failure after the first resource acquisition rewinds the resources
/// acquired so far; a failed init leaves nothing behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    /// `concurrency_max` outside the accepted range.
    #[error("concurrency_max {requested} outside {min}..={max}")]
    ConcurrencyMaxInvalid { requested: u32, min: u32, max: u32 },

    /// An entry in the address list could not be parsed.
    #[error("invalid replica address: {0:?}")]
    AddressInvalid(String),

    /// The address list names more replicas than the cluster supports.
    #[error("address list exceeds {max} replicas")]
    AddressLimitExceeded { max: usize },

    /// OS-level failure to allocate a thread, socket, or file descriptor.
    #[error("system resources exhausted: {0}")]
    SystemResources(String),

    /// Allocator failure.
    #[error("out of memory")]
    OutOfMemory,

    /// Catch-all for failures the client cannot classify.
    #[error("unexpected initialization failure: {0}")]
    Unexpected(String),
}

/// Errors surfaced by packet acquisition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquireError {
    /// Every packet in the pool is currently in use.
    ///
    /// Transient: packets return to the pool as requests complete.
    #[error("all packets in use")]
    ConcurrencyMaxExceeded,

    /// The client is shutting down; no further packets will be handed out.
    #[error("client shut down")]
    Shutdown,
}

/// Terminal status of one submitted packet.
///
/// Validation statuses (`TooMuchData`, `InvalidOperation`, `InvalidDataSize`)
/// are assigned locally, before the packet ever reaches the pending queue or
/// the wire. `ClientShutdown` and `ClientEvicted` are assigned by the
/// transport layer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketStatus {
    /// The request completed and the completion carries a valid reply slice.
    Ok = 0,
    /// The packet body exceeds the maximum protocol message body.
    TooMuchData = 1,
    /// The operation code is not a known request variant.
    InvalidOperation = 2,
    /// The body length is zero or not a multiple of the operation's event size.
    InvalidDataSize = 3,
    /// The client shut down before the request could complete.
    ClientShutdown = 4,
    /// The cluster evicted this client session.
    ClientEvicted = 5,
}

impl PacketStatus {
    /// Decode a status from its wire/ABI representation.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::TooMuchData),
            2 => Some(Self::InvalidOperation),
            3 => Some(Self::InvalidDataSize),
            4 => Some(Self::ClientShutdown),
            5 => Some(Self::ClientEvicted),
            _ => None,
        }
    }

    /// The ABI representation of this status.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::TooMuchData => f.write_str("too much data"),
            Self::InvalidOperation => f.write_str("invalid operation"),
            Self::InvalidDataSize => f.write_str("invalid data size"),
            Self::ClientShutdown => f.write_str("client shutdown"),
            Self::ClientEvicted => f.write_str("client evicted"),
        }
    }
}

impl std::error::Error for PacketStatus {}
