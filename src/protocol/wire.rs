//! Binary framing for cluster requests and replies.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Protocol magic: `b"TGRD"` read as a little-endian `u32`.
pub const MAGIC: u32 = u32::from_le_bytes(*b"TGRD");

/// Current protocol version.
pub const VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Maximum size of one protocol message, header included.
pub const MESSAGE_SIZE_MAX: usize = 1 << 20;

/// Maximum size of a message body.
pub const BODY_SIZE_MAX: u32 = (MESSAGE_SIZE_MAX - HEADER_SIZE) as u32;

/// Operation code reserved for the registration handshake.
pub const OPERATION_REGISTER: u8 = 0;

/// Operation code of an eviction notice sent by the cluster.
pub const OPERATION_EVICT: u8 = 255;

/// Message header shared by requests and replies.
///
/// Wire layout (all integers little-endian):
///
/// ```text
/// Offset | Size | Field
/// -------|------|---------------------------
///   0    |  4   | Magic bytes (b"TGRD")
///   4    |  1   | Protocol version
///   5    |  1   | Operation code
///   6    |  2   | Reserved
///   8    |  4   | Body size
///  12    |  4   | CRC32 checksum of the body
///  16    | 16   | Cluster id
///  32    | 16   | Client id
///  48    | 16   | Reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub cluster_id: u128,
    pub client_id: u128,
    pub operation: u8,
    pub body_size: u32,
    pub checksum: u32,
}

/// Framing failures detected while decoding a header.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("invalid magic {actual:#010x}, expected {expected:#010x}")]
    InvalidMagic { actual: u32, expected: u32 },

    #[error("unsupported protocol version {version}, supported {supported}")]
    UnsupportedVersion { version: u8, supported: u8 },

    #[error("body size {actual} exceeds maximum {max}")]
    BodyTooLarge { actual: u32, max: u32 },

    #[error("body checksum mismatch: header {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl Header {
    /// Build a header for `body`, computing its checksum.
    pub fn for_body(cluster_id: u128, client_id: u128, operation: u8, body: &[u8]) -> Self {
        Self {
            cluster_id,
            client_id,
            operation,
            body_size: body.len() as u32,
            checksum: checksum(body),
        }
    }

    /// Write the header into `out`, which must be exactly [`HEADER_SIZE`] bytes.
    pub fn write_to(&self, mut out: &mut [u8]) {
        debug_assert_eq!(out.len(), HEADER_SIZE);
        out.put_u32_le(MAGIC);
        out.put_u8(VERSION);
        out.put_u8(self.operation);
        out.put_u16_le(0);
        out.put_u32_le(self.body_size);
        out.put_u32_le(self.checksum);
        out.put_u128_le(self.cluster_id);
        out.put_u128_le(self.client_id);
        out.put_bytes(0, 16);
    }

    /// Decode a header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// # Errors
    ///
    /// Fails on bad magic, an unsupported version, or an oversized body.
    /// The body checksum is verified separately once the body has arrived,
    /// via [`Header::verify_body`].
    pub fn read_from(buf: &[u8]) -> Result<Self, WireError> {
        debug_assert!(buf.len() >= HEADER_SIZE);
        let mut buf = &buf[..HEADER_SIZE];

        let magic = buf.get_u32_le();
        if magic != MAGIC {
            return Err(WireError::InvalidMagic { actual: magic, expected: MAGIC });
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(WireError::UnsupportedVersion { version, supported: VERSION });
        }
        let operation = buf.get_u8();
        let _reserved = buf.get_u16_le();
        let body_size = buf.get_u32_le();
        if body_size > BODY_SIZE_MAX {
            return Err(WireError::BodyTooLarge { actual: body_size, max: BODY_SIZE_MAX });
        }
        let checksum = buf.get_u32_le();
        let cluster_id = buf.get_u128_le();
        let client_id = buf.get_u128_le();

        Ok(Self { cluster_id, client_id, operation, body_size, checksum })
    }

    /// Check the received body against the header checksum.
    pub fn verify_body(&self, body: &[u8]) -> Result<(), WireError> {
        let actual = checksum(body);
        if actual != self.checksum {
            return Err(WireError::ChecksumMismatch { expected: self.checksum, actual });
        }
        Ok(())
    }
}

/// CRC32 checksum of a message body.
pub fn checksum(body: &[u8]) -> u32 {
    crc32fast::hash(body)
}
