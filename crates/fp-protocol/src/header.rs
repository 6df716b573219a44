//! Packet header encoding/decoding
//!
//! Every tracker packet starts with a 10-byte header:
//! - body_length: 8 bytes (i64, big-endian)
//! - command: 1 byte
//! - status: 1 byte (0 on success, errno otherwise)

use bytes::{Buf, BufMut, BytesMut};

use crate::command::{Command, STATUS_OK};
use crate::error::ProtocolError;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 10;

/// Largest body the codec will buffer (64MB)
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Header preceding every packet body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Length of the body that follows, in bytes
    pub body_length: u64,
    /// Command byte
    pub command: Command,
    /// Status byte
    pub status: u8,
}

impl PacketHeader {
    /// Create a new header
    pub fn new(command: Command, body_length: u64, status: u8) -> Self {
        Self {
            body_length,
            command,
            status,
        }
    }

    /// Header for a request without a body
    pub fn request(command: Command) -> Self {
        Self::new(command, 0, STATUS_OK)
    }

    /// Whether the header reports success
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_i64(self.body_length as i64);
        dst.put_u8(self.command.as_u8());
        dst.put_u8(self.status);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let body_length = src.get_i64();
        if body_length < 0 {
            return Err(ProtocolError::InvalidLength(body_length));
        }
        let command = Command(src.get_u8());
        let status = src.get_u8();

        Ok(Some(Self {
            body_length: body_length as u64,
            command,
            status,
        }))
    }
}
