//! Tokio codec for tracker packets

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::{Command, STATUS_OK};
use crate::error::ProtocolError;
use crate::header::{PacketHeader, MAX_BODY_SIZE};

/// A complete packet with header and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command byte of this packet
    pub command: Command,
    /// Status byte (meaningful on responses)
    pub status: u8,
    /// Packet body
    pub body: Bytes,
}

impl Packet {
    /// Create a new request packet
    pub fn request(command: Command, body: Bytes) -> Self {
        Self {
            command,
            status: STATUS_OK,
            body,
        }
    }

    /// Liveness probe packet
    pub fn active_test() -> Self {
        Self::request(Command::ACTIVE_TEST, Bytes::new())
    }

    /// Polite close packet
    pub fn quit() -> Self {
        Self::request(Command::QUIT, Bytes::new())
    }

    /// Check that this packet is a successful response and return its body
    pub fn into_response_body(self) -> Result<Bytes, ProtocolError> {
        if self.command != Command::RESPONSE {
            return Err(ProtocolError::UnexpectedCommand {
                expected: Command::RESPONSE,
                actual: self.command,
            });
        }
        if self.status != STATUS_OK {
            return Err(ProtocolError::ErrorStatus(self.status));
        }
        Ok(self.body)
    }
}

/// Codec for encoding/decoding tracker packets
#[derive(Debug)]
pub struct PacketCodec {
    /// Header already consumed from the buffer whose body is incomplete
    pending_header: Option<PacketHeader>,
    /// Largest body accepted in either direction
    max_body_size: usize,
}

impl PacketCodec {
    /// Create a new codec with the default body limit
    pub fn new() -> Self {
        Self::with_max_body_size(MAX_BODY_SIZE)
    }

    /// Create a codec with a custom body limit
    pub fn with_max_body_size(max_body_size: usize) -> Self {
        Self {
            pending_header: None,
            max_body_size,
        }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match PacketHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let body_len = header.body_length as usize;
        if body_len > self.max_body_size {
            return Err(ProtocolError::BodyTooLarge {
                size: body_len,
                max: self.max_body_size,
            });
        }

        if src.len() < body_len {
            src.reserve(body_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let body = src.split_to(body_len).freeze();
        tracing::trace!(command = %header.command, status = header.status, body_len, "decoded packet");

        Ok(Some(Packet {
            command: header.command,
            status: header.status,
            body,
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() && self.pending_header.is_none() => Ok(None),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = packet.body.len();
        if body_len > self.max_body_size {
            return Err(ProtocolError::BodyTooLarge {
                size: body_len,
                max: self.max_body_size,
            });
        }

        PacketHeader::new(packet.command, body_len as u64, packet.status).encode(dst);
        dst.extend_from_slice(&packet.body);

        Ok(())
    }
}
