//! fp-protocol: Tracker packet framing for fdfs-pool
//!
//! This crate defines the fixed header that prefixes every packet exchanged
//! with a FastDFS tracker, plus the control packets the connection pool
//! needs to keep connections alive and close them politely. Storage requests
//! (upload, download, delete) ride on the same framing but are built by the
//! storage layer, not here.

pub mod codec;
pub mod command;
pub mod error;
pub mod header;

pub use codec::{Packet, PacketCodec};
pub use command::{Command, STATUS_OK};
pub use error::ProtocolError;
pub use header::{PacketHeader, HEADER_SIZE, MAX_BODY_SIZE};
