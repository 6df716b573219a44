//! Tracker command bytes
//!
//! The command byte is open-ended: storage requests use many more values
//! than the ones listed here, so `Command` is a thin wrapper rather than an
//! exhaustive enum.

use std::fmt;

/// Status byte signalling success in a response header
pub const STATUS_OK: u8 = 0;

/// Command byte carried in a packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command(pub u8);

impl Command {
    /// Generic response to any tracker or storage request
    pub const RESPONSE: Command = Command(100);
    /// Client is closing the connection; no response is sent
    pub const QUIT: Command = Command(82);
    /// Liveness probe; answered with an empty `RESPONSE`
    pub const ACTIVE_TEST: Command = Command(111);

    /// Get the raw command byte
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::RESPONSE => write!(f, "RESPONSE(100)"),
            Command::QUIT => write!(f, "QUIT(82)"),
            Command::ACTIVE_TEST => write!(f, "ACTIVE_TEST(111)"),
            Command(other) => write!(f, "CMD({})", other),
        }
    }
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        Self(value)
    }
}
