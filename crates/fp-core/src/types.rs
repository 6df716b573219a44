//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Port a FastDFS tracker listens on unless told otherwise
pub const DEFAULT_TRACKER_PORT: u16 = 22122;

/// Identity of one pooled connection, unique within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Host and port of the tracker service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackerAddress {
    /// Hostname or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl TrackerAddress {
    /// Create a new tracker address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address on the default tracker port
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_TRACKER_PORT)
    }
}

impl Default for TrackerAddress {
    fn default() -> Self {
        Self::with_default_port("127.0.0.1")
    }
}

impl fmt::Display for TrackerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for TrackerAddress {
    type Err = ConfigError;

    /// Parse `host`, `host:port` or `[v6]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::Invalid("tracker address is empty".into()));
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ConfigError::Invalid(format!("unterminated IPv6 address: {}", s)))?;
            return match tail.strip_prefix(':') {
                Some(port) => Ok(Self::new(host, parse_port(port)?)),
                None if tail.is_empty() => Ok(Self::with_default_port(host)),
                None => Err(ConfigError::Invalid(format!("invalid tracker address: {}", s))),
            };
        }

        match s.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Ok(Self::with_default_port(s)),
            Some((host, port)) if !host.is_empty() => Ok(Self::new(host, parse_port(port)?)),
            Some(_) => Err(ConfigError::Invalid(format!("missing host in: {}", s))),
            None => Ok(Self::with_default_port(s)),
        }
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    port.parse::<u16>()
        .map_err(|_| ConfigError::Invalid(format!("invalid tracker port: {}", port)))
}

impl TryFrom<String> for TrackerAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrackerAddress> for String {
    fn from(address: TrackerAddress) -> Self {
        address.to_string()
    }
}

/// Lifecycle state of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Parked in the pool, available for checkout
    Idle,
    /// Held by exactly one borrower
    InUse,
    /// Failed; being closed and removed, never handed out
    Broken,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::InUse => write!(f, "in-use"),
            ConnectionState::Broken => write!(f, "broken"),
        }
    }
}
