//! Core error types for fdfs-pool

use fp_protocol::ProtocolError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::TrackerAddress;

/// Errors surfaced by the connection pool itself
#[derive(Error, Debug)]
pub enum PoolError {
    /// No connection became available within the wait budget.
    /// Signals contention, never a reason to drop a connection.
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),

    /// Establishing a new tracker connection failed; no slot was consumed
    #[error("Tracker {address} unavailable: {source}")]
    ConnectFailure {
        address: TrackerAddress,
        #[source]
        source: ConnectionError,
    },

    /// Caller broke the checkout/checkin/drop contract
    #[error("Invalid pool state: {0}")]
    InvalidState(String),

    /// The pool has been shut down
    #[error("Connection pool is shut down")]
    Closed,

    /// Pool was constructed from an invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PoolError {
    /// Stable label for log fields, so contention and backend
    /// unavailability can be told apart.
    pub fn kind(&self) -> &'static str {
        match self {
            PoolError::Timeout(_) => "timeout",
            PoolError::ConnectFailure { .. } => "connect_failure",
            PoolError::InvalidState(_) => "invalid_state",
            PoolError::Closed => "closed",
            PoolError::Config(_) => "config",
        }
    }

    /// Whether this is a checkout timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout(_))
    }
}

/// Errors from the raw connect/probe primitives
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Address could not be resolved to any socket address
    #[error("Cannot resolve tracker address: {0}")]
    Resolve(String),

    /// Connect handshake did not finish in time
    #[error("Connect timed out after {0:?}")]
    TimedOut(Duration),

    /// Liveness probe got no valid answer
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    Closed,

    /// Framing error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while using a checked-out connection for real work
#[derive(Error, Debug)]
pub enum OperationError {
    /// Transport failed mid-operation
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Response could not be framed or carried an error status
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Storage backend rejected the request
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors returned by the storage client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not obtain a connection
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Operation failed on an obtained connection
    #[error("Operation failed: {0}")]
    Operation(#[from] OperationError),

    /// Local file could not be read
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_and_connect_failure_are_distinct() {
        let timeout = PoolError::Timeout(Duration::from_secs(5));
        let connect = PoolError::ConnectFailure {
            address: TrackerAddress::new("tracker", 22122),
            source: ConnectionError::TimedOut(Duration::from_secs(1)),
        };

        assert!(timeout.is_timeout());
        assert!(!connect.is_timeout());
        assert_ne!(timeout.kind(), connect.kind());
        assert_eq!(
            connect.to_string(),
            "Tracker tracker:22122 unavailable: Connect timed out after 1s"
        );
    }
}
