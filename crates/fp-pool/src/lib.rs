//! fp-pool: Bounded connection pool for FastDFS trackers
//!
//! The pool hands out exclusive tracker connections under a capacity limit,
//! blocks callers up to a timeout when all are busy, lets callers drop
//! connections they found broken, and keeps idle connections alive with a
//! periodic heartbeat. [`StorageClient`] layers upload, download and delete
//! on top, one pooled connection per call.

pub mod client;
pub mod connection;

#[cfg(test)]
mod testing;

pub use client::StorageClient;
pub use connection::{
    ConnectionPool, HeartbeatMonitor, HeartbeatReport, PoolStatus, PooledConnection,
    TrackerConnection, TrackerConnector,
};
