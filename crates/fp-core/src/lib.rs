//! fp-core: Core abstractions and configuration for fdfs-pool
//!
//! This crate provides the shared types, error taxonomy, seam traits and
//! configuration structures used by the pool and the storage client.

pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use error::{ClientError, ConfigError, ConnectionError, OperationError, PoolError};
pub use types::{ConnectionId, ConnectionState, TrackerAddress};
