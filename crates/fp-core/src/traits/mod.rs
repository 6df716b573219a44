//! Core trait definitions

mod connection;
mod storage;

pub use connection::ConnectionFactory;
pub use storage::StorageOps;
