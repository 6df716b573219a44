//! Connection management

mod health;
mod pool;
mod pooled;
mod tcp;

pub use health::{HeartbeatMonitor, HeartbeatReport};
pub use pool::{ConnectionPool, PoolStatus};
pub use pooled::PooledConnection;
pub use tcp::{TrackerConnection, TrackerConnector};
