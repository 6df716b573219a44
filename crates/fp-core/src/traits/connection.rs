//! Connection factory trait

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::types::TrackerAddress;

/// Raw connect/probe/close primitives the pool is built on.
///
/// The pool never inspects the connection itself; it only moves it between
/// borrowers and calls these three methods.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The live network handle managed by the pool
    type Connection: Send + 'static;

    /// Open a new connection to the tracker.
    ///
    /// Fails if the endpoint is unreachable or the handshake fails.
    async fn connect(&self, address: &TrackerAddress) -> Result<Self::Connection, ConnectionError>;

    /// Send a lightweight liveness probe over an idle connection
    async fn probe(&self, conn: &mut Self::Connection) -> Result<(), ConnectionError>;

    /// Close the connection. Never fails; errors are logged and swallowed.
    async fn close(&self, conn: Self::Connection);
}
