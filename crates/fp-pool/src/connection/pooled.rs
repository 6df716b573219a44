//! Checked-out connection handle

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use fp_core::traits::ConnectionFactory;
use fp_core::types::ConnectionId;

use super::pool::PoolInner;

/// A connection exclusively held by one borrower.
///
/// Give it back with [`ConnectionPool::checkin`](super::ConnectionPool::checkin)
/// after a successful operation, or [`ConnectionPool::drop_connection`](super::ConnectionPool::drop_connection)
/// after a failed one. Both consume the handle, so a connection cannot be
/// returned twice. A handle that simply goes out of scope is treated as
/// broken: its slot is freed at once and the connection is closed through
/// the factory on a background task.
pub struct PooledConnection<F: ConnectionFactory> {
    pool: Weak<PoolInner<F>>,
    pool_id: u64,
    id: ConnectionId,
    created_at: Instant,
    conn: Option<F::Connection>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    pub(crate) fn new(
        pool: &Arc<PoolInner<F>>,
        id: ConnectionId,
        conn: F::Connection,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool: Arc::downgrade(pool),
            pool_id: pool.id,
            id,
            created_at,
            conn: Some(conn),
            permit: Some(permit),
        }
    }

    /// Identity of this connection within its pool
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// When the underlying connection was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Move the connection and its permit out, disarming the drop handler
    pub(crate) fn take_parts(&mut self) -> Option<(F::Connection, OwnedSemaphorePermit)> {
        let conn = self.conn.take()?;
        let permit = self.permit.take()?;
        Some((conn, permit))
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("pooled connection accessed after release")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("pooled connection accessed after release")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.abandon(self.id, conn),
            None => drop(conn),
        }
        // The permit goes last so the freed slot is visible before any
        // waiter wakes.
        self.permit.take();
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .field("released", &self.conn.is_none())
            .finish()
    }
}
