//! Connection pool implementation
//!
//! # Accounting
//!
//! A FIFO semaphore with `capacity` permits gates every borrower: callers of
//! `checkout`, `prefill`, and the heartbeat monitor while it probes. A
//! permit holder either claims an idle connection or, only when none is
//! idle, opens a new one. Idle connections hold no permit, so the number of
//! tracked connections plus in-flight connects never exceeds `capacity`.
//!
//! Bookkeeping lives behind one `std::sync::Mutex` that is never held
//! across an `.await`. Network I/O (connect, probe, close) always happens
//! outside the lock on a connection the current task exclusively owns.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fp_core::config::PoolConfig;
use fp_core::error::{ConnectionError, PoolError};
use fp_core::traits::ConnectionFactory;
use fp_core::types::{ConnectionId, ConnectionState, TrackerAddress};

use super::health::HeartbeatMonitor;
use super::pooled::PooledConnection;

/// Source of pool identities, used to reject handles from another pool
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Bounded pool of connections to one tracker.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    pub(crate) inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Point-in-time view of the pool, for logs and health endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Configured maximum
    pub capacity: usize,
    /// Connections currently tracked (idle + in use + broken)
    pub size: usize,
    /// Connections available for checkout
    pub idle: usize,
    /// Connections held by a borrower
    pub in_use: usize,
    /// Connections being closed after a failure
    pub broken: usize,
    /// Callers blocked in `checkout`
    pub waiting: usize,
    /// Checkouts that gave up waiting
    pub timeouts: u64,
    /// Failed attempts to open a connection
    pub connect_failures: u64,
    /// Connections discarded by their borrower
    pub dropped: u64,
    /// Idle connections evicted by the heartbeat
    pub evicted: u64,
}

/// Why a connection is being discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiscardReason {
    /// Borrower called `drop_connection`
    Dropped,
    /// Heartbeat probe failed
    Evicted,
    /// Handle went out of scope without checkin or drop
    Abandoned,
}

struct Slot<C> {
    state: ConnectionState,
    last_activity: Instant,
    created_at: Instant,
    /// Present only while the connection is idle
    conn: Option<C>,
}

struct PoolState<C> {
    slots: HashMap<ConnectionId, Slot<C>>,
    /// Idle connection ids, oldest checkin first
    idle: VecDeque<ConnectionId>,
}

#[derive(Default)]
struct Counters {
    timeouts: AtomicU64,
    connect_failures: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

pub(crate) struct PoolInner<F: ConnectionFactory> {
    pub(crate) id: u64,
    pub(crate) config: PoolConfig,
    pub(crate) factory: F,
    pub(crate) shutdown: CancellationToken,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState<F::Connection>>,
    next_conn_id: AtomicU64,
    waiting: AtomicUsize,
    counters: Counters,
}

/// Keeps `waiting` accurate even if the checkout future is dropped mid-wait
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Removes a broken slot once its connection has been closed, or if the
/// closing task is cancelled part way.
struct EvictGuard<'a, F: ConnectionFactory> {
    inner: &'a PoolInner<F>,
    id: ConnectionId,
}

impl<F: ConnectionFactory> Drop for EvictGuard<'_, F> {
    fn drop(&mut self) {
        self.inner.lock_state().slots.remove(&self.id);
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create an empty pool. No connection is opened until the first
    /// checkout or an explicit [`prefill`](Self::prefill).
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        config.validate()?;

        tracing::info!(
            tracker = %config.tracker,
            capacity = config.capacity,
            heartbeat_interval = ?config.heartbeat_interval,
            "Creating tracker connection pool"
        );

        let permits = Arc::new(Semaphore::new(config.capacity));
        Ok(Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                config,
                factory,
                shutdown: CancellationToken::new(),
                permits,
                state: Mutex::new(PoolState {
                    slots: HashMap::new(),
                    idle: VecDeque::new(),
                }),
                next_conn_id: AtomicU64::new(1),
                waiting: AtomicUsize::new(0),
                counters: Counters::default(),
            }),
        })
    }

    /// Tracker this pool connects to
    pub fn tracker(&self) -> &TrackerAddress {
        &self.inner.config.tracker
    }

    /// Maximum number of connections
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Configuration the pool was built with
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Check out a connection using the configured wait budget
    pub async fn checkout(&self) -> Result<PooledConnection<F>, PoolError> {
        self.checkout_timeout(self.inner.config.checkout_timeout).await
    }

    /// Check out a connection, waiting at most `wait` for one to free up.
    ///
    /// Waiters are served in FIFO order. A timeout leaves the pool untouched
    /// and is reported as [`PoolError::Timeout`], distinct from
    /// [`PoolError::ConnectFailure`] when a new connection cannot be opened.
    pub async fn checkout_timeout(&self, wait: Duration) -> Result<PooledConnection<F>, PoolError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(PoolError::Closed);
        }

        let permit = inner.acquire_permit(wait).await?;

        if let Some((id, conn, created_at)) = inner.claim_idle() {
            tracing::trace!(connection_id = %id, "Reusing idle connection");
            return Ok(PooledConnection::new(inner, id, conn, created_at, permit));
        }

        let (id, conn, created_at) = inner.open_connection().await?;
        Ok(PooledConnection::new(inner, id, conn, created_at, permit))
    }

    /// Return a healthy connection for reuse and wake the next waiter.
    ///
    /// A handle issued by a different pool is rejected with
    /// [`PoolError::InvalidState`]; it is then released back to the pool that
    /// issued it as an abandoned connection.
    pub fn checkin(&self, mut conn: PooledConnection<F>) -> Result<(), PoolError> {
        self.ensure_owned(&conn)?;
        let id = conn.id();
        let (raw, permit) = conn
            .take_parts()
            .ok_or_else(|| PoolError::InvalidState(format!("{} was already released", id)))?;

        let mut state = self.inner.lock_state();
        let closed = self.inner.shutdown.is_cancelled();
        match state.slots.get(&id).map(|slot| slot.state) {
            Some(ConnectionState::InUse) if !closed => {}
            Some(ConnectionState::InUse) | None if closed => {
                state.slots.remove(&id);
                drop(state);
                tracing::debug!(connection_id = %id, "Pool closed, discarding returned connection");
                self.inner.close_detached(id, raw);
                return Err(PoolError::Closed);
            }
            Some(other) => {
                return Err(PoolError::InvalidState(format!(
                    "{} is {}, expected in-use",
                    id, other
                )));
            }
            None => {
                return Err(PoolError::InvalidState(format!(
                    "{} is not tracked by this pool",
                    id
                )));
            }
        }

        if let Some(slot) = state.slots.get_mut(&id) {
            slot.state = ConnectionState::Idle;
            slot.last_activity = Instant::now();
            slot.conn = Some(raw);
        }
        state.idle.push_back(id);
        drop(state);

        // Release only after the connection is visible as idle, so the woken
        // waiter finds it instead of opening a new one.
        drop(permit);
        tracing::trace!(connection_id = %id, "Connection checked in");
        Ok(())
    }

    /// Permanently discard a connection the caller found unusable.
    ///
    /// The underlying handle is closed and its slot freed. No replacement is
    /// opened here; the next checkout that needs capacity opens one.
    pub async fn drop_connection(&self, mut conn: PooledConnection<F>) -> Result<(), PoolError> {
        self.ensure_owned(&conn)?;
        let id = conn.id();
        let (raw, permit) = conn
            .take_parts()
            .ok_or_else(|| PoolError::InvalidState(format!("{} was already released", id)))?;

        self.inner.discard(id, raw, DiscardReason::Dropped).await?;
        drop(permit);
        Ok(())
    }

    /// Open connections until the pool holds `capacity` of them, parking
    /// each one idle. Returns how many were opened.
    ///
    /// Stops early without error when other borrowers hold the remaining
    /// permits.
    pub async fn prefill(&self) -> Result<usize, PoolError> {
        let mut opened = Vec::new();

        let result = loop {
            if self.inner.lock_state().slots.len() >= self.inner.config.capacity {
                break Ok(());
            }
            let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            };
            match self.inner.open_connection().await {
                Ok((id, conn, created_at)) => {
                    opened.push(PooledConnection::new(&self.inner, id, conn, created_at, permit));
                }
                Err(e) => break Err(e),
            }
        };

        let count = opened.len();
        for conn in opened {
            self.checkin(conn)?;
        }
        result?;

        tracing::info!(opened = count, tracker = %self.tracker(), "Prefilled connection pool");
        Ok(count)
    }

    /// Start the heartbeat monitor for this pool using the configured
    /// interval and probe timeout.
    ///
    /// The task stops when the pool is shut down or dropped.
    pub fn spawn_heartbeat(&self) -> JoinHandle<()> {
        HeartbeatMonitor::from_config(&self.inner.config).spawn(self)
    }

    /// Current pool status
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock_state();
        let mut status = PoolStatus {
            capacity: self.inner.config.capacity,
            size: state.slots.len(),
            waiting: self.inner.waiting.load(Ordering::Relaxed),
            timeouts: self.inner.counters.timeouts.load(Ordering::Relaxed),
            connect_failures: self.inner.counters.connect_failures.load(Ordering::Relaxed),
            dropped: self.inner.counters.dropped.load(Ordering::Relaxed),
            evicted: self.inner.counters.evicted.load(Ordering::Relaxed),
            ..PoolStatus::default()
        };
        for slot in state.slots.values() {
            match slot.state {
                ConnectionState::Idle => status.idle += 1,
                ConnectionState::InUse => status.in_use += 1,
                ConnectionState::Broken => status.broken += 1,
            }
        }
        status
    }

    /// Close every idle connection and refuse further checkouts.
    ///
    /// Blocked waiters fail with [`PoolError::Closed`]. Connections still
    /// checked out are closed when they are returned or dropped.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.permits.close();

        let (idle, in_use) = {
            let mut state = self.inner.lock_state();
            let ids: Vec<ConnectionId> = state.idle.drain(..).collect();
            let idle: Vec<(ConnectionId, F::Connection)> = ids
                .into_iter()
                .filter_map(|id| state.slots.remove(&id).and_then(|slot| slot.conn).map(|c| (id, c)))
                .collect();
            (idle, state.slots.len())
        };

        let closed = idle.len();
        for (id, conn) in idle {
            tracing::debug!(connection_id = %id, "Closing idle connection");
            self.inner.factory.close(conn).await;
        }

        tracing::info!(closed, still_in_use = in_use, "Connection pool shut down");
    }

    /// Reject handles this pool did not issue
    fn ensure_owned(&self, conn: &PooledConnection<F>) -> Result<(), PoolError> {
        if conn.pool_id() != self.inner.id {
            return Err(PoolError::InvalidState(format!(
                "{} does not belong to this pool",
                conn.id()
            )));
        }
        Ok(())
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    /// Lock the bookkeeping. A panic elsewhere while holding the lock leaves
    /// the maps consistent (every mutation is a single step), so poisoning is
    /// ignored.
    fn lock_state(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn acquire_permit(&self, wait: Duration) -> Result<OwnedSemaphorePermit, PoolError> {
        let permits = Arc::clone(&self.permits);
        let acquired = {
            let _waiting = WaitGuard::enter(&self.waiting);
            tokio::time::timeout(wait, permits.acquire_owned()).await
        };

        match acquired {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error_kind = "timeout",
                    tracker = %self.config.tracker,
                    wait = ?wait,
                    "No pooled connection became available"
                );
                Err(PoolError::Timeout(wait))
            }
        }
    }

    /// Take the longest-idle connection, if any
    fn claim_idle(&self) -> Option<(ConnectionId, F::Connection, Instant)> {
        let mut state = self.lock_state();
        while let Some(id) = state.idle.pop_front() {
            if let Some(slot) = state.slots.get_mut(&id) {
                if slot.state == ConnectionState::Idle {
                    if let Some(conn) = slot.conn.take() {
                        slot.state = ConnectionState::InUse;
                        return Some((id, conn, slot.created_at));
                    }
                }
            }
        }
        None
    }

    /// Idle connections whose last activity is at least `max_idle` ago
    pub(crate) fn stale_idle(&self, max_idle: Duration) -> Vec<ConnectionId> {
        let state = self.lock_state();
        state
            .idle
            .iter()
            .copied()
            .filter(|id| {
                state
                    .slots
                    .get(id)
                    .map(|slot| slot.last_activity.elapsed() >= max_idle)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Take one specific idle connection if it is still idle and stale
    pub(crate) fn claim_stale(
        &self,
        id: ConnectionId,
        max_idle: Duration,
    ) -> Option<(F::Connection, Instant)> {
        let mut state = self.lock_state();
        let slot = state.slots.get_mut(&id)?;
        if slot.state != ConnectionState::Idle || slot.last_activity.elapsed() < max_idle {
            return None;
        }
        let conn = slot.conn.take()?;
        slot.state = ConnectionState::InUse;
        let created_at = slot.created_at;
        state.idle.retain(|idle_id| *idle_id != id);
        Some((conn, created_at))
    }

    pub(crate) fn try_permit(self: &Arc<Self>) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }

    async fn open_connection(&self) -> Result<(ConnectionId, F::Connection, Instant), PoolError> {
        let address = &self.config.tracker;
        let connect_timeout = self.config.connect_timeout;

        let connected = match tokio::time::timeout(connect_timeout, self.factory.connect(address)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::TimedOut(connect_timeout)),
        };

        let conn = match connected {
            Ok(conn) => conn,
            Err(source) => {
                self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error_kind = "connect_failure",
                    tracker = %address,
                    error = %source,
                    "Failed to open tracker connection"
                );
                return Err(PoolError::ConnectFailure {
                    address: address.clone(),
                    source,
                });
            }
        };

        let id = ConnectionId::new(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let now = Instant::now();

        let size = {
            let mut state = self.lock_state();
            if self.shutdown.is_cancelled() {
                None
            } else {
                state.slots.insert(
                    id,
                    Slot {
                        state: ConnectionState::InUse,
                        last_activity: now,
                        created_at: now,
                        conn: None,
                    },
                );
                Some(state.slots.len())
            }
        };

        match size {
            Some(size) => {
                tracing::debug!(connection_id = %id, tracker = %address, size, "Opened tracker connection");
                Ok((id, conn, now))
            }
            None => {
                self.factory.close(conn).await;
                Err(PoolError::Closed)
            }
        }
    }

    /// Mark a borrowed connection broken, close it and free its slot
    pub(crate) async fn discard(
        &self,
        id: ConnectionId,
        conn: F::Connection,
        reason: DiscardReason,
    ) -> Result<(), PoolError> {
        let untracked_after_shutdown = {
            let mut state = self.lock_state();
            match state.slots.get_mut(&id) {
                Some(slot) if slot.state == ConnectionState::InUse => {
                    slot.state = ConnectionState::Broken;
                    false
                }
                Some(slot) => {
                    return Err(PoolError::InvalidState(format!(
                        "{} is {}, expected in-use",
                        id, slot.state
                    )));
                }
                None if self.shutdown.is_cancelled() => true,
                None => {
                    return Err(PoolError::InvalidState(format!(
                        "{} is not tracked by this pool",
                        id
                    )));
                }
            }
        };

        if untracked_after_shutdown {
            self.factory.close(conn).await;
            return Ok(());
        }

        let _evict = EvictGuard { inner: self, id };
        self.count_discard(id, reason);
        self.factory.close(conn).await;
        Ok(())
    }

    /// Discard for handles dropped without checkin or drop
    pub(crate) fn abandon(self: &Arc<Self>, id: ConnectionId, conn: F::Connection) {
        self.lock_state().slots.remove(&id);
        self.count_discard(id, DiscardReason::Abandoned);
        self.close_detached(id, conn);
    }

    /// Close a connection from a context that cannot await. The close runs
    /// on a spawned task; outside a runtime the handle is just dropped.
    pub(crate) fn close_detached(self: &Arc<Self>, id: ConnectionId, conn: F::Connection) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move {
                    inner.factory.close(conn).await;
                });
            }
            Err(_) => {
                tracing::debug!(connection_id = %id, "No runtime to close connection on, dropping it");
                drop(conn);
            }
        }
    }

    fn count_discard(&self, id: ConnectionId, reason: DiscardReason) {
        match reason {
            DiscardReason::Dropped => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::info!(connection_id = %id, "Dropping connection reported broken by caller");
            }
            DiscardReason::Evicted => {
                self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                tracing::info!(connection_id = %id, "Evicting connection that failed heartbeat");
            }
            DiscardReason::Abandoned => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    connection_id = %id,
                    "Connection released without checkin or drop, discarding"
                );
            }
        }
    }
}
