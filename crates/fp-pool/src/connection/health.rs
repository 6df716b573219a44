//! Connection health monitoring
//!
//! The heartbeat keeps idle tracker connections from being reclaimed by the
//! server and weeds out the ones that already died. It borrows each stale
//! idle connection through the same permit a checkout uses, so it never
//! sees a connection a caller holds and never pushes the pool past capacity.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use fp_core::config::PoolConfig;
use fp_core::error::ConnectionError;
use fp_core::traits::ConnectionFactory;

use super::pool::{ConnectionPool, DiscardReason, PoolInner};
use super::pooled::PooledConnection;

/// Outcome of one heartbeat pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Connections that answered the probe
    pub refreshed: usize,
    /// Connections that failed the probe and were removed
    pub evicted: usize,
    /// Stale connections left for the next pass because every permit was taken
    pub skipped: usize,
}

/// Probes idle connections on a fixed cadence
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMonitor {
    /// Heartbeat interval; also the idle age that triggers a probe
    pub interval: Duration,
    /// Heartbeat timeout (how long to wait for a probe answer)
    pub timeout: Duration,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Monitor configured from pool settings
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.heartbeat_interval, config.probe_timeout)
    }

    /// Start monitoring a pool.
    ///
    /// The task holds only a weak reference, so it ends once every
    /// [`ConnectionPool`] handle is gone, or earlier on shutdown.
    pub fn spawn<F: ConnectionFactory>(&self, pool: &ConnectionPool<F>) -> tokio::task::JoinHandle<()> {
        let monitor = *self;
        let weak = Arc::downgrade(&pool.inner);
        let cancel = pool.inner.shutdown.clone();

        tokio::spawn(async move { monitor.run(weak, cancel).await })
    }

    async fn run<F: ConnectionFactory>(self, pool: Weak<PoolInner<F>>, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Starting heartbeat monitor (interval: {:?}, probe timeout: {:?})",
            self.interval,
            self.timeout
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Heartbeat monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let Some(inner) = pool.upgrade() else {
                        tracing::debug!("Pool dropped, heartbeat monitor exiting");
                        break;
                    };
                    let report = self.beat(&ConnectionPool { inner }).await;
                    if report.evicted > 0 || report.skipped > 0 {
                        tracing::info!(
                            refreshed = report.refreshed,
                            evicted = report.evicted,
                            skipped = report.skipped,
                            "Heartbeat pass complete"
                        );
                    } else {
                        tracing::debug!(refreshed = report.refreshed, "Heartbeat pass complete");
                    }
                }
            }
        }
    }

    /// Run one pass over the pool: probe every idle connection whose last
    /// activity is at least one interval old.
    ///
    /// A failing connection is closed and removed; the pass carries on with
    /// the rest.
    pub async fn beat<F: ConnectionFactory>(&self, pool: &ConnectionPool<F>) -> HeartbeatReport {
        let inner = &pool.inner;
        let mut report = HeartbeatReport::default();

        let stale = inner.stale_idle(self.interval);
        for (index, id) in stale.iter().copied().enumerate() {
            if inner.shutdown.is_cancelled() {
                break;
            }
            let Some(permit) = inner.try_permit() else {
                report.skipped = stale.len() - index;
                break;
            };
            // Claimed by a caller (or refreshed) since the scan
            let Some((conn, created_at)) = inner.claim_stale(id, self.interval) else {
                continue;
            };
            let mut conn = PooledConnection::new(inner, id, conn, created_at, permit);

            match self.probe(inner, &mut conn).await {
                Ok(()) => {
                    tracing::trace!(connection_id = %id, "Heartbeat ok");
                    if pool.checkin(conn).is_ok() {
                        report.refreshed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "Heartbeat probe failed");
                    if let Some((raw, permit)) = conn.take_parts() {
                        if let Err(e) = inner.discard(id, raw, DiscardReason::Evicted).await {
                            tracing::warn!(connection_id = %id, error = %e, "Failed to evict connection");
                        }
                        drop(permit);
                    }
                    report.evicted += 1;
                }
            }
        }

        report
    }

    async fn probe<F: ConnectionFactory>(
        &self,
        inner: &PoolInner<F>,
        conn: &mut PooledConnection<F>,
    ) -> Result<(), ConnectionError> {
        match tokio::time::timeout(self.timeout, inner.factory.probe(&mut **conn)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::ProbeFailed(format!(
                "no answer within {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFactory;

    fn pool(capacity: usize, factory: MockFactory) -> ConnectionPool<MockFactory> {
        let config = PoolConfig::default()
            .with_capacity(capacity)
            .with_heartbeat_interval(Duration::from_secs(60));
        ConnectionPool::new(config, factory).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_connections_are_not_probed() {
        let factory = MockFactory::new();
        let pool = pool(2, factory.clone());
        pool.prefill().await.unwrap();

        let monitor = HeartbeatMonitor::from_config(pool.config());
        let report = monitor.beat(&pool).await;

        assert_eq!(report, HeartbeatReport::default());
        assert_eq!(factory.probes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connections_are_refreshed() {
        let factory = MockFactory::new();
        let pool = pool(2, factory.clone());
        pool.prefill().await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let monitor = HeartbeatMonitor::from_config(pool.config());
        let report = monitor.beat(&pool).await;
        assert_eq!(report.refreshed, 2);
        assert_eq!(factory.probes(), 2);

        // Refreshed, so nothing is stale on an immediate second pass
        let report = monitor.beat(&pool).await;
        assert_eq!(report.refreshed, 0);
        assert_eq!(pool.status().idle, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_evicts() {
        let factory = MockFactory::new();
        let pool = pool(2, factory.clone());
        pool.prefill().await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        factory.fail_probes(true);
        let report = HeartbeatMonitor::from_config(pool.config()).beat(&pool).await;

        assert_eq!(report.evicted, 2);
        assert_eq!(factory.closed().len(), 2);
        let status = pool.status();
        assert_eq!(status.size, 0);
        assert_eq!(status.evicted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out_and_evicts() {
        let factory = MockFactory::new();
        let pool = pool(1, factory.clone());
        pool.prefill().await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        factory.set_probe_delay(Duration::from_secs(3600));
        let report = HeartbeatMonitor::from_config(pool.config()).beat(&pool).await;

        assert_eq!(report.evicted, 1);
        assert_eq!(pool.status().size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_use_connections_are_never_probed() {
        let factory = MockFactory::new();
        let pool = pool(1, factory.clone());
        let held = pool.checkout().await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;

        factory.fail_probes(true);
        let report = HeartbeatMonitor::from_config(pool.config()).beat(&pool).await;

        assert_eq!(report, HeartbeatReport::default());
        assert_eq!(factory.probes(), 0);
        pool.checkin(held).unwrap();
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_stops_on_shutdown() {
        let factory = MockFactory::new();
        let pool = pool(1, factory.clone());
        pool.prefill().await.unwrap();

        let handle = pool.spawn_heartbeat();
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(factory.probes() >= 1);

        pool.shutdown().await;
        handle.await.unwrap();
    }
}
