//! In-memory factory and storage used by unit tests

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use fp_core::error::{ConnectionError, OperationError};
use fp_core::traits::{ConnectionFactory, StorageOps};
use fp_core::types::TrackerAddress;

/// Give detached close tasks a chance to run
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug)]
pub struct MockConnection {
    pub serial: u64,
}

#[derive(Default)]
struct FactoryState {
    next_serial: u64,
    connects: usize,
    fail_connects: bool,
    fail_after: Option<usize>,
    connect_delay: Duration,
    probes: usize,
    fail_probes: bool,
    probe_delay: Duration,
    closed: Vec<u64>,
}

#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn probes(&self) -> usize {
        self.lock().probes
    }

    pub fn closed(&self) -> Vec<u64> {
        self.lock().closed.clone()
    }

    pub fn fail_connects(&self, fail: bool) {
        self.lock().fail_connects = fail;
    }

    pub fn fail_connects_after(&self, successes: usize) {
        self.lock().fail_after = Some(successes);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    pub fn fail_probes(&self, fail: bool) {
        self.lock().fail_probes = fail;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        self.lock().probe_delay = delay;
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn connect(&self, _address: &TrackerAddress) -> Result<MockConnection, ConnectionError> {
        let delay = self.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let exhausted = state.fail_after.map_or(false, |n| state.connects >= n);
        if state.fail_connects || exhausted {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        state.connects += 1;
        state.next_serial += 1;
        Ok(MockConnection {
            serial: state.next_serial,
        })
    }

    async fn probe(&self, _conn: &mut MockConnection) -> Result<(), ConnectionError> {
        let delay = {
            let mut state = self.lock();
            state.probes += 1;
            state.probe_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.lock().fail_probes {
            return Err(ConnectionError::ProbeFailed("no answer".into()));
        }
        Ok(())
    }

    async fn close(&self, conn: MockConnection) {
        self.lock().closed.push(conn.serial);
    }
}

/// Storage double that names files after the connection that stored them
#[derive(Clone, Default)]
pub struct MockStorage {
    fail: Arc<Mutex<bool>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_ops(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn check(&self) -> Result<(), OperationError> {
        if *self.fail.lock().unwrap() {
            return Err(OperationError::Connection(ConnectionError::Closed));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageOps<MockConnection> for MockStorage {
    async fn upload(
        &self,
        conn: &mut MockConnection,
        data: Bytes,
        ext: Option<&str>,
    ) -> Result<String, OperationError> {
        self.check()?;
        let ext = ext.map(|e| format!(".{}", e)).unwrap_or_default();
        Ok(format!("group1/M00/{}-{}{}", conn.serial, data.len(), ext))
    }

    async fn delete(&self, _conn: &mut MockConnection, file_id: &str) -> Result<bool, OperationError> {
        self.check()?;
        Ok(!file_id.ends_with("missing"))
    }

    async fn download(&self, _conn: &mut MockConnection, file_id: &str) -> Result<Bytes, OperationError> {
        self.check()?;
        Ok(Bytes::from(file_id.to_string()))
    }
}
