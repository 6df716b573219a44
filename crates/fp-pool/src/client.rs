//! Storage client
//!
//! Every operation borrows exactly one pooled connection. How the borrow
//! ends depends on where a failure happened:
//!
//! - checkout failed (timeout, tracker unreachable, pool closed): nothing was
//!   borrowed, nothing is dropped, the error is returned as is;
//! - the operation itself failed: the connection may be mid-response or
//!   desynchronised, so it is dropped rather than returned.
//!
//! A checkout timeout signals contention and never drops a connection.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use fp_core::config::PoolConfig;
use fp_core::error::{ClientError, OperationError};
use fp_core::traits::{ConnectionFactory, StorageOps};
use fp_core::types::TrackerAddress;

use crate::connection::{ConnectionPool, PooledConnection};

/// Upload/download/delete front end over a tracker connection pool
pub struct StorageClient<F: ConnectionFactory, S> {
    pool: ConnectionPool<F>,
    ops: S,
    checkout_timeout: Duration,
    heartbeat: Option<JoinHandle<()>>,
}

impl<F, S> StorageClient<F, S>
where
    F: ConnectionFactory,
    S: StorageOps<F::Connection>,
{
    /// Build a pool from `config`, open its connections if `prefill` is set,
    /// and start the heartbeat monitor.
    pub async fn connect(config: PoolConfig, factory: F, ops: S) -> Result<Self, ClientError> {
        let pool = ConnectionPool::new(config, factory)?;
        if pool.config().prefill {
            pool.prefill().await?;
        }
        let heartbeat = pool.spawn_heartbeat();

        let mut client = Self::with_pool(pool, ops);
        client.heartbeat = Some(heartbeat);
        Ok(client)
    }

    /// Wrap an existing pool. No heartbeat is started.
    pub fn with_pool(pool: ConnectionPool<F>, ops: S) -> Self {
        let checkout_timeout = pool.config().checkout_timeout;
        Self {
            pool,
            ops,
            checkout_timeout,
            heartbeat: None,
        }
    }

    /// Tracker address
    pub fn tracker(&self) -> &TrackerAddress {
        self.pool.tracker()
    }

    /// Pool capacity
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Underlying pool
    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }

    /// Wait budget for obtaining a connection
    pub fn checkout_timeout(&self) -> Duration {
        self.checkout_timeout
    }

    /// Change the wait budget for obtaining a connection
    pub fn set_checkout_timeout(&mut self, timeout: Duration) {
        self.checkout_timeout = timeout;
    }

    /// Upload a local file, taking the extension from its name
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<String, ClientError> {
        let path = path.as_ref();
        let ext = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(file_ext_name);
        self.upload_file_with_ext(path, ext).await
    }

    /// Upload a local file with an explicit extension
    pub async fn upload_file_with_ext(
        &self,
        path: impl AsRef<Path>,
        ext: Option<&str>,
    ) -> Result<String, ClientError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| ClientError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        self.upload_bytes(data, ext).await
    }

    /// Upload an in-memory buffer and return the remote file id
    pub async fn upload_bytes(
        &self,
        data: impl Into<Bytes>,
        ext: Option<&str>,
    ) -> Result<String, ClientError> {
        let data = data.into();
        let mut conn = self.checkout("upload").await?;
        let result = self.ops.upload(&mut *conn, data, ext).await;
        self.finish("upload", conn, result).await
    }

    /// Delete a remote file. Returns `false` if the backend did not delete it.
    pub async fn delete_file(&self, file_id: &str) -> Result<bool, ClientError> {
        let mut conn = self.checkout("delete").await?;
        let result = self.ops.delete(&mut *conn, file_id).await;
        self.finish("delete", conn, result).await
    }

    /// Download a remote file in full
    pub async fn download_file(&self, file_id: &str) -> Result<Bytes, ClientError> {
        let mut conn = self.checkout("download").await?;
        let result = self.ops.download(&mut *conn, file_id).await;
        self.finish("download", conn, result).await
    }

    /// Shut the pool down and wait for the heartbeat task to exit
    pub async fn shutdown(mut self) {
        self.pool.shutdown().await;
        if let Some(handle) = self.heartbeat.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Heartbeat task ended abnormally");
            }
        }
    }

    async fn checkout(&self, operation: &'static str) -> Result<PooledConnection<F>, ClientError> {
        self.pool
            .checkout_timeout(self.checkout_timeout)
            .await
            .map_err(|e| {
                tracing::error!(operation, error_kind = e.kind(), error = %e, "Could not obtain tracker connection");
                ClientError::Pool(e)
            })
    }

    async fn finish<T>(
        &self,
        operation: &'static str,
        conn: PooledConnection<F>,
        result: Result<T, OperationError>,
    ) -> Result<T, ClientError> {
        match result {
            Ok(value) => {
                self.pool.checkin(conn)?;
                Ok(value)
            }
            Err(e) => {
                let id = conn.id();
                tracing::error!(operation, connection_id = %id, error = %e, "Storage operation failed, dropping connection");
                if let Err(drop_err) = self.pool.drop_connection(conn).await {
                    tracing::warn!(connection_id = %id, error = %drop_err, "Failed to drop connection");
                }
                Err(ClientError::Operation(e))
            }
        }
    }
}

impl<F: ConnectionFactory, S> Drop for StorageClient<F, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

/// Extension after the last `.` of a file name, if any.
///
/// A name ending in `.` yields `None` rather than an empty extension, so
/// `"trailing."` uploads exactly like `"trailing"`.
pub fn file_ext_name(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFactory, MockStorage};
    use fp_core::error::PoolError;

    async fn client(capacity: usize) -> (StorageClient<MockFactory, MockStorage>, MockFactory, MockStorage) {
        let factory = MockFactory::new();
        let storage = MockStorage::new();
        let config = PoolConfig::default().with_capacity(capacity);
        let client = StorageClient::connect(config, factory.clone(), storage.clone())
            .await
            .unwrap();
        (client, factory, storage)
    }

    #[test]
    fn test_file_ext_name() {
        assert_eq!(file_ext_name("photo.jpg"), Some("jpg"));
        assert_eq!(file_ext_name("archive.tar.gz"), Some("gz"));
        assert_eq!(file_ext_name(".bashrc"), Some("bashrc"));
        assert_eq!(file_ext_name("README"), None);
        assert_eq!(file_ext_name("trailing."), None);
    }

    #[tokio::test]
    async fn test_connect_prefills() {
        let (client, factory, _) = client(2).await;
        assert_eq!(factory.connects(), 2);
        assert_eq!(client.pool().status().idle, 2);
        assert_eq!(client.checkout_timeout(), Duration::from_secs(5));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_successful_operations_recycle_the_connection() {
        let (client, factory, _) = client(1).await;

        let id = client.upload_bytes(&b"hello"[..], Some("txt")).await.unwrap();
        assert_eq!(id, "group1/M00/1-5.txt");
        assert!(client.delete_file(&id).await.unwrap());
        assert!(!client.delete_file("group1/M00/missing").await.unwrap());
        assert_eq!(client.download_file("abc").await.unwrap().as_ref(), b"abc");

        assert_eq!(factory.connects(), 1);
        assert_eq!(client.pool().status().idle, 1);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_operation_failure_drops_connection() {
        let (client, factory, storage) = client(1).await;

        storage.fail_ops(true);
        let err = client.download_file("abc").await.unwrap_err();
        assert!(matches!(err, ClientError::Operation(_)));
        assert_eq!(factory.closed(), vec![1]);
        assert_eq!(client.pool().status().dropped, 1);

        // The next call opens a replacement
        storage.fail_ops(false);
        let id = client.upload_bytes(Bytes::from_static(b"x"), None).await.unwrap();
        assert_eq!(id, "group1/M00/2-1");
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_timeout_drops_nothing() {
        let (mut client, factory, _) = client(1).await;
        client.set_checkout_timeout(Duration::from_millis(200));

        let held = client.pool().checkout().await.unwrap();
        let err = client.delete_file("group1/M00/a").await.unwrap_err();
        assert!(matches!(err, ClientError::Pool(PoolError::Timeout(_))));

        assert!(factory.closed().is_empty());
        let status = client.pool().status();
        assert_eq!(status.dropped, 0);
        assert_eq!(status.timeouts, 1);

        client.pool().checkin(held).unwrap();
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_upload_file_reads_from_disk() {
        let (client, _, _) = client(1).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.png");
        tokio::fs::write(&path, b"\x89PNG....").await.unwrap();

        let id = client.upload_file(&path).await.unwrap();
        assert_eq!(id, "group1/M00/1-8.png");

        let err = client.upload_file(dir.path().join("absent.png")).await.unwrap_err();
        assert!(matches!(err, ClientError::ReadFile { .. }));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_trailing_dot_uploads_without_extension() {
        let (client, _, _) = client(1).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let id = client.upload_file(&path).await.unwrap();
        assert_eq!(id, "group1/M00/1-3");
        client.shutdown().await;
    }
}
