//! Storage operation trait

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::OperationError;

/// Upload/delete/download requests issued over one checked-out connection.
///
/// Implementations format the request, send it over `conn` and parse the
/// reply. Any error returned here causes the caller to drop the connection
/// instead of returning it to the pool.
#[async_trait]
pub trait StorageOps<C: Send>: Send + Sync {
    /// Store `data` and return the remote file id
    async fn upload(
        &self,
        conn: &mut C,
        data: Bytes,
        ext: Option<&str>,
    ) -> Result<String, OperationError>;

    /// Delete a remote file; `Ok(false)` when the backend reports it missing
    async fn delete(&self, conn: &mut C, file_id: &str) -> Result<bool, OperationError>;

    /// Fetch the full contents of a remote file
    async fn download(&self, conn: &mut C, file_id: &str) -> Result<Bytes, OperationError>;
}
