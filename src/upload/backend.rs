use std::sync::Arc;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use super::errors::Result;
use super::types::{FileHandle, RegisterRequest, RemoteRecord, WriteCredential};

/// Byte level progress sink handed to [`UploadBackend::transfer_bytes`].
///
/// Backends that can observe how much of the payload has been sent call
/// [`ByteProgress::report`]; the orchestrator maps it into the transfer band
/// of the task progress. Backends that cannot simply ignore it.
#[derive(Clone)]
pub struct ByteProgress {
    callback: Arc<dyn Fn(u64, u64) + Send + Sync>,
}

impl ByteProgress {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        Self { callback: Arc::new(callback) }
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, sent: u64, total: u64) {
        (self.callback)(sent, total)
    }
}

impl std::fmt::Debug for ByteProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ByteProgress")
    }
}

/// The remote side of an upload: credential issuance, byte storage and
/// metadata registration.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Obtain a write credential for one file.
    ///
    /// Fails with [`UploadError::Credential`](super::UploadError::Credential)
    /// when the destination is invalid or the caller lacks permission.
    async fn acquire_write_credential(
        &self,
        destination_id: &str,
        filename: &str,
        mime_type: &str,
        file_size: u64,
    ) -> Result<WriteCredential>;

    /// Send the payload to the credential's transfer target.
    ///
    /// Implementations should stop early once `cancel` fires. The
    /// orchestrator races this call against the same token anyway.
    async fn transfer_bytes(
        &self,
        credential: &WriteCredential,
        file: &FileHandle,
        cancel: CancellationToken,
        progress: ByteProgress,
    ) -> Result<()>;

    /// Create the metadata record for a transferred file.
    async fn register_metadata(
        &self,
        destination_id: &str,
        request: &RegisterRequest,
    ) -> Result<RemoteRecord>;
}
