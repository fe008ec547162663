use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use super::backend::{ByteProgress, UploadBackend};
use super::errors::{Result, UploadError};
use super::probe::probe_dimensions;
use super::types::{FileHandle, RegisterRequest, RemoteRecord, TaskId};

pub(crate) const CREDENTIAL_ACQUIRED: u8 = 10;
pub(crate) const TRANSFER_STARTED: u8 = 30;
pub(crate) const TRANSFER_COMPLETE: u8 = 70;
pub(crate) const REGISTRATION_SUBMITTED: u8 = 80;
pub(crate) const REGISTRATION_CONFIRMED: u8 = 100;

/// Messages a worker sends back to the manager loop.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    Progress {
        task_id: TaskId,
        attempt: u64,
        progress: u8,
    },
    Finished {
        task_id: TaskId,
        attempt: u64,
        result: Result<RemoteRecord>,
    },
}

/// Map transferred bytes into the 30..=70 band.
pub(crate) fn transfer_progress(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return TRANSFER_STARTED;
    }
    let band = (TRANSFER_COMPLETE - TRANSFER_STARTED) as u128;
    let scaled = sent.min(total) as u128 * band / total as u128;
    TRANSFER_STARTED + scaled as u8
}

/// Runs a single attempt of one task.
pub(crate) struct UploadWorker {
    pub(crate) task_id: TaskId,
    pub(crate) attempt: u64,
    pub(crate) backend: Arc<dyn UploadBackend>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) report_tx: mpsc::UnboundedSender<WorkerReport>,
    pub(crate) probe_dimensions: bool,
}

impl UploadWorker {
    pub async fn run(self, file: FileHandle, destination_id: String, order: u64) {
        let result = self.upload(&file, &destination_id, order).await;
        let _ = self.report_tx.send(WorkerReport::Finished {
            task_id: self.task_id,
            attempt: self.attempt,
            result,
        });
    }

    fn report(&self, progress: u8) {
        let _ = self.report_tx.send(WorkerReport::Progress {
            task_id: self.task_id,
            attempt: self.attempt,
            progress,
        });
    }

    /// Preemption point between phases.
    fn checkpoint(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            debug!(task_id = %self.task_id, attempt = self.attempt, "cancelled at phase boundary");
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    fn byte_progress(&self) -> ByteProgress {
        let report_tx = self.report_tx.clone();
        let task_id = self.task_id;
        let attempt = self.attempt;
        let last = Arc::new(AtomicU8::new(TRANSFER_STARTED));

        ByteProgress::new(move |sent, total| {
            let progress = transfer_progress(sent, total);
            if progress > last.fetch_max(progress, Ordering::Relaxed) {
                let _ = report_tx.send(WorkerReport::Progress { task_id, attempt, progress });
            }
        })
    }

    async fn upload(&self, file: &FileHandle, destination_id: &str, order: u64) -> Result<RemoteRecord> {
        self.checkpoint()?;
        let credential = self.backend
            .acquire_write_credential(destination_id, &file.name, &file.mime_type, file.size)
            .await?;
        debug!(task_id = %self.task_id, attempt = self.attempt, key = %credential.storage_key, "credential acquired");
        self.report(CREDENTIAL_ACQUIRED);

        self.checkpoint()?;
        self.report(TRANSFER_STARTED);
        let transfer = self.backend.transfer_bytes(
            &credential,
            file,
            self.cancellation_token.clone(),
            self.byte_progress(),
        );
        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return Err(UploadError::Cancelled),
            result = transfer => result?,
        }
        debug!(task_id = %self.task_id, attempt = self.attempt, bytes = file.size, "transfer complete");
        self.report(TRANSFER_COMPLETE);

        self.checkpoint()?;
        let dimensions = if self.probe_dimensions && file.is_image() {
            match probe_dimensions(file).await {
                Ok(dimensions) => Some(dimensions),
                Err(err) => {
                    warn!(task_id = %self.task_id, error = %err, "could not read image dimensions");
                    None
                }
            }
        } else {
            None
        };

        self.checkpoint()?;
        let request = RegisterRequest {
            filename: file.name.clone(),
            storage_key: credential.storage_key,
            file_size: file.size,
            mime_type: file.mime_type.clone(),
            width: dimensions.map(|(width, _)| width),
            height: dimensions.map(|(_, height)| height),
            order,
        };
        self.report(REGISTRATION_SUBMITTED);
        let record = self.backend.register_metadata(destination_id, &request).await?;

        self.checkpoint()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_progress_band() {
        assert_eq!(transfer_progress(0, 100), TRANSFER_STARTED);
        assert_eq!(transfer_progress(50, 100), 50);
        assert_eq!(transfer_progress(100, 100), TRANSFER_COMPLETE);
        assert_eq!(transfer_progress(500, 100), TRANSFER_COMPLETE);
        assert_eq!(transfer_progress(10, 0), TRANSFER_STARTED);
        assert_eq!(transfer_progress(u64::MAX, u64::MAX), TRANSFER_COMPLETE);
    }
}
