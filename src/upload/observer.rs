use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;
use super::types::{RemoteRecord, TaskId, TaskStatus, UploadEvent};

/// Callback surface over [`UploadEvent`]s.
#[async_trait]
pub trait UploadObserver: Send + Sync {
    async fn on_progress(&self, _task_id: TaskId, _progress: u8) {}

    async fn on_status_change(&self, _task_id: TaskId, _old_status: TaskStatus, _new_status: TaskStatus) {}

    async fn on_success(&self, _task_id: TaskId, _record: &RemoteRecord) {}

    async fn on_error(&self, _task_id: TaskId, _error: &str) {}

    /// Queue drained
    async fn on_complete(&self, _succeeded: usize, _failed: usize, _cancelled: usize) {}
}

pub async fn dispatch<O: UploadObserver + ?Sized>(observer: &O, event: &UploadEvent) {
    match event {
        UploadEvent::Progress { task_id, progress } => {
            observer.on_progress(*task_id, *progress).await
        }
        UploadEvent::StatusChanged { task_id, old_status, new_status } => {
            observer.on_status_change(*task_id, *old_status, *new_status).await
        }
        UploadEvent::Succeeded { task_id, record } => {
            observer.on_success(*task_id, record).await
        }
        UploadEvent::Failed { task_id, error } => {
            observer.on_error(*task_id, error).await
        }
        UploadEvent::Completed { succeeded, failed, cancelled } => {
            observer.on_complete(*succeeded, *failed, *cancelled).await
        }
    }
}

/// Feed every event from `receiver` into `observer` until the manager is
/// dropped.
pub fn spawn_observer<O>(mut receiver: broadcast::Receiver<UploadEvent>, observer: O) -> JoinHandle<()>
where
    O: UploadObserver + 'static,
{
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => dispatch(&observer, &event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
