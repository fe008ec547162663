use std::sync::Arc;
use tokio::sync::{oneshot, mpsc, broadcast};
use tokio::task::JoinHandle;
use crate::config::UploaderConfig;
use super::backend::UploadBackend;
use super::manager_worker::UploadManagerWorker;
use super::types::{FileHandle, ManagerCommand, QueueStatus, TaskId, UploadEvent, UploadTask};
use super::errors::{Result, UploadError};

/// Front end of the upload queue. Every call is forwarded to the manager
/// loop, which owns the task records.
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
}

/// Upload manager handle, keeps the loop's join handle
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Stop the loop and cancel in-flight uploads. The loop only exits once
    /// every clone of the manager is gone.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.manager);
        self.worker_handle.await
            .map_err(|err| UploadError::internal_error(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    pub fn new(backend: Arc<dyn UploadBackend>, config: UploaderConfig) -> Result<UploadManagerHandle> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        let worker_handle = tokio::spawn(UploadManagerWorker::run(
            backend,
            config,
            command_rx,
            event_tx.clone(),
        ));

        let manager = Self {
            command_tx,
            event_tx,
        };

        Ok(UploadManagerHandle {
            manager,
            worker_handle,
        })
    }

    async fn request<T>(&self, command: ManagerCommand, reply_rx: oneshot::Receiver<T>) -> Result<T> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| UploadError::internal_error("Manager shut down"))?;

        reply_rx
            .await
            .map_err(|err| UploadError::internal_error(err.to_string()))
    }

    /// Queue one pending task per file. Ids come back in input order.
    pub async fn enqueue(&self, files: Vec<FileHandle>, destination_id: impl Into<String>) -> Result<Vec<TaskId>> {
        let (reply, reply_rx) = oneshot::channel();
        let command = ManagerCommand::Enqueue {
            files,
            destination_id: destination_id.into(),
            reply,
        };
        self.request(command, reply_rx).await
    }

    /// Start draining the queue. A no-op while a run is in progress.
    pub async fn start(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::Start { reply }, reply_rx).await
    }

    pub async fn cancel(&self, task_id: TaskId) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::Cancel { task_id, reply }, reply_rx).await?
    }

    /// Cancel everything, forget every task and stop the current run.
    pub async fn cancel_all(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::CancelAll { reply }, reply_rx).await
    }

    /// Put every failed task back in the queue with a fresh retry budget.
    /// Returns how many tasks were reset.
    pub async fn retry_failed(&self) -> Result<usize> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::RetryFailed { reply }, reply_rx).await
    }

    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::QueueStatus { reply }, reply_rx).await
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<UploadTask>> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::GetTask { task_id, reply }, reply_rx).await
    }

    /// All tracked tasks in enqueue order
    pub async fn get_all_tasks(&self) -> Result<Vec<UploadTask>> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::GetAllTasks { reply }, reply_rx).await
    }

    /// Forget successful and cancelled tasks. Failed tasks stay for
    /// [`retry_failed`](Self::retry_failed).
    pub async fn clear_finished(&self) -> Result<usize> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::ClearFinished { reply }, reply_rx).await
    }

    /// Subscribe to events
    ///
    /// A subscriber that falls more than `event_capacity` events behind
    /// loses the oldest ones (`RecvError::Lagged`).
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }
}
