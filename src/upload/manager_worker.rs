use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::config::UploaderConfig;
use super::backend::UploadBackend;
use super::errors::{Result, UploadError};
use super::types::{
    FileHandle,
    ManagerCommand,
    QueueStatus,
    RemoteRecord,
    TaskId,
    TaskStatus,
    UploadEvent,
    UploadTask,
};
use super::worker::{UploadWorker, WorkerReport, REGISTRATION_CONFIRMED};

/// Internal messages besides commands: worker reports and delayed retries.
#[derive(Debug)]
pub(crate) enum LoopMessage {
    Worker(WorkerReport),
    RetryDue(TaskId),
}

/// Terminal transitions since the last `Completed` event.
#[derive(Debug, Default, Clone, Copy)]
struct RunOutcome {
    succeeded: usize,
    failed: usize,
    cancelled: usize,
}

struct ActiveUpload {
    attempt: u64,
    cancellation_token: CancellationToken,
}

/// Owns every task record. All state changes happen on this loop, so the
/// queue, the active set and the emitted events never disagree.
pub struct UploadManagerWorker {
    backend: Arc<dyn UploadBackend>,
    config: UploaderConfig,
    tasks: HashMap<TaskId, UploadTask>,
    /// Pending tasks keyed by enqueue order
    queued_tasks: BTreeMap<u64, TaskId>,
    /// Pending tasks waiting out `retry_delay` before re-entering the queue
    delayed_tasks: HashSet<TaskId>,
    active_uploads: HashMap<TaskId, ActiveUpload>,
    running: bool,
    outcome: RunOutcome,
    next_order: u64,
    next_attempt: u64,

    event_tx: broadcast::Sender<UploadEvent>,
    loop_tx: mpsc::UnboundedSender<LoopMessage>,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
}

impl UploadManagerWorker {
    pub(crate) async fn run(
        backend: Arc<dyn UploadBackend>,
        config: UploaderConfig,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
    ) {
        let (loop_tx, mut loop_rx) = mpsc::unbounded_channel();
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            backend,
            config,
            tasks: HashMap::new(),
            queued_tasks: BTreeMap::new(),
            delayed_tasks: HashSet::new(),
            active_uploads: HashMap::new(),
            running: false,
            outcome: RunOutcome::default(),
            next_order: 0,
            next_attempt: 0,
            event_tx,
            loop_tx,
            report_tx,
        };

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command),
                    None => break,
                },
                Some(report) = report_rx.recv() => {
                    worker.handle_message(LoopMessage::Worker(report));
                }
                Some(message) = loop_rx.recv() => {
                    worker.handle_message(message);
                }
            }

            worker.process_queue();
        }

        worker.abort_active();
        debug!("upload manager loop stopped");
    }

    fn emit(&self, event: UploadEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn emit_status_change(&self, task_id: TaskId, old_status: TaskStatus, new_status: TaskStatus) {
        self.emit(UploadEvent::StatusChanged { task_id, old_status, new_status });
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Enqueue { files, destination_id, reply } => {
                let ids = self.enqueue(files, destination_id);
                let _ = reply.send(ids);
            }
            ManagerCommand::Start { reply } => {
                self.start();
                let _ = reply.send(());
            }
            ManagerCommand::Cancel { task_id, reply } => {
                let result = self.cancel(task_id);
                let _ = reply.send(result);
            }
            ManagerCommand::CancelAll { reply } => {
                self.cancel_all();
                let _ = reply.send(());
            }
            ManagerCommand::RetryFailed { reply } => {
                let count = self.retry_failed();
                let _ = reply.send(count);
            }
            ManagerCommand::QueueStatus { reply } => {
                let _ = reply.send(self.queue_status());
            }
            ManagerCommand::GetTask { task_id, reply } => {
                let _ = reply.send(self.tasks.get(&task_id).cloned());
            }
            ManagerCommand::GetAllTasks { reply } => {
                let mut tasks: Vec<_> = self.tasks.values().cloned().collect();
                tasks.sort_by_key(|task| task.order);
                let _ = reply.send(tasks);
            }
            ManagerCommand::ClearFinished { reply } => {
                let before = self.tasks.len();
                self.tasks.retain(|_, task| {
                    !matches!(task.status, TaskStatus::Success | TaskStatus::Cancelled)
                });
                let _ = reply.send(before - self.tasks.len());
            }
        }
    }

    fn enqueue(&mut self, files: Vec<FileHandle>, destination_id: String) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            let task = UploadTask::new(file, destination_id.clone(), self.next_order);
            self.next_order += 1;

            debug!(task_id = %task.id, file = %task.file.name, size = task.file.size, "task enqueued");
            self.queued_tasks.insert(task.order, task.id);
            ids.push(task.id);
            self.tasks.insert(task.id, task);
        }
        ids
    }

    fn start(&mut self) {
        if self.running {
            return;
        }
        info!(pending = self.queued_tasks.len(), "upload queue started");
        self.running = true;
    }

    fn cancel(&mut self, task_id: TaskId) -> Result<()> {
        let task = self.tasks.get_mut(&task_id).ok_or(UploadError::TaskNotFound(task_id))?;
        let old_status = task.status;

        match old_status {
            TaskStatus::Uploading => {
                if let Some(active) = self.active_uploads.remove(&task_id) {
                    active.cancellation_token.cancel();
                }
            }
            TaskStatus::Pending => {
                self.queued_tasks.remove(&task.order);
                self.delayed_tasks.remove(&task_id);
            }
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Cancelled => return Ok(()),
        }

        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.outcome.cancelled += 1;
        info!(task_id = %task_id, "task cancelled");
        self.emit_status_change(task_id, old_status, TaskStatus::Cancelled);

        Ok(())
    }

    fn cancel_all(&mut self) {
        let mut live: Vec<_> = self.tasks
            .values()
            .filter(|task| !task.status.is_terminal())
            .map(|task| (task.order, task.id))
            .collect();
        live.sort_unstable_by_key(|&(order, _)| order);

        for (_, task_id) in live {
            let _ = self.cancel(task_id);
        }

        self.tasks.clear();
        self.queued_tasks.clear();
        self.delayed_tasks.clear();
        self.active_uploads.clear();
        self.running = false;
        self.outcome = RunOutcome::default();
    }

    fn retry_failed(&mut self) -> usize {
        let mut failed: Vec<_> = self.tasks
            .values()
            .filter(|task| task.status == TaskStatus::Error)
            .map(|task| (task.order, task.id))
            .collect();
        failed.sort_unstable_by_key(|&(order, _)| order);

        for (order, task_id) in &failed {
            if let Some(task) = self.tasks.get_mut(task_id) {
                task.status = TaskStatus::Pending;
                task.progress = 0;
                task.retry_count = 0;
                task.error = None;
                task.completed_at = None;
            }
            self.queued_tasks.insert(*order, *task_id);
            self.emit_status_change(*task_id, TaskStatus::Error, TaskStatus::Pending);
            self.emit(UploadEvent::Progress { task_id: *task_id, progress: 0 });
        }

        if !failed.is_empty() {
            info!(count = failed.len(), "retrying failed tasks");
            self.start();
        }

        failed.len()
    }

    fn queue_status(&self) -> QueueStatus {
        let mut status = QueueStatus {
            total: self.tasks.len(),
            active: self.active_uploads.len(),
            ..QueueStatus::default()
        };

        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => status.pending += 1,
                TaskStatus::Uploading => status.uploading += 1,
                TaskStatus::Success => status.success += 1,
                TaskStatus::Error => status.error += 1,
                TaskStatus::Cancelled => status.cancelled += 1,
            }
        }

        status
    }

    /// Fill free slots in enqueue order, then check whether the run drained.
    fn process_queue(&mut self) {
        if !self.running {
            return;
        }

        while self.active_uploads.len() < self.config.max_concurrent {
            let Some((_, task_id)) = self.queued_tasks.pop_first() else {
                break;
            };
            self.start_upload(task_id);
        }

        if self.queued_tasks.is_empty() && self.delayed_tasks.is_empty() && self.active_uploads.is_empty() {
            self.running = false;
            self.emit_completed();
            self.outcome = RunOutcome::default();
        }
    }

    fn start_upload(&mut self, task_id: TaskId) {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };
        if task.status != TaskStatus::Pending {
            return;
        }

        let attempt = self.next_attempt;
        self.next_attempt += 1;

        // The slot is taken before the worker exists
        task.status = TaskStatus::Uploading;
        task.progress = 0;
        task.started_at = Some(Utc::now());

        let file = task.file.clone();
        let destination_id = task.destination_id.clone();
        let order = task.order;
        let retry_count = task.retry_count;

        let cancellation_token = CancellationToken::new();
        self.active_uploads.insert(task_id, ActiveUpload {
            attempt,
            cancellation_token: cancellation_token.clone(),
        });

        let worker = UploadWorker {
            task_id,
            attempt,
            backend: self.backend.clone(),
            cancellation_token,
            report_tx: self.report_tx.clone(),
            probe_dimensions: self.config.probe_dimensions,
        };

        debug!(task_id = %task_id, attempt, retry_count, "upload started");
        self.emit_status_change(task_id, TaskStatus::Pending, TaskStatus::Uploading);
        tokio::spawn(worker.run(file, destination_id, order));
    }

    fn handle_message(&mut self, message: LoopMessage) {
        match message {
            LoopMessage::Worker(WorkerReport::Progress { task_id, attempt, progress }) => {
                if !self.is_current_attempt(task_id, attempt) {
                    return;
                }
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    if progress > task.progress && progress < REGISTRATION_CONFIRMED {
                        task.progress = progress;
                        self.emit(UploadEvent::Progress { task_id, progress });
                    }
                }
            }
            LoopMessage::Worker(WorkerReport::Finished { task_id, attempt, result }) => {
                if !self.is_current_attempt(task_id, attempt) {
                    debug!(task_id = %task_id, attempt, "ignoring result of a stale attempt");
                    return;
                }
                self.active_uploads.remove(&task_id);

                match result {
                    Ok(record) => self.handle_success(task_id, record),
                    Err(err) if err.is_cancelled() => self.handle_cancelled(task_id),
                    Err(err) => self.handle_failure(task_id, err),
                }
            }
            LoopMessage::RetryDue(task_id) => {
                if !self.delayed_tasks.remove(&task_id) {
                    return;
                }
                if let Some(task) = self.tasks.get(&task_id) {
                    if task.status == TaskStatus::Pending {
                        self.queued_tasks.insert(task.order, task_id);
                    }
                }
            }
        }
    }

    fn is_current_attempt(&self, task_id: TaskId, attempt: u64) -> bool {
        self.active_uploads
            .get(&task_id)
            .is_some_and(|active| active.attempt == attempt)
    }

    fn handle_success(&mut self, task_id: TaskId, record: RemoteRecord) {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };

        task.status = TaskStatus::Success;
        task.progress = REGISTRATION_CONFIRMED;
        self.outcome.succeeded += 1;
        task.result = Some(record.clone());
        task.completed_at = Some(Utc::now());
        info!(task_id = %task_id, file = %task.file.name, record = %record.id, "upload succeeded");

        self.emit(UploadEvent::Progress { task_id, progress: REGISTRATION_CONFIRMED });
        self.emit_status_change(task_id, TaskStatus::Uploading, TaskStatus::Success);
        self.emit(UploadEvent::Succeeded { task_id, record });
    }

    fn handle_cancelled(&mut self, task_id: TaskId) {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };

        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.outcome.cancelled += 1;
        self.emit_status_change(task_id, TaskStatus::Uploading, TaskStatus::Cancelled);
    }

    fn handle_failure(&mut self, task_id: TaskId, err: UploadError) {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };

        task.retry_count += 1;
        let message = err.to_string();

        if task.retry_count < self.config.max_retries {
            warn!(
                task_id = %task_id,
                retry_count = task.retry_count,
                max_retries = self.config.max_retries,
                error = %message,
                "upload attempt failed, retrying"
            );
            task.status = TaskStatus::Pending;
            task.progress = 0;
            let order = task.order;

            self.emit_status_change(task_id, TaskStatus::Uploading, TaskStatus::Pending);
            self.emit(UploadEvent::Progress { task_id, progress: 0 });
            self.schedule_retry(task_id, order);
            return;
        }

        error!(task_id = %task_id, retry_count = task.retry_count, error = %message, "upload failed");
        task.status = TaskStatus::Error;
        task.error = Some(message.clone());
        self.outcome.failed += 1;
        task.completed_at = Some(Utc::now());

        self.emit_status_change(task_id, TaskStatus::Uploading, TaskStatus::Error);
        self.emit(UploadEvent::Failed { task_id, error: message });
    }

    fn schedule_retry(&mut self, task_id: TaskId, order: u64) {
        let delay = self.config.retry_delay();
        if delay.is_zero() {
            self.queued_tasks.insert(order, task_id);
            return;
        }

        self.delayed_tasks.insert(task_id);
        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = loop_tx.send(LoopMessage::RetryDue(task_id));
        });
    }

    fn emit_completed(&self) {
        let RunOutcome { succeeded, failed, cancelled } = self.outcome;
        info!(succeeded, failed, cancelled, "upload queue drained");
        self.emit(UploadEvent::Completed { succeeded, failed, cancelled });
    }

    fn abort_active(&mut self) {
        for (_, active) in self.active_uploads.drain() {
            active.cancellation_token.cancel();
        }
    }
}
