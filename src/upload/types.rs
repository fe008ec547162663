use std::path::PathBuf;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use super::errors::Result;

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a free slot
    Pending,
    /// Occupies a slot, an attempt is in flight
    Uploading,
    Success,
    /// Retries exhausted
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Where the payload bytes live. `Memory` clones are reference counted, so
/// handing a handle to a worker never copies the payload.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

#[derive(Debug, Clone)]
pub struct FileHandle {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub source: FileSource,
}

impl FileHandle {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            source: FileSource::Memory(data),
        }
    }

    /// Build a handle for a file on disk. The MIME type is sniffed from the
    /// leading bytes.
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            ).into());
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let head = read_head(&FileSource::Path(path.clone()), 64).await?;

        Ok(Self {
            name,
            size: metadata.len(),
            mime_type: sniff_mime_type(&head),
            source: FileSource::Path(path),
        })
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

pub(crate) fn sniff_mime_type(head: &[u8]) -> String {
    infer::get(head)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}

/// Read at most `limit` bytes from the start of the payload.
pub(crate) async fn read_head(source: &FileSource, limit: usize) -> Result<Bytes> {
    use tokio::io::AsyncReadExt;

    match source {
        FileSource::Memory(data) => Ok(data.slice(..limit.min(data.len()))),
        FileSource::Path(path) => {
            let file = tokio::fs::File::open(path).await?;
            let mut buf = Vec::with_capacity(limit);
            file.take(limit as u64).read_to_end(&mut buf).await?;
            Ok(Bytes::from(buf))
        }
    }
}

/// Returned by the credential phase.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteCredential {
    #[serde(alias = "uploadUrl")]
    pub transfer_target: String,
    #[serde(alias = "key")]
    pub storage_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub filename: String,
    pub storage_key: String,
    pub file_size: u64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub order: u64,
}

/// The metadata record the remote side created for an uploaded file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default)]
    pub storage_key: String,
    #[serde(default)]
    pub filename: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub file: FileHandle,
    pub destination_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub retry_count: u32,
    pub error: Option<String>,
    pub result: Option<RemoteRecord>,
    /// Enqueue sequence; the queue is drained in this order
    pub order: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub(crate) fn new(file: FileHandle, destination_id: String, order: u64) -> Self {
        Self {
            id: TaskId::new(),
            file,
            destination_id,
            status: TaskStatus::Pending,
            progress: 0,
            retry_count: 0,
            error: None,
            result: None,
            order,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Snapshot of the queue, counted by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub success: usize,
    pub error: usize,
    pub cancelled: usize,
    /// Tasks holding a slot right now
    pub active: usize,
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Progress update, 0-100
    Progress {
        task_id: TaskId,
        progress: u8,
    },

    /// Task status change
    StatusChanged {
        task_id: TaskId,
        old_status: TaskStatus,
        new_status: TaskStatus,
    },

    /// Task registered remotely
    Succeeded {
        task_id: TaskId,
        record: RemoteRecord,
    },

    /// Task failed after exhausting its retries
    Failed {
        task_id: TaskId,
        error: String,
    },

    /// Queue drained, fired once per run. Counts cover the tasks that
    /// reached a terminal status since the previous `Completed`.
    Completed {
        succeeded: usize,
        failed: usize,
        cancelled: usize,
    },
}

/// Upload manager commands
pub enum ManagerCommand {
    Enqueue {
        files: Vec<FileHandle>,
        destination_id: String,
        reply: oneshot::Sender<Vec<TaskId>>,
    },

    Start {
        reply: oneshot::Sender<()>,
    },

    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    CancelAll {
        reply: oneshot::Sender<()>,
    },

    RetryFailed {
        reply: oneshot::Sender<usize>,
    },

    QueueStatus {
        reply: oneshot::Sender<QueueStatus>,
    },

    GetTask {
        task_id: TaskId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },

    GetAllTasks {
        reply: oneshot::Sender<Vec<UploadTask>>,
    },

    /// Drop the records of successful and cancelled tasks
    ClearFinished {
        reply: oneshot::Sender<usize>,
    },
}
