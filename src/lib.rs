//! Album upload orchestration: a bounded pool of concurrent uploads, each
//! going through credential, transfer and registration, with retries,
//! cancellation and progress events.

pub mod config;
pub mod upload;

pub use config::{ClientConfig, Config, UploaderConfig};
pub use upload::{
    FileHandle,
    HttpBackend,
    QueueStatus,
    RemoteRecord,
    Result,
    TaskId,
    TaskStatus,
    UploadBackend,
    UploadError,
    UploadEvent,
    UploadManager,
    UploadManagerHandle,
    UploadObserver,
    UploadTask,
};
