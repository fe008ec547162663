mod backend;
mod errors;
mod http;
mod manager;
mod manager_worker;
mod observer;
mod probe;
mod progress_stream;
mod types;
mod worker;

pub use backend::{ByteProgress, UploadBackend};
pub use errors::{Result, UploadError};
pub use http::HttpBackend;
pub use manager::{UploadManager, UploadManagerHandle};
pub use observer::{dispatch, spawn_observer, UploadObserver};
pub use probe::{dimensions_from_header, probe_dimensions};
pub use progress_stream::ProgressStream;
pub use types::{
    FileHandle,
    FileSource,
    QueueStatus,
    RegisterRequest,
    RemoteRecord,
    TaskId,
    TaskStatus,
    UploadEvent,
    UploadTask,
    WriteCredential,
};
