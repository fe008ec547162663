use thiserror::Error;
use super::types::TaskId;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Dimension probe error: {0}")]
    DimensionProbe(String),

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential(message.into())
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer(message.into())
    }

    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Cancellation is a control signal, not a failure: it must never be
    /// counted against the retry budget.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
