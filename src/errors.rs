use thiserror::Error;
use crate::types::JobId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("Duplicate job: {0}")]
    DuplicateJob(JobId),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Aggregator shut down")]
    Shutdown,
}

/// Failure of a single transport call. Never escapes the aggregator:
/// it is recorded on the job as `JobState::Failed`.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("Invalid upload url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Response did not carry an upload url")]
    MissingUrl,

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Listing has no images")]
    NoImages,

    #[error("Images are still uploading")]
    UploadsPending,

    #[error("Some images failed to upload")]
    UploadsFailed,

    #[error("Listing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Error alias
pub type Result<T, E = AggregatorError> = std::result::Result<T, E>;
