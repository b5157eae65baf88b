//! Error types for jobwatch
//!
//! Two layers of errors exist:
//! - [`StatusError`] is produced by a single status poll and is classified so the
//!   polling session can decide whether to keep going. It never escapes a session;
//!   sessions report their end as data ([`SessionOutcome`](crate::types::SessionOutcome)).
//! - [`Error`] is the crate-wide error returned to callers by the watcher and the
//!   result materializer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for jobwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for jobwatch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api.base_url")
        key: Option<String>,
    },

    /// A session for this job is already running
    #[error("job {0} is already being watched")]
    AlreadyWatching(String),

    /// No session exists for this job
    #[error("job {0} is not being watched")]
    NotWatching(String),

    /// The job is already in a terminal state; there is nothing to poll
    #[error("job {id} already finished (state: {state})")]
    AlreadyTerminal {
        /// Job id
        id: String,
        /// Terminal state
        state: String,
    },

    /// Shutdown in progress - not accepting new sessions
    #[error("shutdown in progress: not accepting new sessions")]
    ShuttingDown,

    /// Artifacts requested before the job reached a successful terminal state
    #[error("job {id} has no results yet (state: {state})")]
    NotReady {
        /// Job id
        id: String,
        /// Current state
        state: String,
    },

    /// Artifact index out of range, or archive requested where unsupported
    #[error("artifact not found for job {id}: {reason}")]
    ArtifactNotFound {
        /// Job id
        id: String,
        /// What was missing
        reason: String,
    },

    /// Download endpoint answered with a non-success status
    #[error("download of {url} failed with HTTP {status}")]
    DownloadFailed {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The backend rejected the credential
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Target file exists and the collision action forbids touching it
    #[error("file collision at {0}")]
    FileCollision(std::path::PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL could not be parsed or joined
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error on a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::AlreadyWatching(_) => "already_watching",
            Error::NotWatching(_) => "not_watching",
            Error::AlreadyTerminal { .. } => "already_terminal",
            Error::ShuttingDown => "shutting_down",
            Error::NotReady { .. } => "not_ready",
            Error::ArtifactNotFound { .. } => "artifact_not_found",
            Error::DownloadFailed { .. } => "download_failed",
            Error::Unauthorized(_) => "unauthorized",
            Error::FileCollision(_) => "file_collision",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Url(_) => "invalid_url",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

/// How a failed status poll should be treated by its session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network trouble or an overloaded backend; try again next tick
    Transient,
    /// Credential rejected; stop the session
    Unauthorized,
    /// Response could not be interpreted; skip this tick
    Malformed,
}

/// Error from a single status poll
#[derive(Debug, Error)]
pub enum StatusError {
    /// Request never produced a response (DNS, connect, timeout)
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Backend answered 401 or 403, or no credential was available
    #[error("unauthorized (HTTP {status:?})")]
    Unauthorized {
        /// HTTP status, `None` when no credential could be obtained
        status: Option<u16>,
    },

    /// Backend answered with a non-success status other than 401/403
    #[error("unexpected HTTP {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// Body did not match the expected payload shape
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Backend reported a status string the adapter does not know
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
}

impl StatusError {
    /// Classify the error for the polling session
    pub fn class(&self) -> ErrorClass {
        match self {
            StatusError::Transport(_) => ErrorClass::Transient,
            StatusError::Unauthorized { .. } => ErrorClass::Unauthorized,
            StatusError::Http { status, .. } => match status {
                408 | 429 => ErrorClass::Transient,
                s if *s >= 500 => ErrorClass::Transient,
                _ => ErrorClass::Malformed,
            },
            StatusError::Malformed(_) | StatusError::UnknownStatus(_) => ErrorClass::Malformed,
        }
    }
}

impl From<serde_json::Error> for StatusError {
    fn from(e: serde_json::Error) -> Self {
        StatusError::Malformed(e.to_string())
    }
}
