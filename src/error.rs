//! Error types for the completion cache
//!
//! Provides one error enum per boundary using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Failure of the backing store. Never retried, never masked.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The store rejected or could not complete an operation
    #[error("Storage failure: {0}")]
    Storage(String),

    /// A stored payload could not be encoded or decoded
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error from a disk-backed store
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

// == Upstream Error Enum ==
/// Failure reported by (or while reaching) the completion API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The API answered with a non-success status
    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response
    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not a completion
    #[error("Upstream response could not be decoded: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Status code carried by the error, if the API answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            UpstreamError::Transport(err) => err.status().map(|s| s.as_u16()),
            UpstreamError::Decode(_) => None,
        }
    }

    /// True when the API signalled temporary capacity exhaustion (503).
    pub fn is_overloaded(&self) -> bool {
        self.status() == Some(503)
    }
}

// == Call Error Enum ==
/// Error raised on the producer path of a cached upstream call.
#[derive(Error, Debug)]
pub enum CallError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

// == Notify Error Enum ==
/// Failure to deliver an operational notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Notification rejected with status {status}: {body}")]
    Status { status: u16, body: String },
}

// == Config Error Enum ==
/// Invalid or missing startup configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

// == Result Type Alias ==
/// Convenience Result type for store and cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
