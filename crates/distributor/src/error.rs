//! Error types for activity distribution.

use thiserror::Error;

/// Result type for distribution operations.
pub type DistributorResult<T> = Result<T, Error>;

/// Errors that can occur while distributing an activity.
#[derive(Debug, Error)]
pub enum Error {
    /// A stream operation failed.
    #[error(transparent)]
    Stream(#[from] rill_stream::Error),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted record could not be decoded.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// A delivery task panicked; the panic is captured, not propagated.
    #[error("delivery task panicked")]
    Panicked,
}

impl Error {
    pub(crate) fn storage(err: impl std::error::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
