//! Error types for stream operations.

use thiserror::Error;

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, Error>;

/// Errors that can occur in stream operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A stream name must be non-empty.
    #[error("stream name must not be empty")]
    EmptyName,

    /// No stream record exists under this name.
    #[error("no such stream: {0}")]
    NoSuchStream(String),

    /// The stream's segment list is empty; a stream always has at least
    /// one segment from creation onward.
    #[error("stream has no segments: {0}")]
    EmptyStream(String),

    /// The item could not be located in any segment of the stream.
    #[error("item {item} not in stream {stream}")]
    NotInStream {
        /// The item that was looked up.
        item: String,
        /// The stream that was searched.
        stream: String,
    },

    /// Range parameters are inverted. Caller bug, not retryable.
    #[error("bad parameters: start {start} > end {end}")]
    BadParameters {
        /// Requested range start.
        start: usize,
        /// Requested range end.
        end: usize,
    },

    /// A multi-record write failed and its compensating deletes also
    /// failed, leaving partial records behind. Callers must inspect or
    /// repair state before retrying from scratch.
    #[error("multi-record write partially applied on stream {stream}")]
    PartiallyApplied {
        /// The stream whose records may be partial.
        stream: String,
    },

    /// A filtered read scanned more underlying items than allowed.
    #[error("filter scanned more than {max_scan} underlying items")]
    ScanLimitExceeded {
        /// The configured scan cap.
        max_scan: usize,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Lock acquisition error.
    #[error("lock error: {0}")]
    Lock(String),

    /// Serialization error from the object wrappers.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// An iteration task failed outside the storage path.
    #[error("task error: {0}")]
    Task(String),
}

impl Error {
    pub(crate) fn storage(err: impl std::error::Error) -> Self {
        Self::Storage(err.to_string())
    }

    pub(crate) fn lock(err: impl std::error::Error) -> Self {
        Self::Lock(err.to_string())
    }
}
