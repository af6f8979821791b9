use rill_store::StoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The key already exists.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// The key does not exist.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// The record exists with a different value shape.
    #[error("wrong record shape for key: {0}")]
    WrongShape(String),
}

impl StoreError for Error {}
