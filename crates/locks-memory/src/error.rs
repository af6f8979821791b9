use rill_locks::LockError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
#[error("lock error")]
pub struct Error;

impl LockError for Error {}
