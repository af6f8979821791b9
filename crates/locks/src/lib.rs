//! Abstract interface for named reader/writer locks.
//!
//! A lock manager hands out read and write guards keyed by arbitrary
//! string names. Any number of readers or a single writer may hold a
//! given name at a time. Locks are represented by guard types that
//! release automatically when dropped, so every failure path of a locked
//! operation releases its lock.
//!
//! Scope caveat: an implementation only coordinates the parties it is
//! shared with. The in-memory implementation is process-wide; if the
//! backing store is shared across processes, either route every write for
//! a given name through one process or supply a distributed
//! implementation of this trait.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for `LockManager` errors.
pub trait LockError: Debug + Error + Send + Sync + 'static {}

/// A trait representing a named reader/writer lock manager with
/// asynchronous operations.
#[async_trait]
pub trait LockManager: Clone + Send + Sync + 'static {
    /// The error type for lock operations.
    type Error: LockError;

    /// The guard type for shared (read) access, released on drop.
    type ReadGuard: Send + Sync + 'static;

    /// The guard type for exclusive (write) access, released on drop.
    type WriteGuard: Send + Sync + 'static;

    /// Acquires shared access to `name`, waiting until no writer holds it.
    async fn read(&self, name: &str) -> Result<Self::ReadGuard, Self::Error>;

    /// Acquires exclusive access to `name`, waiting until no reader or
    /// writer holds it.
    async fn write(&self, name: &str) -> Result<Self::WriteGuard, Self::Error>;
}
