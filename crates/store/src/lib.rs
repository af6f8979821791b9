//! Abstract interface for the key-value bank backing streams and models.
//!
//! The bank is keyed by a record kind (e.g. `"streamsegment"`) plus a key
//! within that kind. Each operation is atomic for its own key; there are no
//! cross-key transactions. Callers that need multi-record consistency layer
//! their own coordination (locks, sagas) on top.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for `Store` errors.
pub trait StoreError: Clone + Debug + Error + Send + Sync + 'static {}

/// A stored record value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// A scalar record.
    Item(Bytes),

    /// An ordered array of items.
    List(Vec<Bytes>),

    /// An integer counter.
    Counter(i64),
}

impl Value {
    /// Returns the list contents, or `None` if this is not a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Bytes]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the counter value, or `None` if this is not a `Counter`.
    #[must_use]
    pub const fn as_counter(&self) -> Option<i64> {
        match self {
            Self::Counter(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the scalar bytes, or `None` if this is not an `Item`.
    #[must_use]
    pub fn as_item(&self) -> Option<&Bytes> {
        match self {
            Self::Item(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// A trait representing the key-value bank with asynchronous operations.
///
/// List operations (`append`, `remove`, `slice`, `index_of`) and counter
/// operations (`incr`, `decr`) fail with a backend error when the record
/// exists with a different value shape.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// The error type for store operations.
    type Error: StoreError;

    /// Creates a record. Fails if the key already exists within the kind.
    async fn create(&self, kind: &str, key: &str, value: Value) -> Result<(), Self::Error>;

    /// Reads a record, returning `None` if absent.
    async fn read(&self, kind: &str, key: &str) -> Result<Option<Value>, Self::Error>;

    /// Replaces an existing record. Fails if the key does not exist.
    async fn update(&self, kind: &str, key: &str, value: Value) -> Result<(), Self::Error>;

    /// Deletes a record. Deleting an absent key is not an error.
    async fn del(&self, kind: &str, key: &str) -> Result<(), Self::Error>;

    /// Atomically pushes an item onto the end of a `List` record.
    async fn append(&self, kind: &str, key: &str, item: Bytes) -> Result<(), Self::Error>;

    /// Atomically removes the first occurrence of `item` from a `List`
    /// record, returning whether it was present.
    async fn remove(&self, kind: &str, key: &str, item: &Bytes) -> Result<bool, Self::Error>;

    /// Returns the half-open range `[start, end)` of a `List` record,
    /// clamped to its length.
    async fn slice(
        &self,
        kind: &str,
        key: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Bytes>, Self::Error>;

    /// Returns the position of the first occurrence of `item` within a
    /// `List` record, if any.
    async fn index_of(
        &self,
        kind: &str,
        key: &str,
        item: &Bytes,
    ) -> Result<Option<usize>, Self::Error>;

    /// Atomically increments a `Counter` record, returning the new value.
    async fn incr(&self, kind: &str, key: &str) -> Result<i64, Self::Error>;

    /// Atomically decrements a `Counter` record, returning the new value.
    async fn decr(&self, kind: &str, key: &str) -> Result<i64, Self::Error>;

    /// Reads several records of one kind in a single call. The result has
    /// one entry per requested key, in order, `None` for absent keys.
    async fn read_all(&self, kind: &str, keys: &[String])
    -> Result<Vec<Option<Value>>, Self::Error>;
}
