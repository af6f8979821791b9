//! Segmented append-mostly ordered log over an abstract key-value bank.
//!
//! A stream stores opaque items newest-first for iteration, physically
//! held oldest-first inside bounded segments. Only the newest segment
//! (the tip) receives appends; once the tip grows past a soft limit a new
//! segment is opened probabilistically, and unconditionally past the hard
//! limit, so rollover cost is spread across many deliveries.
//!
//! Every multi-record operation runs under a named reader/writer lock on
//! the stream name, so concurrent writes to one stream are totally
//! ordered and reads never observe an in-flight write. The bank offers
//! per-key atomicity only; multi-record writes are sagas that attempt
//! compensating deletes on failure.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
pub mod filtered;

pub use error::{Error, StreamResult};
pub use filtered::FilteredStream;

use std::future::Future;

use bytes::Bytes;
use rand::Rng;
use rill_locks::LockManager;
use rill_queue::BoundedQueue;
use rill_store::{Store, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

/// Persisted record kinds owned by the stream core.
pub mod records {
    /// Stream metadata record, keyed by stream name.
    pub const STREAM: &str = "stream";

    /// Total item count, keyed by stream name.
    pub const STREAM_COUNT: &str = "streamcount";

    /// Ordered list of segment ids, oldest first, keyed by stream name.
    pub const STREAM_SEGMENTS: &str = "streamsegments";

    /// Ordered list of items, oldest first, keyed by segment id.
    pub const STREAM_SEGMENT: &str = "streamsegment";

    /// Item count of one segment, keyed by segment id.
    pub const STREAM_SEGMENT_COUNT: &str = "streamsegmentcount";
}

use records::{STREAM, STREAM_COUNT, STREAM_SEGMENT, STREAM_SEGMENT_COUNT, STREAM_SEGMENTS};

/// Default concurrency for [`Stream::each`].
pub const DEFAULT_EACH_CONCURRENCY: usize = 16;

/// Segment rollover configuration.
#[derive(Clone, Copy, Debug)]
pub struct StreamConfig {
    /// Tip size at which rollover becomes probabilistically possible.
    pub soft_limit: usize,

    /// Tip size at which rollover is forced; no segment grows past this.
    pub hard_limit: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            soft_limit: 1000,
            hard_limit: 2000,
        }
    }
}

/// A segmented append-mostly ordered log identified by a unique name.
#[derive(Clone, Debug)]
pub struct Stream<S, L>
where
    S: Store,
    L: LockManager,
{
    name: String,
    store: S,
    locks: L,
    config: StreamConfig,
}

/// Compensating action recorded for one applied sub-write.
enum Undo {
    Delete(&'static str, String),
    RemoveItem(&'static str, String, Bytes),
    Decr(&'static str, String),
}

/// Best-effort transaction over several bank records: each applied
/// sub-write records its compensation, and the first failure rolls back
/// whatever already succeeded. A failed rollback surfaces the distinct
/// partially-applied error kind.
struct Saga<'a, S>
where
    S: Store,
{
    store: &'a S,
    stream: &'a str,
    applied: Vec<Undo>,
}

impl<'a, S> Saga<'a, S>
where
    S: Store,
{
    const fn new(store: &'a S, stream: &'a str) -> Self {
        Self {
            store,
            stream,
            applied: Vec::new(),
        }
    }

    async fn create(&mut self, kind: &'static str, key: &str, value: Value) -> StreamResult<()> {
        match self.store.create(kind, key, value).await {
            Ok(()) => {
                self.applied.push(Undo::Delete(kind, key.to_string()));
                Ok(())
            }
            Err(err) => Err(self.unwind(Error::storage(err)).await),
        }
    }

    async fn append(&mut self, kind: &'static str, key: &str, item: Bytes) -> StreamResult<()> {
        match self.store.append(kind, key, item.clone()).await {
            Ok(()) => {
                self.applied.push(Undo::RemoveItem(kind, key.to_string(), item));
                Ok(())
            }
            Err(err) => Err(self.unwind(Error::storage(err)).await),
        }
    }

    async fn incr(&mut self, kind: &'static str, key: &str) -> StreamResult<()> {
        match self.store.incr(kind, key).await {
            Ok(_) => {
                self.applied.push(Undo::Decr(kind, key.to_string()));
                Ok(())
            }
            Err(err) => Err(self.unwind(Error::storage(err)).await),
        }
    }

    async fn unwind(&mut self, original: Error) -> Error {
        while let Some(undo) = self.applied.pop() {
            let compensated = match undo {
                Undo::Delete(kind, key) => self.store.del(kind, &key).await.is_ok(),
                Undo::RemoveItem(kind, key, item) => {
                    self.store.remove(kind, &key, &item).await.is_ok()
                }
                Undo::Decr(kind, key) => self.store.decr(kind, &key).await.is_ok(),
            };
            if !compensated {
                return Error::PartiallyApplied {
                    stream: self.stream.to_string(),
                };
            }
        }
        original
    }

    fn commit(mut self) {
        self.applied.clear();
    }
}

impl<S, L> Stream<S, L>
where
    S: Store,
    L: LockManager,
{
    /// Creates a new, empty stream.
    ///
    /// Fails with [`Error::EmptyName`] on an empty name. The five backing
    /// records are created as a saga under the write lock; if one
    /// sub-create fails the others are compensated, and a failed
    /// compensation surfaces [`Error::PartiallyApplied`]. Create is not
    /// idempotent; callers must not retry blindly on that error.
    pub async fn create(
        store: S,
        locks: L,
        config: StreamConfig,
        name: impl Into<String>,
    ) -> StreamResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        let stream = Self {
            name,
            store,
            locks,
            config,
        };

        let _guard = stream
            .locks
            .write(&stream.name)
            .await
            .map_err(Error::lock)?;

        let segment_id = stream.fresh_segment_id();
        let mut saga = Saga::new(&stream.store, &stream.name);
        saga.create(STREAM, &stream.name, Value::Item(Bytes::from(stream.name.clone())))
            .await?;
        saga.create(STREAM_COUNT, &stream.name, Value::Counter(0))
            .await?;
        saga.create(STREAM_SEGMENT, &segment_id, Value::List(Vec::new()))
            .await?;
        saga.create(STREAM_SEGMENT_COUNT, &segment_id, Value::Counter(0))
            .await?;
        saga.create(
            STREAM_SEGMENTS,
            &stream.name,
            Value::List(vec![Bytes::from(segment_id.clone())]),
        )
        .await?;
        saga.commit();

        drop(_guard);
        Ok(stream)
    }

    /// Attaches to an existing stream, failing with
    /// [`Error::NoSuchStream`] if it was never created.
    pub async fn open(
        store: S,
        locks: L,
        config: StreamConfig,
        name: impl Into<String>,
    ) -> StreamResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        let existing = store.read(STREAM, &name).await.map_err(Error::storage)?;
        if existing.is_none() {
            return Err(Error::NoSuchStream(name));
        }

        Ok(Self {
            name,
            store,
            locks,
            config,
        })
    }

    /// The stream's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an item to the tip segment, rolling over first when the
    /// tip is full. The append and the two counter increments run as one
    /// saga; a failure partway through compensates whatever already
    /// applied, so the item and the counters stay consistent.
    pub async fn deliver(&self, item: Bytes) -> StreamResult<()> {
        let _guard = self.locks.write(&self.name).await.map_err(Error::lock)?;

        let segments = self.segment_ids().await?;
        let tip = segments
            .last()
            .ok_or_else(|| Error::EmptyStream(self.name.clone()))?;

        let tip_count = self.segment_count(tip).await?;
        let target = if self.should_roll_over(tip_count) {
            debug!(stream = %self.name, tip_count, "rolling over to a new segment");
            self.roll_over().await?
        } else {
            tip.clone()
        };

        let mut saga = Saga::new(&self.store, &self.name);
        saga.append(STREAM_SEGMENT, &target, item).await?;
        saga.incr(STREAM_SEGMENT_COUNT, &target).await?;
        saga.incr(STREAM_COUNT, &self.name).await?;
        saga.commit();

        Ok(())
    }

    /// Removes the first-found occurrence of `item`, scanning segments
    /// tip to oldest. O(total items) worst case; empty segments are not
    /// compacted.
    pub async fn remove(&self, item: &Bytes) -> StreamResult<()> {
        let _guard = self.locks.write(&self.name).await.map_err(Error::lock)?;

        let segments = self.segment_ids().await?;
        for segment in segments.iter().rev() {
            let found = self
                .store
                .remove(STREAM_SEGMENT, segment, item)
                .await
                .map_err(Error::storage)?;
            if found {
                tokio::try_join!(
                    async {
                        self.store
                            .decr(STREAM_SEGMENT_COUNT, segment)
                            .await
                            .map_err(Error::storage)
                            .map(|_| ())
                    },
                    async {
                        self.store
                            .decr(STREAM_COUNT, &self.name)
                            .await
                            .map_err(Error::storage)
                            .map(|_| ())
                    },
                )?;
                return Ok(());
            }
        }

        Err(self.not_in_stream(item))
    }

    /// Returns the half-open range `[start, end)` of items, newest first.
    /// Returns fewer than `end - start` items when the stream is shorter.
    pub async fn get_items(&self, start: usize, end: usize) -> StreamResult<Vec<Bytes>> {
        if start > end {
            return Err(Error::BadParameters { start, end });
        }

        let _guard = self.locks.read(&self.name).await.map_err(Error::lock)?;
        self.get_items_lockless(start, end).await
    }

    /// Returns up to `count` items newer than `item`, newest first.
    ///
    /// Non-atomic: the position lookup and the page fetch take separate
    /// read locks, so a concurrent deliver or remove in between can shift
    /// positions. Accepted weak-consistency trade-off.
    pub async fn get_items_greater_than(
        &self,
        item: &Bytes,
        count: usize,
    ) -> StreamResult<Vec<Bytes>> {
        let rank = self.index_of(item).await?;
        self.get_items(rank.saturating_sub(count), rank).await
    }

    /// Returns up to `count` items older than `item`, newest first.
    /// Non-atomic in the same way as [`Stream::get_items_greater_than`].
    pub async fn get_items_less_than(
        &self,
        item: &Bytes,
        count: usize,
    ) -> StreamResult<Vec<Bytes>> {
        let rank = self.index_of(item).await?;
        self.get_items(rank + 1, rank + 1 + count).await
    }

    /// Returns the newest-first rank of `item`, failing with
    /// [`Error::NotInStream`] when absent.
    pub async fn index_of(&self, item: &Bytes) -> StreamResult<usize> {
        let _guard = self.locks.read(&self.name).await.map_err(Error::lock)?;

        let segments = self.segment_ids().await?;
        let mut consumed = 0usize;
        for segment in segments.iter().rev() {
            let segment_count = self.segment_count(segment).await?;
            let local = self
                .store
                .index_of(STREAM_SEGMENT, segment, item)
                .await
                .map_err(Error::storage)?;
            if let Some(local) = local {
                return Ok(consumed + segment_count.saturating_sub(local + 1));
            }
            consumed += segment_count;
        }

        Err(self.not_in_stream(item))
    }

    /// Total number of items currently in the stream.
    pub async fn count(&self) -> StreamResult<usize> {
        let _guard = self.locks.read(&self.name).await.map_err(Error::lock)?;
        self.counter(STREAM_COUNT, &self.name).await
    }

    /// Feeds every item through `f` with at most `concurrency` handler
    /// calls in flight. No ordering guarantee across items. The first
    /// handler error wins; a panicking handler is captured and reported,
    /// never crashing the walk.
    pub async fn each<F, Fut>(&self, concurrency: usize, f: F) -> StreamResult<()>
    where
        F: Fn(Bytes) -> Fut,
        Fut: Future<Output = StreamResult<()>> + Send + 'static,
    {
        let items = {
            let _guard = self.locks.read(&self.name).await.map_err(Error::lock)?;
            let segments = self.segment_ids().await?;
            let contents = self
                .store
                .read_all(STREAM_SEGMENT, &segments)
                .await
                .map_err(Error::storage)?;
            let mut items = Vec::new();
            for (segment, value) in segments.iter().zip(contents) {
                match value {
                    Some(Value::List(chunk)) => items.extend(chunk),
                    _ => {
                        return Err(Error::Storage(format!(
                            "segment {segment} has the wrong record shape"
                        )));
                    }
                }
            }
            items
        };

        let queue: BoundedQueue<Error> = BoundedQueue::new(concurrency.max(1));
        for item in items {
            queue.push(f(item)).await;
        }
        queue.join().await.map_err(|err| match err {
            rill_queue::Error::Task(task_err) => task_err,
            rill_queue::Error::Panicked => Error::Task("item handler panicked".to_string()),
        })
    }

    /// Deletes the stream and every record it owns: all segments and
    /// their counters, then the stream-level records.
    pub async fn delete(self) -> StreamResult<()> {
        let _guard = self.locks.write(&self.name).await.map_err(Error::lock)?;

        let segments = self.segment_ids().await?;
        for segment in &segments {
            self.store
                .del(STREAM_SEGMENT, segment)
                .await
                .map_err(Error::storage)?;
            self.store
                .del(STREAM_SEGMENT_COUNT, segment)
                .await
                .map_err(Error::storage)?;
        }
        self.store
            .del(STREAM_SEGMENTS, &self.name)
            .await
            .map_err(Error::storage)?;
        self.store
            .del(STREAM_COUNT, &self.name)
            .await
            .map_err(Error::storage)?;
        self.store
            .del(STREAM, &self.name)
            .await
            .map_err(Error::storage)?;

        Ok(())
    }

    // Object wrappers: serde_json around the byte primitives, no new
    // semantics.

    /// Appends a JSON-serialized object.
    pub async fn deliver_object<T>(&self, object: &T) -> StreamResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.deliver(to_bytes(object)?).await
    }

    /// Removes a JSON-serialized object.
    pub async fn remove_object<T>(&self, object: &T) -> StreamResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.remove(&to_bytes(object)?).await
    }

    /// Returns `[start, end)` deserialized, newest first.
    pub async fn get_objects<T>(&self, start: usize, end: usize) -> StreamResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        from_bytes_all(self.get_items(start, end).await?)
    }

    /// Returns up to `count` objects newer than `object`, newest first.
    pub async fn get_objects_greater_than<T>(&self, object: &T, count: usize) -> StreamResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        from_bytes_all(self.get_items_greater_than(&to_bytes(object)?, count).await?)
    }

    /// Returns up to `count` objects older than `object`, newest first.
    pub async fn get_objects_less_than<T>(&self, object: &T, count: usize) -> StreamResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        from_bytes_all(self.get_items_less_than(&to_bytes(object)?, count).await?)
    }

    /// Whether the JSON serialization of `object` is present.
    pub async fn has_object<T>(&self, object: &T) -> StreamResult<bool>
    where
        T: Serialize + ?Sized,
    {
        match self.index_of(&to_bytes(object)?).await {
            Ok(_) => Ok(true),
            Err(Error::NotInStream { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    // Internals. Lockless helpers assume the caller holds the
    // appropriate guard.

    pub(crate) async fn get_items_lockless(
        &self,
        start: usize,
        end: usize,
    ) -> StreamResult<Vec<Bytes>> {
        if start == end {
            return Ok(Vec::new());
        }

        let segments = self.segment_ids().await?;
        let mut consumed = 0usize;
        let mut result = Vec::with_capacity(end - start);

        for segment in segments.iter().rev() {
            let segment_count = self.segment_count(segment).await?;
            let lo = start.max(consumed);
            let hi = end.min(consumed + segment_count);
            if lo < hi {
                // Newest-first ranks [lo, hi) map onto the segment's
                // oldest-first indices, reversed.
                let local_start = segment_count - (hi - consumed);
                let local_end = segment_count - (lo - consumed);
                let mut chunk = self
                    .store
                    .slice(STREAM_SEGMENT, segment, local_start, local_end)
                    .await
                    .map_err(Error::storage)?;
                chunk.reverse();
                result.extend(chunk);
            }
            consumed += segment_count;
            if consumed >= end {
                break;
            }
        }

        Ok(result)
    }

    fn fresh_segment_id(&self) -> String {
        format!("{}:segment:{}", self.name, Uuid::new_v4())
    }

    fn should_roll_over(&self, tip_count: usize) -> bool {
        let StreamConfig {
            soft_limit,
            hard_limit,
        } = self.config;
        if tip_count >= hard_limit {
            true
        } else if tip_count > soft_limit {
            // Spread rollover cost across deliveries instead of bursting
            // exactly at the limit.
            let window = hard_limit - soft_limit + 1;
            rand::thread_rng().gen_range(0..window) == 0
        } else {
            false
        }
    }

    /// Opens a fresh tip segment. The stream's write lock is already
    /// held, so the segment records and the segment-list append share one
    /// saga without re-acquiring.
    async fn roll_over(&self) -> StreamResult<String> {
        let segment_id = self.fresh_segment_id();

        let mut saga = Saga::new(&self.store, &self.name);
        saga.create(STREAM_SEGMENT, &segment_id, Value::List(Vec::new()))
            .await?;
        saga.create(STREAM_SEGMENT_COUNT, &segment_id, Value::Counter(0))
            .await?;
        saga.append(STREAM_SEGMENTS, &self.name, Bytes::from(segment_id.clone()))
            .await?;
        saga.commit();

        Ok(segment_id)
    }

    async fn segment_ids(&self) -> StreamResult<Vec<String>> {
        let value = self
            .store
            .read(STREAM_SEGMENTS, &self.name)
            .await
            .map_err(Error::storage)?;
        match value {
            Some(Value::List(ids)) => Ok(ids
                .iter()
                .map(|id| String::from_utf8_lossy(id).into_owned())
                .collect()),
            Some(_) => Err(Error::Storage(format!(
                "segment list for {} has the wrong record shape",
                self.name
            ))),
            None => Err(Error::NoSuchStream(self.name.clone())),
        }
    }

    async fn segment_count(&self, segment_id: &str) -> StreamResult<usize> {
        self.counter(STREAM_SEGMENT_COUNT, segment_id).await
    }

    async fn counter(&self, kind: &'static str, key: &str) -> StreamResult<usize> {
        let value = self.store.read(kind, key).await.map_err(Error::storage)?;
        match value {
            Some(Value::Counter(n)) => usize::try_from(n).map_err(|_| {
                Error::Storage(format!("counter {kind}:{key} is negative ({n})"))
            }),
            Some(_) => Err(Error::Storage(format!(
                "counter {kind}:{key} has the wrong record shape"
            ))),
            None => Err(Error::NoSuchStream(self.name.clone())),
        }
    }

    fn not_in_stream(&self, item: &Bytes) -> Error {
        Error::NotInStream {
            item: String::from_utf8_lossy(item).into_owned(),
            stream: self.name.clone(),
        }
    }
}

fn to_bytes<T>(object: &T) -> StreamResult<Bytes>
where
    T: Serialize + ?Sized,
{
    Ok(Bytes::from(serde_json::to_vec(object)?))
}

fn from_bytes_all<T>(items: Vec<Bytes>) -> StreamResult<Vec<T>>
where
    T: DeserializeOwned,
{
    items
        .into_iter()
        .map(|item| serde_json::from_slice(&item).map_err(Error::from))
        .collect()
}
