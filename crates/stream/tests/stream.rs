//! Integration tests for segmented stream storage, run against the
//! in-memory bank and lock registry.

use std::collections::HashSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use rill_locks_memory::MemoryLockManager;
use rill_store::{Store, StoreError, Value};
use rill_store_memory::MemoryStore;
use rill_stream::{records, DEFAULT_EACH_CONCURRENCY, Error, Stream, StreamConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

fn item(i: usize) -> Bytes {
    Bytes::from(format!("item-{i}"))
}

async fn fresh_stream(name: &str) -> (Stream<MemoryStore, MemoryLockManager>, MemoryStore) {
    let store = MemoryStore::new();
    let stream = Stream::create(
        store.clone(),
        MemoryLockManager::new(),
        StreamConfig::default(),
        name,
    )
    .await
    .unwrap();
    (stream, store)
}

async fn segment_ids(store: &MemoryStore, name: &str) -> Vec<String> {
    match store.read(records::STREAM_SEGMENTS, name).await.unwrap() {
        Some(Value::List(ids)) => ids
            .iter()
            .map(|id| String::from_utf8(id.to_vec()).unwrap())
            .collect(),
        other => panic!("unexpected segment list: {other:?}"),
    }
}

async fn segment_count(store: &MemoryStore, segment: &str) -> i64 {
    match store
        .read(records::STREAM_SEGMENT_COUNT, segment)
        .await
        .unwrap()
    {
        Some(Value::Counter(n)) => n,
        other => panic!("unexpected segment count: {other:?}"),
    }
}

#[derive(Clone, Debug, thiserror::Error)]
enum FlakyError {
    #[error(transparent)]
    Inner(#[from] rill_store_memory::Error),

    #[error("injected {0} failure")]
    Injected(&'static str),
}

impl StoreError for FlakyError {}

/// Store wrapper that fails selected (operation, kind) pairs, for
/// exercising the compensation path of multi-record writes.
#[derive(Clone, Debug)]
struct FlakyStore {
    inner: MemoryStore,
    denied: Arc<std::sync::Mutex<HashSet<(&'static str, String)>>>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            denied: Arc::new(std::sync::Mutex::new(HashSet::new())),
        }
    }

    fn deny(&self, op: &'static str, kind: &str) {
        self.denied.lock().unwrap().insert((op, kind.to_string()));
    }

    fn check(&self, op: &'static str, kind: &str) -> Result<(), FlakyError> {
        if self.denied.lock().unwrap().contains(&(op, kind.to_string())) {
            return Err(FlakyError::Injected(op));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    type Error = FlakyError;

    async fn create(&self, kind: &str, key: &str, value: Value) -> Result<(), Self::Error> {
        self.check("create", kind)?;
        Ok(self.inner.create(kind, key, value).await?)
    }

    async fn read(&self, kind: &str, key: &str) -> Result<Option<Value>, Self::Error> {
        Ok(self.inner.read(kind, key).await?)
    }

    async fn update(&self, kind: &str, key: &str, value: Value) -> Result<(), Self::Error> {
        self.check("update", kind)?;
        Ok(self.inner.update(kind, key, value).await?)
    }

    async fn del(&self, kind: &str, key: &str) -> Result<(), Self::Error> {
        self.check("del", kind)?;
        Ok(self.inner.del(kind, key).await?)
    }

    async fn append(&self, kind: &str, key: &str, item: Bytes) -> Result<(), Self::Error> {
        self.check("append", kind)?;
        Ok(self.inner.append(kind, key, item).await?)
    }

    async fn remove(&self, kind: &str, key: &str, item: &Bytes) -> Result<bool, Self::Error> {
        self.check("remove", kind)?;
        Ok(self.inner.remove(kind, key, item).await?)
    }

    async fn slice(
        &self,
        kind: &str,
        key: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Bytes>, Self::Error> {
        Ok(self.inner.slice(kind, key, start, end).await?)
    }

    async fn index_of(
        &self,
        kind: &str,
        key: &str,
        item: &Bytes,
    ) -> Result<Option<usize>, Self::Error> {
        Ok(self.inner.index_of(kind, key, item).await?)
    }

    async fn incr(&self, kind: &str, key: &str) -> Result<i64, Self::Error> {
        self.check("incr", kind)?;
        Ok(self.inner.incr(kind, key).await?)
    }

    async fn decr(&self, kind: &str, key: &str) -> Result<i64, Self::Error> {
        self.check("decr", kind)?;
        Ok(self.inner.decr(kind, key).await?)
    }

    async fn read_all(
        &self,
        kind: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Value>>, Self::Error> {
        Ok(self.inner.read_all(kind, keys).await?)
    }
}

#[tokio::test]
async fn create_rejects_empty_name() {
    let result = Stream::create(
        MemoryStore::new(),
        MemoryLockManager::new(),
        StreamConfig::default(),
        "",
    )
    .await;
    assert_matches!(result, Err(Error::EmptyName));
}

#[tokio::test]
async fn open_requires_existing_stream() {
    let store = MemoryStore::new();
    let locks = MemoryLockManager::new();

    let result = Stream::open(
        store.clone(),
        locks.clone(),
        StreamConfig::default(),
        "inbox:alice",
    )
    .await;
    assert_matches!(result, Err(Error::NoSuchStream(name)) if name == "inbox:alice");

    Stream::create(store.clone(), locks.clone(), StreamConfig::default(), "inbox:alice")
        .await
        .unwrap();
    let opened = Stream::open(store, locks, StreamConfig::default(), "inbox:alice")
        .await
        .unwrap();
    assert_eq!(opened.name(), "inbox:alice");
}

#[tokio::test]
async fn append_read_round_trip_is_reverse_chronological() {
    let (stream, _) = fresh_stream("outbox:alice").await;

    for i in 0..50 {
        stream.deliver(item(i)).await.unwrap();
    }

    let items = stream.get_items(0, 50).await.unwrap();
    let expected: Vec<Bytes> = (0..50).rev().map(item).collect();
    assert_eq!(items, expected);
}

#[tokio::test]
async fn count_matches_present_items_and_segment_sum() {
    let config = StreamConfig {
        soft_limit: 10,
        hard_limit: 20,
    };
    let store = MemoryStore::new();
    let stream = Stream::create(
        store.clone(),
        MemoryLockManager::new(),
        config,
        "outbox:alice",
    )
    .await
    .unwrap();

    for i in 0..100 {
        stream.deliver(item(i)).await.unwrap();
    }
    for i in (0..100).step_by(3) {
        stream.remove(&item(i)).await.unwrap();
    }

    let present = stream.get_items(0, 200).await.unwrap().len();
    assert_eq!(stream.count().await.unwrap(), present);

    let mut segment_sum = 0;
    for segment in segment_ids(&store, "outbox:alice").await {
        segment_sum += segment_count(&store, &segment).await;
    }
    assert_eq!(segment_sum, i64::try_from(present).unwrap());
}

#[tokio::test]
async fn rollover_splits_segments_and_bounds_their_size() {
    let config = StreamConfig {
        soft_limit: 10,
        hard_limit: 20,
    };
    let store = MemoryStore::new();
    let stream = Stream::create(
        store.clone(),
        MemoryLockManager::new(),
        config,
        "outbox:alice",
    )
    .await
    .unwrap();

    for i in 0..200 {
        stream.deliver(item(i)).await.unwrap();
    }

    let segments = segment_ids(&store, "outbox:alice").await;
    assert!(segments.len() >= 2);
    for segment in &segments {
        assert!(segment_count(&store, segment).await <= 20);
    }

    // Rollover must not disturb ordering or completeness.
    let items = stream.get_items(0, 200).await.unwrap();
    let expected: Vec<Bytes> = (0..200).rev().map(item).collect();
    assert_eq!(items, expected);
}

#[tokio::test]
async fn rollover_with_default_limits() {
    let store = MemoryStore::new();
    let stream = Stream::create(
        store.clone(),
        MemoryLockManager::new(),
        StreamConfig::default(),
        "outbox:alice",
    )
    .await
    .unwrap();

    for i in 0..2100 {
        stream.deliver(item(i)).await.unwrap();
    }

    let segments = segment_ids(&store, "outbox:alice").await;
    assert!(segments.len() >= 2);
    for segment in &segments {
        assert!(segment_count(&store, segment).await <= 2000);
    }
    assert_eq!(stream.count().await.unwrap(), 2100);
}

#[tokio::test]
async fn index_of_agrees_with_get_items() {
    let config = StreamConfig {
        soft_limit: 5,
        hard_limit: 10,
    };
    let stream = Stream::create(
        MemoryStore::new(),
        MemoryLockManager::new(),
        config,
        "outbox:alice",
    )
    .await
    .unwrap();

    for i in 0..40 {
        stream.deliver(item(i)).await.unwrap();
    }

    for i in 0..40 {
        let rank = stream.index_of(&item(i)).await.unwrap();
        let page = stream.get_items(rank, rank + 1).await.unwrap();
        assert_eq!(page, vec![item(i)]);
    }
}

#[tokio::test]
async fn remove_absent_item_fails_and_leaves_count() {
    let (stream, _) = fresh_stream("outbox:alice").await;

    for i in 0..10 {
        stream.deliver(item(i)).await.unwrap();
    }

    let result = stream.remove(&item(99)).await;
    assert_matches!(
        result,
        Err(Error::NotInStream { item, stream }) if item == "item-99" && stream == "outbox:alice"
    );
    assert_eq!(stream.count().await.unwrap(), 10);
}

#[tokio::test]
async fn pagination_partitions_without_gaps_or_duplicates() {
    let config = StreamConfig {
        soft_limit: 7,
        hard_limit: 14,
    };
    let stream = Stream::create(
        MemoryStore::new(),
        MemoryLockManager::new(),
        config,
        "outbox:alice",
    )
    .await
    .unwrap();

    let total = 100;
    for i in 0..total {
        stream.deliver(item(i)).await.unwrap();
    }

    for chunk in [1, 7, 13, 100, 144] {
        let mut paged = Vec::new();
        let mut start = 0;
        loop {
            let page = stream.get_items(start, start + chunk).await.unwrap();
            if page.is_empty() {
                break;
            }
            start += page.len();
            paged.extend(page);
        }
        assert_eq!(paged, stream.get_items(0, total).await.unwrap());
    }
}

#[tokio::test]
async fn greater_and_less_than_page_around_an_item() {
    let (stream, _) = fresh_stream("outbox:alice").await;

    for i in 0..10 {
        stream.deliver(item(i)).await.unwrap();
    }

    // Newest-first order is item-9 .. item-0; item-5 sits at rank 4.
    let newer = stream.get_items_greater_than(&item(5), 3).await.unwrap();
    assert_eq!(newer, vec![item(8), item(7), item(6)]);

    let older = stream.get_items_less_than(&item(5), 3).await.unwrap();
    assert_eq!(older, vec![item(4), item(3), item(2)]);

    // Paging from the newest item clamps at the top.
    let none_newer = stream.get_items_greater_than(&item(9), 3).await.unwrap();
    assert!(none_newer.is_empty());

    let result = stream.get_items_greater_than(&item(42), 3).await;
    assert_matches!(result, Err(Error::NotInStream { .. }));
}

#[tokio::test]
async fn get_items_rejects_inverted_range() {
    let (stream, _) = fresh_stream("outbox:alice").await;
    let result = stream.get_items(5, 2).await;
    assert_matches!(result, Err(Error::BadParameters { start: 5, end: 2 }));
}

#[tokio::test]
async fn each_visits_every_item_once() {
    let config = StreamConfig {
        soft_limit: 5,
        hard_limit: 10,
    };
    let stream = Stream::create(
        MemoryStore::new(),
        MemoryLockManager::new(),
        config,
        "outbox:alice",
    )
    .await
    .unwrap();

    for i in 0..60 {
        stream.deliver(item(i)).await.unwrap();
    }

    let seen = Arc::new(Mutex::new(HashSet::new()));
    stream
        .each(DEFAULT_EACH_CONCURRENCY, {
            let seen = seen.clone();
            move |visited| {
                let seen = seen.clone();
                async move {
                    seen.lock().await.insert(visited);
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 60);
    for i in 0..60 {
        assert!(seen.contains(&item(i)));
    }
}

#[tokio::test]
async fn each_routes_handler_errors_to_the_caller() {
    let (stream, _) = fresh_stream("outbox:alice").await;

    for i in 0..10 {
        stream.deliver(item(i)).await.unwrap();
    }

    let result = stream
        .each(4, |visited| async move {
            if visited == item(5) {
                Err(Error::Task("rejected".to_string()))
            } else {
                Ok(())
            }
        })
        .await;

    assert_matches!(result, Err(Error::Task(msg)) if msg == "rejected");
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Note {
    id: String,
    content: String,
}

#[tokio::test]
async fn object_wrappers_round_trip() {
    let (stream, _) = fresh_stream("outbox:alice").await;

    let notes: Vec<Note> = (0..5)
        .map(|i| Note {
            id: format!("note-{i}"),
            content: format!("hello {i}"),
        })
        .collect();
    for note in &notes {
        stream.deliver_object(note).await.unwrap();
    }

    let read: Vec<Note> = stream.get_objects(0, 5).await.unwrap();
    let expected: Vec<Note> = notes.iter().rev().cloned().collect();
    assert_eq!(read, expected);

    assert!(stream.has_object(&notes[2]).await.unwrap());

    let newer: Vec<Note> = stream.get_objects_greater_than(&notes[2], 10).await.unwrap();
    assert_eq!(newer, vec![notes[4].clone(), notes[3].clone()]);

    stream.remove_object(&notes[2]).await.unwrap();
    assert!(!stream.has_object(&notes[2]).await.unwrap());
    assert_eq!(stream.count().await.unwrap(), 4);
}

#[tokio::test]
async fn delete_cascades_to_all_records() {
    let config = StreamConfig {
        soft_limit: 3,
        hard_limit: 6,
    };
    let store = MemoryStore::new();
    let stream = Stream::create(
        store.clone(),
        MemoryLockManager::new(),
        config,
        "outbox:alice",
    )
    .await
    .unwrap();

    for i in 0..30 {
        stream.deliver(item(i)).await.unwrap();
    }
    let segments = segment_ids(&store, "outbox:alice").await;
    assert!(segments.len() >= 2);

    stream.delete().await.unwrap();

    assert_eq!(store.read(records::STREAM, "outbox:alice").await.unwrap(), None);
    assert_eq!(
        store.read(records::STREAM_COUNT, "outbox:alice").await.unwrap(),
        None
    );
    assert_eq!(
        store
            .read(records::STREAM_SEGMENTS, "outbox:alice")
            .await
            .unwrap(),
        None
    );
    for segment in &segments {
        assert_eq!(
            store.read(records::STREAM_SEGMENT, segment).await.unwrap(),
            None
        );
        assert_eq!(
            store
                .read(records::STREAM_SEGMENT_COUNT, segment)
                .await
                .unwrap(),
            None
        );
    }
}

#[tokio::test]
async fn create_twice_surfaces_backend_error() {
    let store = MemoryStore::new();
    let locks = MemoryLockManager::new();

    Stream::create(store.clone(), locks.clone(), StreamConfig::default(), "inbox:a")
        .await
        .unwrap();
    let result = Stream::create(store, locks, StreamConfig::default(), "inbox:a").await;

    assert_matches!(result, Err(Error::Storage(_)));
}

#[tokio::test]
async fn deliver_compensates_when_a_counter_increment_fails() {
    let store = FlakyStore::new();
    let stream = Stream::create(
        store.clone(),
        MemoryLockManager::new(),
        StreamConfig::default(),
        "inbox:alice",
    )
    .await
    .unwrap();
    stream.deliver(item(0)).await.unwrap();

    store.deny("incr", records::STREAM_COUNT);
    let result = stream.deliver(item(1)).await;
    assert_matches!(result, Err(Error::Storage(_)));

    // The appended item and the segment counter were rolled back.
    assert_eq!(stream.count().await.unwrap(), 1);
    assert_eq!(stream.get_items(0, 10).await.unwrap(), vec![item(0)]);
    assert_matches!(stream.index_of(&item(1)).await, Err(Error::NotInStream { .. }));
}

#[tokio::test]
async fn failed_sub_create_deletes_the_records_already_created() {
    let store = FlakyStore::new();
    store.deny("create", records::STREAM_SEGMENTS);

    let result = Stream::create(
        store.clone(),
        MemoryLockManager::new(),
        StreamConfig::default(),
        "inbox:alice",
    )
    .await;
    assert_matches!(result, Err(Error::Storage(_)));

    assert_eq!(store.read(records::STREAM, "inbox:alice").await.unwrap(), None);
    assert_eq!(
        store.read(records::STREAM_COUNT, "inbox:alice").await.unwrap(),
        None
    );
    assert_eq!(
        store
            .read(records::STREAM_SEGMENTS, "inbox:alice")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn failed_compensation_surfaces_partially_applied() {
    let store = FlakyStore::new();
    store.deny("create", records::STREAM_SEGMENTS);
    store.deny("del", records::STREAM_SEGMENT_COUNT);

    let result = Stream::create(
        store,
        MemoryLockManager::new(),
        StreamConfig::default(),
        "inbox:alice",
    )
    .await;
    assert_matches!(
        result,
        Err(Error::PartiallyApplied { stream }) if stream == "inbox:alice"
    );
}

#[tokio::test]
async fn negative_counter_is_a_shape_violation() {
    let (stream, store) = fresh_stream("inbox:alice").await;

    store.decr(records::STREAM_COUNT, "inbox:alice").await.unwrap();

    assert_matches!(stream.count().await, Err(Error::Storage(_)));
}

#[tokio::test]
async fn concurrent_delivers_are_all_applied() {
    let config = StreamConfig {
        soft_limit: 10,
        hard_limit: 20,
    };
    let stream = Stream::create(
        MemoryStore::new(),
        MemoryLockManager::new(),
        config,
        "inbox:alice",
    )
    .await
    .unwrap();

    let mut handles = Vec::new();
    for i in 0..100 {
        let stream = stream.clone();
        handles.push(tokio::spawn(async move { stream.deliver(item(i)).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(stream.count().await.unwrap(), 100);
    let all: HashSet<Bytes> = stream
        .get_items(0, 100)
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(all.len(), 100);
}
