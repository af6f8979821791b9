//! In-memory (single node) implementation of the key-value bank for local
//! development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rill_store::{Store, Value};
use tokio::sync::Mutex;

/// In-memory key-value bank.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    map: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    /// Creates a new `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn get_key(kind: &str, key: &str) -> String {
        format!("{kind}:{key}")
    }
}

fn list_mut<'a>(
    map: &'a mut HashMap<String, Value>,
    full_key: &str,
) -> Result<&'a mut Vec<Bytes>, Error> {
    match map.get_mut(full_key) {
        Some(Value::List(items)) => Ok(items),
        Some(_) => Err(Error::WrongShape(full_key.to_string())),
        None => Err(Error::NoSuchKey(full_key.to_string())),
    }
}

fn counter_mut<'a>(
    map: &'a mut HashMap<String, Value>,
    full_key: &str,
) -> Result<&'a mut i64, Error> {
    match map.get_mut(full_key) {
        Some(Value::Counter(n)) => Ok(n),
        Some(_) => Err(Error::WrongShape(full_key.to_string())),
        None => Err(Error::NoSuchKey(full_key.to_string())),
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Error = Error;

    async fn create(&self, kind: &str, key: &str, value: Value) -> Result<(), Self::Error> {
        let full_key = Self::get_key(kind, key);
        let mut map = self.map.lock().await;
        if map.contains_key(&full_key) {
            return Err(Error::AlreadyExists(full_key));
        }
        map.insert(full_key, value);
        Ok(())
    }

    async fn read(&self, kind: &str, key: &str) -> Result<Option<Value>, Self::Error> {
        let map = self.map.lock().await;
        Ok(map.get(&Self::get_key(kind, key)).cloned())
    }

    async fn update(&self, kind: &str, key: &str, value: Value) -> Result<(), Self::Error> {
        let full_key = Self::get_key(kind, key);
        let mut map = self.map.lock().await;
        if !map.contains_key(&full_key) {
            return Err(Error::NoSuchKey(full_key));
        }
        map.insert(full_key, value);
        Ok(())
    }

    async fn del(&self, kind: &str, key: &str) -> Result<(), Self::Error> {
        self.map.lock().await.remove(&Self::get_key(kind, key));
        Ok(())
    }

    async fn append(&self, kind: &str, key: &str, item: Bytes) -> Result<(), Self::Error> {
        let full_key = Self::get_key(kind, key);
        let mut map = self.map.lock().await;
        list_mut(&mut map, &full_key)?.push(item);
        Ok(())
    }

    async fn remove(&self, kind: &str, key: &str, item: &Bytes) -> Result<bool, Self::Error> {
        let full_key = Self::get_key(kind, key);
        let mut map = self.map.lock().await;
        let items = list_mut(&mut map, &full_key)?;
        match items.iter().position(|present| present == item) {
            Some(idx) => {
                items.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn slice(
        &self,
        kind: &str,
        key: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Bytes>, Self::Error> {
        let full_key = Self::get_key(kind, key);
        let mut map = self.map.lock().await;
        let items = list_mut(&mut map, &full_key)?;
        let start = start.min(items.len());
        let end = end.min(items.len()).max(start);
        Ok(items[start..end].to_vec())
    }

    async fn index_of(
        &self,
        kind: &str,
        key: &str,
        item: &Bytes,
    ) -> Result<Option<usize>, Self::Error> {
        let full_key = Self::get_key(kind, key);
        let mut map = self.map.lock().await;
        let items = list_mut(&mut map, &full_key)?;
        Ok(items.iter().position(|present| present == item))
    }

    async fn incr(&self, kind: &str, key: &str) -> Result<i64, Self::Error> {
        let full_key = Self::get_key(kind, key);
        let mut map = self.map.lock().await;
        let n = counter_mut(&mut map, &full_key)?;
        *n += 1;
        Ok(*n)
    }

    async fn decr(&self, kind: &str, key: &str) -> Result<i64, Self::Error> {
        let full_key = Self::get_key(kind, key);
        let mut map = self.map.lock().await;
        let n = counter_mut(&mut map, &full_key)?;
        *n -= 1;
        Ok(*n)
    }

    async fn read_all(
        &self,
        kind: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Value>>, Self::Error> {
        let map = self.map.lock().await;
        Ok(keys
            .iter()
            .map(|key| map.get(&Self::get_key(kind, key)).cloned())
            .collect())
    }
}
