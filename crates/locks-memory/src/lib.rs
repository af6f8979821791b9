//! In-memory (single process) implementation of named reader/writer locks.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rill_locks::LockManager;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// In-memory lock manager: a registry of reader/writer locks keyed by
/// name, created on first use and never removed.
#[derive(Clone, Debug, Default)]
pub struct MemoryLockManager {
    registry: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl MemoryLockManager {
    /// Creates a new instance of `MemoryLockManager`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn entry(&self, name: &str) -> Arc<RwLock<()>> {
        let mut registry = self.registry.lock().await;
        registry
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    type Error = Error;
    type ReadGuard = OwnedRwLockReadGuard<()>;
    type WriteGuard = OwnedRwLockWriteGuard<()>;

    async fn read(&self, name: &str) -> Result<Self::ReadGuard, Self::Error> {
        Ok(self.entry(name).await.read_owned().await)
    }

    async fn write(&self, name: &str) -> Result<Self::WriteGuard, Self::Error> {
        Ok(self.entry(name).await.write_owned().await)
    }
}
