//! Fan-out delivery of one activity to every resolved recipient.
//!
//! A [`Distributor`] is constructed per activity, used once, and
//! discarded. It resolves the activity's recipients in parallel and
//! appends the activity id to each local recipient's inbox stream,
//! capping concurrent inbox writes with a bounded queue and deduping
//! recipients across direct and collection-expanded addressing.
//!
//! Failure semantics: any single recipient's resolution error fails the
//! whole distribution, but inbox writes already performed are not rolled
//! back. Unknown recipient kinds, non-local persons, and missing
//! collections are logged skips, never errors. There is no cancellation
//! or deadline propagation at this layer.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod types;
mod users;

pub use error::{DistributorResult, Error};
pub use types::{
    Activity, Collection, CollectionKind, CollectionRecord, Person, Recipient, COLLECTION,
    PUBLIC_COLLECTION_ID,
};
pub use users::{User, UserDirectory};

use std::collections::HashSet;

use bytes::Bytes;
use futures::future::join_all;
use rill_locks::LockManager;
use rill_queue::BoundedQueue;
use rill_store::Store;
use rill_stream::{Stream, StreamConfig};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Configuration for one distribution run.
#[derive(Clone, Copy, Debug)]
pub struct DistributorConfig {
    /// Maximum concurrent inbox writes.
    pub inbox_concurrency: usize,

    /// Rollover configuration for the streams written to.
    pub stream: StreamConfig,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            inbox_concurrency: 25,
            stream: StreamConfig::default(),
        }
    }
}

/// Delivers one activity to its recipients. One instance per activity.
pub struct Distributor<S, L>
where
    S: Store,
    L: LockManager,
{
    activity: Activity,
    store: S,
    locks: L,
    directory: UserDirectory<S>,
    config: DistributorConfig,
    delivered: Mutex<HashSet<String>>,
    queue: BoundedQueue<Error>,
}

impl<S, L> Distributor<S, L>
where
    S: Store,
    L: LockManager,
{
    /// Creates a distributor for `activity`.
    #[must_use]
    pub fn new(activity: Activity, store: S, locks: L, config: DistributorConfig) -> Self {
        let directory = UserDirectory::new(store.clone());
        let queue = BoundedQueue::new(config.inbox_concurrency.max(1));
        Self {
            activity,
            store,
            locks,
            directory,
            config,
            delivered: Mutex::new(HashSet::new()),
            queue,
        }
    }

    /// Fans the activity out to every recipient.
    ///
    /// All resolution branches run to completion; the first resolution
    /// error wins, then the first inbox-write error. On error, inboxes
    /// written before the failure stay written.
    pub async fn distribute(self) -> DistributorResult<()> {
        let recipients = self.activity.recipients();
        debug!(
            activity = %self.activity.id,
            recipients = recipients.len(),
            "distributing activity"
        );

        let outcomes = join_all(
            recipients
                .into_iter()
                .map(|recipient| self.to_recipient(recipient)),
        )
        .await;
        let resolution_err = outcomes.into_iter().find_map(Result::err);

        let Self { queue, .. } = self;
        let write_result = queue.join().await.map_err(|err| match err {
            rill_queue::Error::Task(task_err) => task_err,
            rill_queue::Error::Panicked => Error::Panicked,
        });

        match resolution_err {
            Some(err) => Err(err),
            None => write_result,
        }
    }

    async fn to_recipient(&self, recipient: Recipient) -> DistributorResult<()> {
        match recipient {
            Recipient::Person(person) => self.to_person(person).await,
            Recipient::Collection(collection) => self.to_collection(collection).await,
            Recipient::Other { object_type, id } => {
                info!(%object_type, %id, "unknown recipient kind, skipping");
                Ok(())
            }
        }
    }

    async fn to_person(&self, person: Person) -> DistributorResult<()> {
        if !self.delivered.lock().await.insert(person.id.clone()) {
            debug!(person = %person.id, "already delivered, skipping");
            return Ok(());
        }

        let store = self.store.clone();
        let locks = self.locks.clone();
        let directory = self.directory.clone();
        let stream_config = self.config.stream;
        let activity_id = self.activity.id.clone();

        self.queue
            .push(async move {
                let Some(user) = directory.by_person_id(&person.id).await? else {
                    debug!(person = %person.id, "recipient is not a local user, skipping");
                    return Ok(());
                };
                let inbox =
                    Stream::open(store, locks, stream_config, user.inbox_stream()).await?;
                inbox.deliver(Bytes::from(activity_id)).await?;
                Ok(())
            })
            .await;

        Ok(())
    }

    async fn to_collection(&self, collection: Collection) -> DistributorResult<()> {
        if collection.id == PUBLIC_COLLECTION_ID {
            return self.to_followers().await;
        }
        if self.activity.actor.followers_url.as_deref() == Some(collection.id.as_str()) {
            return self.to_followers().await;
        }

        let raw = self
            .store
            .read(COLLECTION, &collection.id)
            .await
            .map_err(Error::storage)?;
        let Some(value) = raw else {
            // Deleted or inaccessible target is not fatal.
            info!(collection = %collection.id, "collection not found, skipping");
            return Ok(());
        };
        let Some(bytes) = value.as_item() else {
            return Err(Error::Storage(format!(
                "collection record {} has the wrong record shape",
                collection.id
            )));
        };
        let record: CollectionRecord = serde_json::from_slice(bytes)?;

        match &record.kind {
            CollectionKind::UserList { author, .. } if *author == self.activity.actor.id => {
                self.to_list(&record).await
            }
            CollectionKind::UserList { author, .. } => {
                info!(
                    collection = %record.id,
                    %author,
                    "list not authored by the sending actor, skipping"
                );
                Ok(())
            }
            CollectionKind::Generic => {
                info!(collection = %record.id, "generic collection, skipping");
                Ok(())
            }
        }
    }

    async fn to_list(&self, record: &CollectionRecord) -> DistributorResult<()> {
        let store = self.store.clone();
        let locks = self.locks.clone();
        let stream_config = self.config.stream;
        let activity_id = self.activity.id.clone();
        let list_stream = format!("list:{}", record.id);

        self.queue
            .push(async move {
                match Stream::open(store, locks, stream_config, list_stream).await {
                    Ok(stream) => {
                        stream.deliver(Bytes::from(activity_id)).await?;
                        Ok(())
                    }
                    Err(rill_stream::Error::NoSuchStream(name)) => {
                        warn!(list = %name, "list stream is gone, skipping");
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            })
            .await;

        Ok(())
    }

    async fn to_followers(&self) -> DistributorResult<()> {
        let actor_id = &self.activity.actor.id;
        let Some(actor_user) = self.directory.by_person_id(actor_id).await? else {
            warn!(actor = %actor_id, "actor is not a local user, cannot expand followers");
            return Ok(());
        };

        let followers = Stream::open(
            self.store.clone(),
            self.locks.clone(),
            self.config.stream,
            actor_user.followers_stream(),
        )
        .await?;
        let total = followers.count().await?;
        let follower_ids = followers.get_items(0, total).await?;

        let outcomes = join_all(follower_ids.iter().map(|follower| {
            let id = String::from_utf8_lossy(follower).into_owned();
            self.to_person(Person::new(id))
        }))
        .await;

        match outcomes.into_iter().find_map(Result::err) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
