//! Bank-backed lookup of local users.

use bytes::Bytes;
use rill_locks::LockManager;
use rill_store::{Store, Value};
use rill_stream::{Stream, StreamConfig};
use serde::{Deserialize, Serialize};

use crate::error::{DistributorResult, Error};

const USER: &str = "user";
const USER_BY_PERSON: &str = "userbyperson";

/// A local user account.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct User {
    /// Login name, unique per deployment.
    pub nickname: String,

    /// Id of the person object this user acts as.
    pub person_id: String,
}

impl User {
    /// Name of this user's inbox stream.
    #[must_use]
    pub fn inbox_stream(&self) -> String {
        format!("user:{}:inbox", self.nickname)
    }

    /// Name of this user's followers stream; items are follower person
    /// ids.
    #[must_use]
    pub fn followers_stream(&self) -> String {
        format!("user:{}:followers", self.nickname)
    }
}

/// Looks local users up by person id.
#[derive(Clone, Debug)]
pub struct UserDirectory<S>
where
    S: Store,
{
    store: S,
}

impl<S> UserDirectory<S>
where
    S: Store,
{
    /// Creates a directory over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Records a user and the person-id mapping pointing at them.
    pub async fn register(&self, user: &User) -> DistributorResult<()> {
        let raw = Bytes::from(serde_json::to_vec(user)?);
        self.store
            .create(USER, &user.nickname, Value::Item(raw))
            .await
            .map_err(Error::storage)?;
        self.store
            .create(
                USER_BY_PERSON,
                &user.person_id,
                Value::Item(Bytes::from(user.nickname.clone())),
            )
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    /// Registers a user and creates their inbox and followers streams.
    pub async fn provision<L>(&self, locks: &L, user: &User) -> DistributorResult<()>
    where
        L: LockManager,
    {
        self.register(user).await?;
        Stream::create(
            self.store.clone(),
            locks.clone(),
            StreamConfig::default(),
            user.inbox_stream(),
        )
        .await?;
        Stream::create(
            self.store.clone(),
            locks.clone(),
            StreamConfig::default(),
            user.followers_stream(),
        )
        .await?;
        Ok(())
    }

    /// The local user acting as `person_id`, if any.
    pub async fn by_person_id(&self, person_id: &str) -> DistributorResult<Option<User>> {
        let mapping = self
            .store
            .read(USER_BY_PERSON, person_id)
            .await
            .map_err(Error::storage)?;
        let Some(Value::Item(nickname)) = mapping else {
            return Ok(None);
        };
        let nickname = String::from_utf8_lossy(&nickname).into_owned();

        let record = self
            .store
            .read(USER, &nickname)
            .await
            .map_err(Error::storage)?;
        match record {
            Some(Value::Item(raw)) => Ok(Some(serde_json::from_slice(&raw)?)),
            _ => Ok(None),
        }
    }
}
