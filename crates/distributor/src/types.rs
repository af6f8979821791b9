//! Addressing types for activity distribution.
//!
//! Collections carry an explicit tagged kind decided when the record is
//! read, rather than being structurally inferred on every check.

use serde::{Deserialize, Serialize};

/// Id of the well-known public collection.
pub const PUBLIC_COLLECTION_ID: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Record kind under which collection records are persisted.
pub const COLLECTION: &str = "collection";

/// A person address.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Person {
    /// Globally unique id.
    pub id: String,

    /// Url of this person's followers collection, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers_url: Option<String>,
}

impl Person {
    /// A person address with no followers url.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            followers_url: None,
        }
    }
}

/// A collection address, as it appears in an activity's address lists.
/// The collection's nature is only known once its record is read.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Collection {
    /// Globally unique id.
    pub id: String,
}

/// What a resolved collection is.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionKind {
    /// An ordinary collection; never a delivery target.
    Generic,

    /// A user-curated list of objects of a single type.
    UserList {
        /// Person id of the list's author.
        author: String,
        /// The single object type the list holds.
        object_type: String,
        /// Human-readable list name.
        display_name: String,
    },
}

/// A collection record as persisted in the bank.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CollectionRecord {
    /// Globally unique id.
    pub id: String,

    /// The collection's resolved kind.
    #[serde(flatten)]
    pub kind: CollectionKind,
}

/// One entry of an activity's address lists.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    /// A person; delivered to their inbox when local.
    Person(Person),

    /// A collection; resolved and possibly expanded.
    Collection(Collection),

    /// Any other object type; never a delivery target and never an
    /// error.
    Other {
        /// The unrecognized object type.
        object_type: String,
        /// The recipient's id, for logging.
        id: String,
    },
}

/// An activity with its addressing, ready for fan-out.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Activity {
    /// Globally unique id; this is what lands in inboxes.
    pub id: String,

    /// The sending actor.
    pub actor: Person,

    /// Primary addressees.
    #[serde(default)]
    pub to: Vec<Recipient>,

    /// Carbon-copy addressees.
    #[serde(default)]
    pub cc: Vec<Recipient>,

    /// Blind primary addressees.
    #[serde(default)]
    pub bto: Vec<Recipient>,

    /// Blind carbon-copy addressees.
    #[serde(default)]
    pub bcc: Vec<Recipient>,
}

impl Activity {
    /// An activity with empty address lists.
    #[must_use]
    pub fn new(id: impl Into<String>, actor: Person) -> Self {
        Self {
            id: id.into(),
            actor,
            to: Vec::new(),
            cc: Vec::new(),
            bto: Vec::new(),
            bcc: Vec::new(),
        }
    }

    /// Every addressee across the four address lists, in order.
    /// Duplicates are kept; the distributor dedups at delivery time.
    #[must_use]
    pub fn recipients(&self) -> Vec<Recipient> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bto)
            .chain(&self.bcc)
            .cloned()
            .collect()
    }
}
