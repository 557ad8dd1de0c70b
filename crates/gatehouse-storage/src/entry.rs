//! Entry types stored in the directory.
//!
//! An [`Entry`] is a directory-style record: a hierarchical key, a flat map
//! of typed attributes used for filtering, and an opaque JSON payload owned
//! by the caller. The store never interprets the payload.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Well-known attribute names used by the core.
pub mod attr {
    /// Expiration timestamp attribute.
    pub const EXPIRES_AT: &str = "expiresAt";
    /// Deletable flag attribute; only deletable entries are swept.
    pub const DELETABLE: &str = "deletable";
    /// Owning client identifier.
    pub const CLIENT_ID: &str = "clientId";
    /// Grant identifier.
    pub const GRANT_ID: &str = "grantId";
}

/// The kind of entity an entry represents.
///
/// Kinds partition the store; filter queries always run within one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// An authorization grant with its issued tokens.
    Grant,
    /// A durable session tracked by the expiration sweep.
    Session,
    /// A CIBA backchannel authentication request.
    CibaRequest,
}

impl EntryKind {
    /// Returns the string representation of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Session => "session",
            Self::CibaRequest => "ciba_request",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Composite key uniquely identifying one entry: identifier + kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    /// Entity identifier (grant id, session id, auth_req_id...).
    pub id: String,
    /// The kind of entity.
    pub kind: EntryKind,
}

impl EntryKey {
    /// Creates a new entry key.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A typed attribute value.
///
/// Attributes are the filterable projection of an entry. Time values get a
/// dedicated variant so less-or-equal comparisons are chronological, not
/// lexicographic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    /// A string attribute.
    Str(String),
    /// A boolean attribute.
    Bool(bool),
    /// A timestamp attribute.
    Time(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<OffsetDateTime> for AttrValue {
    fn from(value: OffsetDateTime) -> Self {
        Self::Time(value)
    }
}

/// One stored entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// The entry key.
    pub key: EntryKey,
    /// Filterable attributes.
    pub attributes: BTreeMap<String, AttrValue>,
    /// Opaque serialized payload owned by the caller.
    pub payload: serde_json::Value,
}

impl Entry {
    /// Creates a new entry with an empty attribute map and null payload.
    #[must_use]
    pub fn new(key: EntryKey) -> Self {
        Self {
            key,
            attributes: BTreeMap::new(),
            payload: serde_json::Value::Null,
        }
    }

    /// Sets an attribute, replacing any existing value.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Returns an attribute value by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Returns a string attribute by name.
    #[must_use]
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(AttrValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns a boolean attribute by name.
    #[must_use]
    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        match self.attributes.get(name) {
            Some(AttrValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Returns a timestamp attribute by name.
    #[must_use]
    pub fn attr_time(&self, name: &str) -> Option<OffsetDateTime> {
        match self.attributes.get(name) {
            Some(AttrValue::Time(t)) => Some(*t),
            _ => None,
        }
    }
}
