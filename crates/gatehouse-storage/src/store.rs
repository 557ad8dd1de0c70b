//! Entry store trait.
//!
//! The persistence contract consumed by the grant registry and the
//! expiration sweep. Implementations own the physical schema; the core only
//! depends on the operations and filter shapes defined here.

use async_trait::async_trait;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::StoreResult;
use crate::entry::{Entry, EntryKey, EntryKind};
use crate::error::StorageError;
use crate::filter::Filter;

/// Storage trait for directory-style entries.
///
/// All operations are single-entry; no cross-entry transactions are
/// assumed. Callers that need multi-entry consistency keep their own
/// authoritative in-memory state and treat the store as write-through
/// durability with compensating logging on failure.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Finds an entry by key.
    ///
    /// Returns `None` when the entry does not exist; absence is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn find(&self, key: &EntryKey) -> StoreResult<Option<Entry>>;

    /// Returns `true` if an entry with the given key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn contains(&self, key: &EntryKey) -> StoreResult<bool> {
        Ok(self.find(key).await?.is_some())
    }

    /// Persists a new entry.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if an entry with the same key is present,
    /// or a backend error.
    async fn persist(&self, entry: Entry) -> StoreResult<()>;

    /// Merges an updated entry over an existing one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no entry with the key exists, or a backend
    /// error.
    async fn merge(&self, entry: Entry) -> StoreResult<()>;

    /// Removes an entry by key.
    ///
    /// Removal is idempotent: removing an absent entry is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend fails.
    async fn remove(&self, key: &EntryKey) -> StoreResult<()>;

    /// Finds all entries of one kind matching the filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn find_entries(&self, kind: EntryKind, filter: &Filter) -> StoreResult<Vec<Entry>>;
}

/// Encodes a timestamp in the store's wire format (RFC 3339).
///
/// # Errors
///
/// Returns a serialization error if the timestamp cannot be formatted.
pub fn encode_time(time: OffsetDateTime) -> StoreResult<String> {
    time.format(&Rfc3339)
        .map_err(|e| StorageError::serialization(e.to_string()))
}

/// Decodes a timestamp from the store's wire format (RFC 3339).
///
/// # Errors
///
/// Returns a serialization error if the value is not a valid RFC 3339
/// timestamp.
pub fn decode_time(value: &str) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|e| StorageError::serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_roundtrip() {
        let now = OffsetDateTime::now_utc();
        let encoded = encode_time(now).unwrap();
        let decoded = decode_time(&encoded).unwrap();
        // RFC 3339 keeps sub-second precision, so the roundtrip is exact.
        assert_eq!(now, decoded);
    }

    #[test]
    fn test_decode_time_rejects_garbage() {
        assert!(decode_time("not-a-timestamp").is_err());
        assert!(decode_time("").is_err());
    }
}
