//! In-memory entry store.
//!
//! Reference implementation of [`EntryStore`] over a `tokio::sync::RwLock`
//! map. Used by the default server wiring and by tests; it is the contract
//! oracle other backends are measured against.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::StoreResult;
use crate::entry::{Entry, EntryKey, EntryKind};
use crate::error::StorageError;
use crate::filter::Filter;
use crate::store::EntryStore;

/// In-memory [`EntryStore`] implementation.
#[derive(Default)]
pub struct InMemoryEntryStore {
    entries: RwLock<HashMap<EntryKey, Entry>>,
}

impl InMemoryEntryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn find(&self, key: &EntryKey) -> StoreResult<Option<Entry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn persist(&self, entry: Entry) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.key) {
            return Err(StorageError::already_exists(entry.key.to_string()));
        }
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn merge(&self, entry: Entry) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&entry.key) {
            return Err(StorageError::not_found(entry.key.to_string()));
        }
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &EntryKey) -> StoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn find_entries(&self, kind: EntryKind, filter: &Filter) -> StoreResult<Vec<Entry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| e.key.kind == kind && filter.matches(e))
            .cloned()
            .collect())
    }
}
