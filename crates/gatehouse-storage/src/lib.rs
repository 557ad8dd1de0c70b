//! # gatehouse-storage
//!
//! Entry store abstraction for the Gatehouse authorization server.
//!
//! This crate defines the persistence contract the core consumes. The store
//! is a key/value-oriented directory: entries are addressed by an
//! [`EntryKey`] (identifier + kind) and carry a small set of typed
//! attributes plus an opaque JSON payload. Queries are expressed with a
//! composable [`Filter`] supporting equality, substring, less-or-equal and
//! AND/OR composition: the shapes the expiration sweep and grant lookups
//! need, nothing more.
//!
//! ## Overview
//!
//! The main trait is [`EntryStore`], which defines:
//! - `find` / `contains`: point lookups by key
//! - `persist` / `merge`: write a new entry or update an existing one
//! - `remove`: idempotent deletion
//! - `find_entries`: filter-based queries within one entry kind
//!
//! ## Backends
//!
//! [`InMemoryEntryStore`] is the reference implementation, used by the
//! default server wiring and by tests. Production deployments implement
//! [`EntryStore`] over their directory/database of choice.
//!
//! ```ignore
//! use gatehouse_storage::{EntryStore, Filter, EntryKind};
//!
//! async fn deletable_before(
//!     store: &dyn EntryStore,
//!     cutoff: time::OffsetDateTime,
//! ) -> gatehouse_storage::StoreResult<Vec<gatehouse_storage::Entry>> {
//!     let filter = Filter::and(vec![
//!         Filter::eq("deletable", true),
//!         Filter::le_time("expiresAt", cutoff),
//!     ]);
//!     store.find_entries(EntryKind::Session, &filter).await
//! }
//! ```

mod entry;
mod error;
mod filter;
mod memory;
mod store;

pub use entry::{AttrValue, Entry, EntryKey, EntryKind, attr};
pub use error::StorageError;
pub use filter::Filter;
pub use memory::InMemoryEntryStore;
pub use store::{EntryStore, decode_time, encode_time};

/// Type alias for a storage result.
pub type StoreResult<T> = Result<T, StorageError>;

/// Type alias for a shared entry store trait object.
pub type DynEntryStore = std::sync::Arc<dyn EntryStore>;
